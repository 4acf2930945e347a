//! 実験ごとのログファイル
//!
//! 1回の起動につき1つ取得し、成功・失敗どちらの経路でも flush して閉じる。
//! 書き込んだ行は `log` クレート経由でも出力する。

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;

/// 実験ログの出力先
pub struct RunLog {
    path: Option<PathBuf>,
    out: Box<dyn Write + Send>,
}

impl RunLog {
    /// ファイルを作成して開く。親ディレクトリが無ければ作る。
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(path)?;
        log::info!("run log: {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            out: Box::new(BufWriter::new(f)),
        })
    }

    /// 任意の writer に書き出す（ファイルシステムを使わないテスト用）
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            path: None,
            out: Box::new(writer),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// タイムスタンプ付きで1レコード書き出す
    pub fn info(&mut self, message: impl Display) -> io::Result<()> {
        let message = message.to_string();
        log::info!("{message}");
        writeln!(
            self.out,
            "{} INFO {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
    }

    /// `******` で囲んだブロックを書き出す
    pub fn section(&mut self, title: &str, body: impl Display) -> io::Result<()> {
        self.info(format_args!("******{title}******\n{body}\n******"))
    }

    /// 明示的に flush して閉じる。flush の失敗を呼び出し元に返す。
    pub fn close(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        // エラー経路でも内容を残す
        let _ = self.out.flush();
    }
}

/// メモリ上の出力先
///
/// [`RunLog::from_writer`] に渡してログ内容を取り出す（組み込み先やテストで
/// ファイルを作らずに内容を検査する用途）。クローンは同じバッファを指す。
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
