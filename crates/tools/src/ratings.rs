//! 評価値データセット
//!
//! `<data_dir>/<train_filename>` と `<data_dir>/<test_filename>` から
//! `user item rating` 形式の行を読み込む。ユーザ・アイテム ID は読み込み順に
//! 連番へ振り直す。

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fmg_core::ResolvedConfig;

use crate::common::io::open_reader;

pub const DEFAULT_TRAIN_FILENAME: &str = "ratings_train.txt";
pub const DEFAULT_TEST_FILENAME: &str = "ratings_test.txt";

/// 1件の評価値（連番化済み）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rating {
    pub user: usize,
    pub item: usize,
    pub value: f64,
}

/// 文字列 ID → 連番
#[derive(Default)]
struct IdMap {
    ids: HashMap<String, usize>,
}

impl IdMap {
    fn index(&mut self, key: &str) -> usize {
        let next = self.ids.len();
        *self.ids.entry(key.to_string()).or_insert(next)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// 通常ローダのビュー: train/test の評価値の並び
#[derive(Clone, Debug, Default)]
pub struct RatingsData {
    pub train: Vec<Rating>,
    pub test: Vec<Rating>,
    pub n_users: usize,
    pub n_items: usize,
}

/// nuclear norm モデル用のビュー: 学習データをユーザ行ごとにまとめたもの
#[derive(Clone, Debug, Default)]
pub struct UserRows {
    /// `rows[u]` はユーザ `u` の (item, rating)
    pub rows: Vec<Vec<(usize, f64)>>,
    pub test: Vec<Rating>,
    pub n_users: usize,
    pub n_items: usize,
}

/// 設定から train/test ファイルのパスを決める
pub fn data_paths(config: &ResolvedConfig) -> (PathBuf, PathBuf) {
    let dir = Path::new(&config.data_dir);
    let train = config.train_filename.as_deref().unwrap_or(DEFAULT_TRAIN_FILENAME);
    let test = config.test_filename.as_deref().unwrap_or(DEFAULT_TEST_FILENAME);
    (dir.join(train), dir.join(test))
}

/// 1行をパースする。空行と `#` コメントは `None`。
fn parse_line(line: &str, line_no: usize) -> Result<Option<(&str, &str, f64)>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let cols: Vec<&str> = trimmed.split_whitespace().collect();
    if cols.len() < 3 {
        bail!("invalid ratings line {}: '{}'", line_no, line);
    }
    let value = cols[2]
        .parse::<f64>()
        .with_context(|| format!("invalid rating at line {}", line_no))?;
    Ok(Some((cols[0], cols[1], value)))
}

fn read_ratings<R: BufRead>(
    reader: R,
    users: &mut IdMap,
    items: &mut IdMap,
) -> Result<Vec<Rating>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some((u, i, value)) = parse_line(&line, idx + 1)? {
            out.push(Rating {
                user: users.index(u),
                item: items.index(i),
                value,
            });
        }
    }
    Ok(out)
}

impl RatingsData {
    pub fn load(config: &ResolvedConfig) -> Result<Self> {
        let (train_path, test_path) = data_paths(config);
        let train = open_reader(&train_path)
            .with_context(|| format!("failed to open {}", train_path.display()))?;
        let test = open_reader(&test_path)
            .with_context(|| format!("failed to open {}", test_path.display()))?;
        let data = Self::from_readers(train, test)
            .with_context(|| format!("failed to read ratings under {}", config.data_dir))?;
        log::info!(
            "loaded {} train / {} test ratings ({} users, {} items) from {}",
            data.train.len(),
            data.test.len(),
            data.n_users,
            data.n_items,
            config.data_dir
        );
        Ok(data)
    }

    pub fn from_readers<R1: BufRead, R2: BufRead>(train: R1, test: R2) -> Result<Self> {
        let mut users = IdMap::default();
        let mut items = IdMap::default();
        let train = read_ratings(train, &mut users, &mut items).context("train file")?;
        let test = read_ratings(test, &mut users, &mut items).context("test file")?;
        Ok(Self {
            train,
            test,
            n_users: users.len(),
            n_items: items.len(),
        })
    }

    /// ユーザ行ビューに変換する
    pub fn into_user_rows(self) -> UserRows {
        let mut rows = vec![Vec::new(); self.n_users];
        for r in &self.train {
            rows[r.user].push((r.item, r.value));
        }
        UserRows {
            rows,
            test: self.test,
            n_users: self.n_users,
            n_items: self.n_items,
        }
    }
}
