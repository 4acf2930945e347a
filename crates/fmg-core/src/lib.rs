//! meta-graph FM 実験ドライバのコア
//!
//! 設定ファイルとコマンドライン上書き値から実験設定を導出し、
//! 実行モードに応じて学習ハンドラ（単発 or 5分割交差検証）を呼び出す。
//! 学習アルゴリズムとデータ読み込みは [`Backend`] / [`TrainableModel`]
//! を実装する協調者が提供する。

pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod mode;
pub mod overrides;
pub mod run_id;
pub mod run_log;
pub mod splits;

#[cfg(test)]
mod testing;

pub use config::{derive, derive_at, BaseConfig, ResolvedConfig};
pub use dispatch::{dispatch, run, Backend, ModelReport, RunOutcome, TrainableModel};
pub use error::{BoxError, ExpError, ExpResult};
pub use metrics::{summarize, trailing_mean, TrailingSummary};
pub use mode::{LoaderKind, ModelVariant, RunMode};
pub use overrides::CliOverrides;
pub use run_id::RegPresence;
pub use run_log::RunLog;
pub use splits::{run_splits, SplitReport};
