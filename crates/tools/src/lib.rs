//! 実験ドライバのバイナリ群と参照用の協調者
//!
//! - [`ratings`]: `user item rating` 形式の評価値ファイルの読み込み
//! - [`trainer`]: 参照用の潜在因子モデル（モデル種別ごとに正則化を切り替える）
//! - [`backend`]: 上記を `fmg_core::Backend` として束ねたもの

pub mod backend;
pub mod common;
pub mod ratings;
pub mod trainer;

pub use backend::RatingsBackend;
