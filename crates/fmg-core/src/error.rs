//! 実験ドライバのエラー型
//!
//! すべての失敗は fail-fast で呼び出し元へ伝播する（リトライはしない）。

use std::path::PathBuf;

/// 学習・データ読み込み側の協調者が返すエラー
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Experiment driver errors
#[derive(thiserror::Error, Debug)]
pub enum ExpError {
    /// A required base configuration field is absent
    #[error("missing config key: {0}")]
    MissingConfigKey(&'static str),

    /// A base configuration field is present but has the wrong shape
    #[error("invalid value for config key {key}: expected {expected}, got {found}")]
    InvalidConfigValue {
        key: &'static str,
        expected: &'static str,
        found: String,
    },

    /// The configuration document failed to parse
    #[error("malformed config file {path}: {reason}")]
    MalformedConfigFile { path: PathBuf, reason: String },

    /// A command-line override cannot be coerced to its declared type
    #[error("invalid override value '{value}': expected {expected}")]
    InvalidOverrideType {
        value: String,
        expected: &'static str,
    },

    /// The aggregator was asked to summarize zero data points
    #[error("empty metric series: {0}")]
    EmptyMetricSeries(&'static str),

    /// Any error raised inside a model's `train()`
    #[error("training failed in {model}")]
    TrainingFailure {
        model: &'static str,
        #[source]
        source: BoxError,
    },

    /// The data-loader collaborator failed to materialize a dataset view
    #[error("failed to load data from {path}")]
    DataLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Numeric mode code outside the known set
    #[error("unknown run mode code: {0}")]
    UnknownMode(i64),

    /// Mode that cannot be dispatched directly (routed elsewhere)
    #[error("run mode {0} cannot be dispatched directly")]
    UnsupportedMode(&'static str),

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for experiment driver operations
pub type ExpResult<T> = Result<T, ExpError>;
