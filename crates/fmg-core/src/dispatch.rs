//! モードごとのハンドラ呼び出し
//!
//! すべてのハンドラは同じ形をしている: データを読み込み、モードに対応する
//! モデルを順に学習させ、末尾窓の集計と経過時間をログに残す。
//! NON_CONVEX_5SPLIT は [`run`] で分割オーケストレータに回される。

use std::time::Instant;

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::error::{BoxError, ExpError, ExpResult};
use crate::metrics::{summarize, trailing_window, TrailingSummary};
use crate::mode::{LoaderKind, ModelVariant, RunMode};
use crate::run_log::RunLog;
use crate::splits::{run_splits, SplitReport};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// 学習可能なモデル
pub trait TrainableModel {
    /// 学習を実行する（長時間ブロックしうる）
    fn train(&mut self) -> Result<(), BoxError>;

    /// 反復ごとの (RMSE, MAE) 系列。`train()` の後でのみ有効。
    fn eval_res(&self) -> (&[f64], &[f64]);
}

/// データローダとモデルを提供する協調者
///
/// 通常ローダと nuclear norm 用ローダは異なる形のデータを返す。
pub trait Backend {
    type Standard;
    type Alternate;

    fn load_standard(&self, config: &ResolvedConfig) -> ExpResult<Self::Standard>;

    fn load_alternate(&self, config: &ResolvedConfig) -> ExpResult<Self::Alternate>;

    fn standard_model<'a>(
        &self,
        variant: ModelVariant,
        config: &ResolvedConfig,
        data: &'a Self::Standard,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>>;

    fn alternate_model<'a>(
        &self,
        variant: ModelVariant,
        config: &ResolvedConfig,
        data: &'a Self::Alternate,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>>;
}

/// 1モデル分の学習結果
#[derive(Clone, Debug, Serialize)]
pub struct ModelReport {
    pub variant: ModelVariant,
    pub iterations: usize,
    pub trailing_rmses: Vec<f64>,
    pub trailing_maes: Vec<f64>,
    pub summary: TrailingSummary,
    pub hours: f64,
}

/// 1回の起動の結果
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Single { mode: &'static str, models: Vec<ModelReport> },
    Splits(SplitReport),
}

/// 5分割モードを横取りし、それ以外は単発で実行する
pub fn run<B: Backend>(
    config: &ResolvedConfig,
    mode: RunMode,
    backend: &B,
    log: &mut RunLog,
) -> ExpResult<RunOutcome> {
    if mode.is_split_sweep() {
        return Ok(RunOutcome::Splits(run_splits(config, backend, log)?));
    }
    let models = dispatch(config, mode, backend, log)?;
    Ok(RunOutcome::Single { mode: mode.name(), models })
}

/// モードに対応するハンドラを1回実行する
pub fn dispatch<B: Backend>(
    config: &ResolvedConfig,
    mode: RunMode,
    backend: &B,
    log: &mut RunLog,
) -> ExpResult<Vec<ModelReport>> {
    if mode.is_split_sweep() {
        return Err(ExpError::UnsupportedMode(mode.name()));
    }
    log::info!(
        "run {}..., check the log in {}",
        mode.tag(),
        config.log_filename.as_deref().unwrap_or("-")
    );

    let mut reports = Vec::with_capacity(mode.variants().len());
    match mode.loader() {
        LoaderKind::Standard => {
            let data = backend.load_standard(config)?;
            for &variant in mode.variants() {
                let model = backend.standard_model(variant, config, &data)?;
                reports.push(train_model(variant, model)?);
            }
        }
        LoaderKind::Alternate => {
            let data = backend.load_alternate(config)?;
            for &variant in mode.variants() {
                let model = backend.alternate_model(variant, config, &data)?;
                reports.push(train_model(variant, model)?);
            }
        }
    }

    log_handler(config, mode, &reports, log)?;
    Ok(reports)
}

/// 通常ローダで1モデルを学習させる（分割実験の1ラウンド）
pub(crate) fn run_standard_variant<B: Backend>(
    config: &ResolvedConfig,
    mode: RunMode,
    variant: ModelVariant,
    backend: &B,
    log: &mut RunLog,
) -> ExpResult<ModelReport> {
    let data = backend.load_standard(config)?;
    let model = backend.standard_model(variant, config, &data)?;
    let report = train_model(variant, model)?;
    log_handler(config, mode, std::slice::from_ref(&report), log)?;
    Ok(report)
}

/// 学習時間の計測開始はモデルごとに `train()` の直前
fn train_model(
    variant: ModelVariant,
    mut model: Box<dyn TrainableModel + '_>,
) -> ExpResult<ModelReport> {
    log::info!("start training {}", variant.label());
    let start = Instant::now();
    model.train().map_err(|source| ExpError::TrainingFailure {
        model: variant.label(),
        source,
    })?;
    let (rmses, maes) = model.eval_res();
    let hours = start.elapsed().as_secs_f64() / SECONDS_PER_HOUR;
    let summary = summarize(rmses, maes)?;
    log::debug!("{} finished after {} iterations", variant.label(), rmses.len());
    Ok(ModelReport {
        variant,
        iterations: rmses.len(),
        trailing_rmses: trailing_window(rmses).to_vec(),
        trailing_maes: trailing_window(maes).to_vec(),
        summary,
        hours,
    })
}

fn log_handler(
    config: &ResolvedConfig,
    mode: RunMode,
    reports: &[ModelReport],
    log: &mut RunLog,
) -> ExpResult<()> {
    let title = if reports.len() > 1 { mode.tag() } else { "config" };
    let body = match mode {
        RunMode::BiasEtaTune => {
            format!("{}bias_eta={}", config.to_log_string(), config.bias_eta)
        }
        _ => config.to_log_string(),
    };
    log.section(title, body)?;
    for r in reports {
        log.info(format_args!(
            "**********{} finish, run once, cost {:.2} hours*******\nrmses: {:?}, maes: {:?}\navg rmse={}, avg mae={}\n***************",
            r.variant.label(),
            r.hours,
            r.trailing_rmses,
            r.trailing_maes,
            r.summary.rmse,
            r.summary.mae
        ))?;
    }
    Ok(())
}
