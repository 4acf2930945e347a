//! 5分割交差検証
//!
//! ラウンド 1..=5 を順に実行し、各ラウンドの末尾窓集計を平均する。
//! 途中のラウンドで学習が失敗した場合はそこで全体を中断する。

use std::time::Instant;

use serde::Serialize;

use crate::config::{ResolvedConfig, SPLIT_ROUNDS};
use crate::dispatch::{run_standard_variant, Backend};
use crate::error::ExpResult;
use crate::metrics::{mean, TrailingSummary};
use crate::mode::{ModelVariant, RunMode};
use crate::run_log::RunLog;

/// 1ラウンドの結果
#[derive(Clone, Debug, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub data_dir: String,
    pub summary: TrailingSummary,
    pub hours: f64,
}

/// 全ラウンドの結果
#[derive(Clone, Debug, Serialize)]
pub struct SplitReport {
    pub rounds: Vec<RoundReport>,
    /// ラウンドごとの RMSE / MAE の算術平均
    pub mean: TrailingSummary,
}

/// 全ラウンドで共通の識別子・ログを使い、データパスだけを差し替える
pub fn run_splits<B: Backend>(
    config: &ResolvedConfig,
    backend: &B,
    log: &mut RunLog,
) -> ExpResult<SplitReport> {
    let mut rounds = Vec::with_capacity(SPLIT_ROUNDS as usize);
    for round in 1..=SPLIT_ROUNDS {
        let round_cfg = config.for_split(round);
        log.info(format_args!("start exp on split{round}"))?;
        let start = Instant::now();
        let report = run_standard_variant(
            &round_cfg,
            RunMode::NonConvexReg,
            ModelVariant::NonConvex,
            backend,
            log,
        )?;
        let hours = start.elapsed().as_secs_f64() / 3600.0;
        log.info(format_args!("finish exp on split{round}, cost {hours:.1} hours"))?;
        rounds.push(RoundReport {
            round,
            data_dir: round_cfg.data_dir,
            summary: report.summary,
            hours,
        });
    }

    let rmses: Vec<f64> = rounds.iter().map(|r| r.summary.rmse).collect();
    let maes: Vec<f64> = rounds.iter().map(|r| r.summary.mae).collect();
    let avg = TrailingSummary {
        rmse: mean(&rmses),
        mae: mean(&maes),
    };
    log.info(format_args!(
        "finish exp on all splits, rmses={rmses:?}, maes={maes:?}, avg rmse={:.4}, avg mae={:.4}",
        avg.rmse, avg.mae
    ))?;
    Ok(SplitReport { rounds, mean: avg })
}
