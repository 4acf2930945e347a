//! 学習曲線の末尾窓集計
//!
//! 反復ごとに記録された RMSE / MAE 系列の末尾（最大5点）を平均し、
//! 学習終了時点の安定した推定値として扱う。

use serde::Serialize;

use crate::error::{ExpError, ExpResult};

/// 末尾窓の長さ
pub const TRAILING_WINDOW: usize = 5;

/// 末尾窓で集計した (RMSE, MAE) の組
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrailingSummary {
    pub rmse: f64,
    pub mae: f64,
}

/// 系列の末尾 `min(n, 5)` 要素を返す
pub fn trailing_window(series: &[f64]) -> &[f64] {
    &series[series.len().saturating_sub(TRAILING_WINDOW)..]
}

fn trailing_mean_of(series: &[f64], name: &'static str) -> ExpResult<f64> {
    let window = trailing_window(series);
    if window.is_empty() {
        return Err(ExpError::EmptyMetricSeries(name));
    }
    Ok(mean(window))
}

/// 末尾窓の算術平均。空系列は `EmptyMetricSeries`。
pub fn trailing_mean(series: &[f64]) -> ExpResult<f64> {
    trailing_mean_of(series, "series")
}

/// RMSE 系列と MAE 系列をそれぞれ独立に集計する
pub fn summarize(rmses: &[f64], maes: &[f64]) -> ExpResult<TrailingSummary> {
    Ok(TrailingSummary {
        rmse: trailing_mean_of(rmses, "rmse")?,
        mae: trailing_mean_of(maes, "mae")?,
    })
}

/// 算術平均（呼び出し側で非空を保証する）
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn takes_last_five_of_longer_series() {
        let got = trailing_mean(&[1.0, 1.2, 1.1, 1.3, 1.05, 0.95]).unwrap();
        let expected = (1.2 + 1.1 + 1.3 + 1.05 + 0.95) / 5.0;
        assert!(approx(got, expected), "got {got}, expected {expected}");
    }

    #[test]
    fn short_series_uses_all_points() {
        assert!(approx(trailing_mean(&[2.0, 3.0]).unwrap(), 2.5));
        assert!(approx(trailing_mean(&[0.7]).unwrap(), 0.7));
    }

    #[test]
    fn empty_series_is_an_error() {
        let err = trailing_mean(&[]).unwrap_err();
        assert!(matches!(err, ExpError::EmptyMetricSeries(_)));
    }

    #[test]
    fn summarize_reports_which_series_was_empty() {
        let err = summarize(&[1.0], &[]).unwrap_err();
        assert!(matches!(err, ExpError::EmptyMetricSeries("mae")));

        let s = summarize(&[1.0, 3.0], &[0.5, 0.7]).unwrap();
        assert!(approx(s.rmse, 2.0));
        assert!(approx(s.mae, 0.6));
    }
}
