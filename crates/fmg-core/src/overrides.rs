//! コマンドライン上書き値
//!
//! 各フィールドは `None` が「未指定」を表す。数値のゼロと未指定は区別される。

use serde::Serialize;

use crate::error::{ExpError, ExpResult};

/// コマンドラインから与えられた上書き値（パース後は不変）
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CliOverrides {
    /// 潜在因子数
    #[serde(rename = "K")]
    pub k: Option<u64>,
    /// 全パラメータ共通の正則化係数（指定時は reg_P/reg_Q/reg_W を上書き）
    pub reg: Option<f64>,
    #[serde(rename = "reg_P")]
    pub reg_p: Option<f64>,
    #[serde(rename = "reg_Q")]
    pub reg_q: Option<f64>,
    #[serde(rename = "reg_W")]
    pub reg_w: Option<f64>,
    pub max_iters: Option<u64>,
    pub eps: Option<f64>,
    pub eta: Option<f64>,
    pub bias_eta: Option<f64>,
    pub initial: Option<f64>,
    /// nuclear norm の lambda 種別
    pub nnl: Option<i64>,
}

impl CliOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 上書きによって値が置き換わる浮動小数点キー（`reg` は個別キーも含む）
    pub fn overridden_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.reg.is_some() {
            keys.extend(["reg", "reg_P", "reg_Q", "reg_W"]);
        }
        for (key, value) in [
            ("reg_P", self.reg_p),
            ("reg_Q", self.reg_q),
            ("reg_W", self.reg_w),
            ("eps", self.eps),
            ("eta", self.eta),
            ("bias_eta", self.bias_eta),
            ("initial", self.initial),
        ] {
            if value.is_some() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// `key=value` 形式の上書きを1つ適用する。
    ///
    /// キー名は設定ファイル側の名前（`K`, `reg_P` など）を使う。
    pub fn set(&mut self, key: &str, value: &str) -> ExpResult<()> {
        match key {
            "K" => self.k = Some(parse_uint(value)?),
            "reg" => self.reg = Some(parse_float(value)?),
            "reg_P" => self.reg_p = Some(parse_float(value)?),
            "reg_Q" => self.reg_q = Some(parse_float(value)?),
            "reg_W" => self.reg_w = Some(parse_float(value)?),
            "max_iters" => self.max_iters = Some(parse_uint(value)?),
            "eps" => self.eps = Some(parse_float(value)?),
            "eta" => self.eta = Some(parse_float(value)?),
            "bias_eta" => self.bias_eta = Some(parse_float(value)?),
            "initial" => self.initial = Some(parse_float(value)?),
            "nnl" => self.nnl = Some(parse_int(value)?),
            _ => {
                return Err(ExpError::InvalidOverrideType {
                    value: format!("{key}={value}"),
                    expected: "a known override field",
                });
            }
        }
        Ok(())
    }
}

/// 浮動小数点の上書き値をパースする（`1e-6` 等の指数表記も可）
pub fn parse_float(value: &str) -> ExpResult<f64> {
    let parsed = value.trim().parse::<f64>().map_err(|_| invalid(value, "a float"))?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(invalid(value, "a finite float"))
    }
}

/// 符号なし整数の上書き値をパースする
pub fn parse_uint(value: &str) -> ExpResult<u64> {
    value.trim().parse::<u64>().map_err(|_| invalid(value, "a non-negative integer"))
}

/// 符号付き整数の上書き値をパースする
pub fn parse_int(value: &str) -> ExpResult<i64> {
    value.trim().parse::<i64>().map_err(|_| invalid(value, "an integer"))
}

fn invalid(value: &str, expected: &'static str) -> ExpError {
    ExpError::InvalidOverrideType {
        value: value.to_string(),
        expected,
    }
}
