//! 実験識別子（ログファイルパス）の構築
//!
//! 形式: `log/<dt>_<label>_<modeTag>_<params>.log`
//!
//! 数値は既存のログ名と一致するように表記する。設定ファイルに整数で
//! 書かれた値は整数のまま（`reg1`）、浮動小数点は最短表現で指数部を
//! 2桁以上に揃える（`1e-05`, `0.0001`, `1e+16`）。
//!
//! 純粋関数で、ログ出力先の初期化は [`crate::run_log::RunLog`] 側で行う。

use crate::config::ResolvedConfig;
use crate::mode::{NamingBranch, RunMode};

/// 識別子を置くディレクトリ
pub const LOG_DIR: &str = "log";

/// 未設定の値の表記
const UNSET: &str = "none";

/// `reg` を「指定あり」とみなす基準
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegPresence {
    /// 値があり、かつ 0 でない場合のみ指定ありとする（従来互換）
    #[default]
    Truthy,
    /// 明示的な 0 も指定ありとする
    Explicit,
}

impl RegPresence {
    fn is_present(self, reg: Option<f64>) -> bool {
        match (self, reg) {
            (_, None) => false,
            (RegPresence::Truthy, Some(v)) => v != 0.0,
            (RegPresence::Explicit, Some(_)) => true,
        }
    }
}

/// 浮動小数点を識別子用に表記する
///
/// 仮数部は最短の往復可能表現。10進指数が `-4..16` の範囲なら固定小数点
/// （必ず小数部を持つ）、それ以外は符号付き2桁以上の指数表記。
pub fn render_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    // `{:e}` は最短表現の仮数部と指数を返す（例: "-1.25e-5"）
    let sci = format!("{value:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", mantissa),
    };

    if (-4..16).contains(&exp) {
        let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
        let body = if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() > int_len {
                format!("{}.{}", &digits[..int_len], &digits[int_len..])
            } else {
                format!("{digits:0<int_len$}.0")
            }
        } else {
            format!("0.{}{digits}", "0".repeat((-exp - 1) as usize))
        };
        format!("{sign}{body}")
    } else {
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}e{exp_sign}{:02}", exp.unsigned_abs())
    }
}

/// 設定値の表記。設定ファイルに書かれたままの表記があればそれを使う。
fn number(config: &ResolvedConfig, key: &str, value: Option<f64>) -> String {
    match (config.literals.get(key), value) {
        (_, None) => UNSET.to_string(),
        (Some(literal), Some(_)) => literal.clone(),
        (None, Some(v)) => render_float(v),
    }
}

/// 従来互換の基準で識別子を作る
pub fn build(config: &ResolvedConfig, mode: RunMode) -> String {
    build_with(config, mode, RegPresence::default())
}

/// 識別子を作る
///
/// BIAS_ETA_TUNE で `reg` 未指定の場合、`reg_W` と `reg_P` のみを埋め込み
/// `reg_Q` は含めない（既存のログ名との互換のため）。
pub fn build_with(config: &ResolvedConfig, mode: RunMode, presence: RegPresence) -> String {
    let reg_present = presence.is_present(config.reg);
    let reg = number(config, "reg", config.reg);
    let reg_w = number(config, "reg_W", config.reg_w);
    let reg_p = number(config, "reg_P", config.reg_p);

    let params = match mode.naming() {
        NamingBranch::BiasEta => {
            let bias_eta = number(config, "bias_eta", Some(config.bias_eta));
            if reg_present {
                format!("reg{reg}_bias_eta{bias_eta}")
            } else {
                format!("regW{reg_w}_regP{reg_p}_bias_eta{bias_eta}")
            }
        }
        NamingBranch::NuclearNorm => match config.nnl {
            Some(nnl) if nnl > 0 => format!("nnl{nnl}_reg{reg}"),
            _ => format!("reg{reg}"),
        },
        NamingBranch::Regularization => {
            if reg_present {
                format!("reg{reg}")
            } else {
                format!("regW{reg_w}_regP{reg_p}")
            }
        }
    };

    format!(
        "{LOG_DIR}/{}_{}_{}_{params}.log",
        config.dt,
        config.label.as_deref().unwrap_or(UNSET),
        mode.tag()
    )
}
