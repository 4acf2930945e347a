//! 実験設定の読み込みと導出
//!
//! 設定ファイル（YAML/JSON）を [`BaseConfig`] として読み込み、
//! コマンドライン上書き値と合わせて [`ResolvedConfig`] を導出する。
//! 導出後の設定は不変で、分割実験ではラウンドごとにコピーを作る。

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_yaml::Value;

use crate::error::{ExpError, ExpResult};
use crate::overrides::CliOverrides;

/// `data_dir` 中で `dt` の値に置換されるトークン
pub const DATASET_TOKEN: &str = "dt";

/// 交差検証のラウンド数
pub const SPLIT_ROUNDS: u32 = 5;

/// 識別子に埋め込まれうる浮動小数点キー
const LITERAL_KEYS: [&str; 5] = ["reg", "reg_P", "reg_Q", "reg_W", "bias_eta"];

/// 読み込んだままの設定ファイル
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaseConfig {
    entries: BTreeMap<String, Value>,
}

impl BaseConfig {
    /// 設定ファイルを読み込む。拡張子 `.json` は JSON、それ以外は YAML として扱う。
    pub fn load<P: AsRef<Path>>(path: P) -> ExpResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
        let parsed: Result<BTreeMap<String, Value>, String> = match ext.as_deref() {
            Some("json") => serde_json::from_str(&text).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(&text).map_err(|e| e.to_string()),
        };
        let mut entries = parsed.map_err(|reason| ExpError::MalformedConfigFile {
            path: path.to_path_buf(),
            reason,
        })?;
        entries.insert(
            "config_filename".to_string(),
            Value::String(path.display().to_string()),
        );
        log::debug!("loaded {} config keys from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    /// YAML 文字列から直接作る（テスト・埋め込み用）
    pub fn from_yaml_str(text: &str) -> ExpResult<Self> {
        let entries = serde_yaml::from_str(text).map_err(|e| ExpError::MalformedConfigFile {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 導出済みの実験設定
///
/// コアが参照するフィールドは型付きで保持し、それ以外のキーは `extra` に
/// そのまま残してモデル側へ渡す。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedConfig {
    /// 導出時点の Unix 時刻（秒）
    pub exp_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_filename: Option<String>,
    pub meta_graphs: Vec<Value>,
    /// meta graph 数
    #[serde(rename = "L")]
    pub l: usize,
    /// meta graph ごとの潜在次元
    #[serde(rename = "F")]
    pub f: u64,
    /// 特徴次元 `2 * L * F`
    #[serde(rename = "N")]
    pub n: u64,
    /// データセットタグ
    pub dt: String,
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_filename: Option<String>,
    pub eps: f64,
    pub initial: f64,
    pub eta: f64,
    pub bias_eta: f64,
    #[serde(rename = "K")]
    pub k: Option<u64>,
    pub max_iters: Option<u64>,
    pub reg: Option<f64>,
    #[serde(rename = "reg_P")]
    pub reg_p: Option<f64>,
    #[serde(rename = "reg_Q")]
    pub reg_q: Option<f64>,
    #[serde(rename = "reg_W")]
    pub reg_w: Option<f64>,
    pub nnl: Option<i64>,
    /// 設定ファイルの `log_filename`（識別子に埋め込むラベル）
    pub label: Option<String>,
    /// 導出された実験識別子（ログファイルパス）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filename: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
    /// 設定ファイルに整数・文字列で書かれていた数値キーの元の表記
    ///
    /// 上書きされたキーは含まない。識別子の表記にのみ使う。
    #[serde(skip)]
    pub literals: BTreeMap<&'static str, String>,
}

/// 現在時刻で設定を導出する
pub fn derive(base: &BaseConfig, overrides: &CliOverrides) -> ExpResult<ResolvedConfig> {
    derive_at(base, overrides, Utc::now())
}

/// 指定時刻で設定を導出する
///
/// 同一秒内に2回導出すると `exp_id` は一致しうる（重複排除はしない）。
pub fn derive_at(
    base: &BaseConfig,
    overrides: &CliOverrides,
    now: DateTime<Utc>,
) -> ExpResult<ResolvedConfig> {
    let mut rest = base.entries.clone();

    let meta_graphs = match rest.remove("meta_graphs") {
        Some(Value::Sequence(seq)) => seq,
        Some(other) => return Err(invalid("meta_graphs", "a list", &other)),
        None => return Err(ExpError::MissingConfigKey("meta_graphs")),
    };
    let l = meta_graphs.len();
    let f = required_uint(&mut rest, "F")?;
    let n = (l as u64)
        .checked_mul(2)
        .and_then(|v| v.checked_mul(f))
        .ok_or_else(|| ExpError::InvalidConfigValue {
            key: "F",
            expected: "a value with 2 * L * F within u64",
            found: format!("{f} (L = {l})"),
        })?;
    let literals = literal_forms(&rest);

    let eps = required_float(&mut rest, "eps")?;
    let initial = required_float(&mut rest, "initial")?;
    let eta = required_float(&mut rest, "eta")?;
    let bias_eta = required_float(&mut rest, "bias_eta")?;

    let dt = required_text(&mut rest, "dt")?;
    let data_dir = required_text(&mut rest, "data_dir")?.replace(DATASET_TOKEN, &dt);

    let mut resolved = ResolvedConfig {
        exp_id: now.timestamp(),
        config_filename: optional_text(&mut rest, "config_filename")?,
        meta_graphs,
        l,
        f,
        n,
        dt,
        data_dir,
        train_filename: optional_text(&mut rest, "train_filename")?,
        test_filename: optional_text(&mut rest, "test_filename")?,
        eps,
        initial,
        eta,
        bias_eta,
        k: optional_uint(&mut rest, "K")?,
        max_iters: optional_uint(&mut rest, "max_iters")?,
        reg: optional_float(&mut rest, "reg")?,
        reg_p: optional_float(&mut rest, "reg_P")?,
        reg_q: optional_float(&mut rest, "reg_Q")?,
        reg_w: optional_float(&mut rest, "reg_W")?,
        nnl: optional_int(&mut rest, "nnl")?,
        label: optional_text(&mut rest, "log_filename")?,
        log_filename: None,
        extra: rest,
        literals,
    };
    resolved.apply_overrides(overrides);
    Ok(resolved)
}

impl ResolvedConfig {
    /// 上書き値を適用する。`reg` は個別指定（reg_P/reg_Q/reg_W）より優先する。
    fn apply_overrides(&mut self, o: &CliOverrides) {
        for key in o.overridden_keys() {
            self.literals.remove(key);
        }
        if let Some(reg) = o.reg {
            self.reg = Some(reg);
            self.reg_p = Some(reg);
            self.reg_q = Some(reg);
            self.reg_w = Some(reg);
        } else {
            assign(&mut self.reg_p, o.reg_p);
            assign(&mut self.reg_q, o.reg_q);
            assign(&mut self.reg_w, o.reg_w);
        }
        assign(&mut self.k, o.k);
        assign(&mut self.max_iters, o.max_iters);
        assign(&mut self.nnl, o.nnl);
        if let Some(v) = o.eps {
            self.eps = v;
        }
        if let Some(v) = o.eta {
            self.eta = v;
        }
        if let Some(v) = o.bias_eta {
            self.bias_eta = v;
        }
        if let Some(v) = o.initial {
            self.initial = v;
        }
    }

    /// 識別子を `log_filename` に設定したコピーを返す
    pub fn with_log_filename(mut self, id: impl Into<String>) -> Self {
        self.log_filename = Some(id.into());
        self
    }

    /// 交差検証ラウンド `round`（1 始まり）のデータパスを指すコピーを返す
    pub fn for_split(&self, round: u32) -> Self {
        let mut cfg = self.clone();
        cfg.data_dir = format!("data/{}/exp_split/{}/", self.dt, round);
        cfg.train_filename = Some(format!("ratings_train_{round}.txt"));
        cfg.test_filename = Some(format!("ratings_test_{round}.txt"));
        cfg
    }

    /// ログ出力用の YAML 表現
    pub fn to_log_string(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("<unserializable config: {e}>"))
    }
}

fn assign<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Sequence(_) => "list".to_string(),
        Value::Mapping(_) => "mapping".to_string(),
        Value::Tagged(t) => format!("tagged value {}", t.tag),
    }
}

fn invalid(key: &'static str, expected: &'static str, found: &Value) -> ExpError {
    ExpError::InvalidConfigValue {
        key,
        expected,
        found: describe(found),
    }
}

/// 浮動小数点として読む値のうち、小数表記でないものの元の表記
fn literal_forms(rest: &BTreeMap<String, Value>) -> BTreeMap<&'static str, String> {
    LITERAL_KEYS
        .iter()
        .filter_map(|&key| match rest.get(key)? {
            Value::Number(n) if !n.is_f64() => Some((key, n.to_string())),
            Value::String(s) => Some((key, s.trim().to_string())),
            _ => None,
        })
        .collect()
}

fn take(rest: &mut BTreeMap<String, Value>, key: &'static str) -> Option<Value> {
    match rest.remove(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    }
}

/// 数値、または数値として解釈できる文字列（`"1e-6"` 等）を f64 に変換する
fn coerce_float(key: &'static str, value: &Value) -> ExpResult<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(key, "a number", value))
}

fn required_float(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<f64> {
    let value = take(rest, key).ok_or(ExpError::MissingConfigKey(key))?;
    coerce_float(key, &value)
}

fn optional_float(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<Option<f64>> {
    take(rest, key).map(|v| coerce_float(key, &v)).transpose()
}

fn coerce_int(key: &'static str, value: &Value) -> ExpResult<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(key, "an integer", value))
}

fn coerce_uint(key: &'static str, value: &Value) -> ExpResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(key, "a non-negative integer", value))
}

fn required_uint(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<u64> {
    let value = take(rest, key).ok_or(ExpError::MissingConfigKey(key))?;
    coerce_uint(key, &value)
}

fn optional_uint(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<Option<u64>> {
    take(rest, key).map(|v| coerce_uint(key, &v)).transpose()
}

fn optional_int(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<Option<i64>> {
    take(rest, key).map(|v| coerce_int(key, &v)).transpose()
}

fn coerce_text(key: &'static str, value: &Value) -> ExpResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(key, "a string", other)),
    }
}

fn required_text(rest: &mut BTreeMap<String, Value>, key: &'static str) -> ExpResult<String> {
    let value = take(rest, key).ok_or(ExpError::MissingConfigKey(key))?;
    coerce_text(key, &value)
}

fn optional_text(
    rest: &mut BTreeMap<String, Value>,
    key: &'static str,
) -> ExpResult<Option<String>> {
    take(rest, key).map(|v| coerce_text(key, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const BASE: &str = r#"
dt: ml100k
data_dir: data/dt/ratings/
meta_graphs: [ratings, UUB, UBCaB, UBCiB]
F: 10
K: 8
max_iters: 50
eps: "1e-6"
initial: 1e-5
eta: "0.01"
bias_eta: 0.001
reg: 0
reg_P: 0.5
reg_Q: 0.6
reg_W: 0.7
nnl: 0
log_filename: base
solver: sgd
"#;

    fn base() -> BaseConfig {
        BaseConfig::from_yaml_str(BASE).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn derives_structural_fields() {
        let cfg = derive_at(&base(), &CliOverrides::default(), at(1_500_000_000)).unwrap();
        assert_eq!(cfg.exp_id, 1_500_000_000);
        assert_eq!(cfg.l, 4);
        assert_eq!(cfg.l, cfg.meta_graphs.len());
        assert_eq!(cfg.n, 2 * 4 * 10);
        assert_eq!(cfg.label.as_deref(), Some("base"));
        assert_eq!(cfg.extra.get("solver"), Some(&Value::String("sgd".into())));
    }

    #[test]
    fn oversized_f_is_rejected() {
        let text = "dt: x\ndata_dir: d\nmeta_graphs: [a]\nF: 18446744073709551615\neps: 1\ninitial: 1\neta: 1\nbias_eta: 1\n";
        let err = derive(&BaseConfig::from_yaml_str(text).unwrap(), &CliOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ExpError::InvalidConfigValue { key: "F", .. }), "{err:?}");

        let text = "dt: x\ndata_dir: d\nmeta_graphs: []\nF: 18446744073709551615\neps: 1\ninitial: 1\neta: 1\nbias_eta: 1\n";
        let cfg = derive(&BaseConfig::from_yaml_str(text).unwrap(), &CliOverrides::default())
            .unwrap();
        assert_eq!(cfg.n, 0);
    }

    #[test]
    fn integer_literals_are_kept_until_overridden() {
        let cfg = derive(&base(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.literals.get("reg").map(String::as_str), Some("0"));
        assert!(!cfg.literals.contains_key("reg_P"));

        let overrides = CliOverrides {
            reg: Some(0.5),
            ..Default::default()
        };
        let cfg = derive(&base(), &overrides).unwrap();
        assert!(cfg.literals.get("reg").is_none());
    }

    #[test]
    fn n_tracks_meta_graph_count() {
        for (graphs, f) in [("[]", 3u64), ("[a]", 1), ("[a, b, c]", 7)] {
            let text = format!(
                "dt: x\ndata_dir: d\nmeta_graphs: {graphs}\nF: {f}\neps: 1\ninitial: 1\neta: 1\nbias_eta: 1\n"
            );
            let cfg = derive(&BaseConfig::from_yaml_str(&text).unwrap(), &CliOverrides::default())
                .unwrap();
            assert_eq!(cfg.n, 2 * cfg.l as u64 * f);
        }
    }

    #[test]
    fn numeric_text_is_coerced_to_float() {
        let cfg = derive(&base(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.eps, 1e-6);
        assert_eq!(cfg.initial, 1e-5);
        assert_eq!(cfg.eta, 0.01);
        assert_eq!(cfg.bias_eta, 0.001);
    }

    #[test]
    fn non_numeric_text_is_rejected() {
        let mut b = base();
        b.insert("eta", Value::String("fast".into()));
        let err = derive(&b, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ExpError::InvalidConfigValue { key: "eta", .. }), "{err:?}");
    }

    #[test]
    fn data_dir_token_is_substituted() {
        let cfg = derive(&base(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.data_dir, "data/ml100k/ratings/");
    }

    #[test]
    fn every_token_occurrence_is_substituted() {
        let mut b = base();
        b.insert("data_dir", Value::String("dt/dt_split/".into()));
        let cfg = derive(&b, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.data_dir, "ml100k/ml100k_split/");
    }

    #[test]
    fn missing_f_is_reported() {
        let text = BASE.replace("F: 10\n", "");
        let err = derive(&BaseConfig::from_yaml_str(&text).unwrap(), &CliOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ExpError::MissingConfigKey("F")));
    }

    #[test]
    fn missing_meta_graphs_is_reported() {
        let text = BASE.replace("meta_graphs: [ratings, UUB, UBCaB, UBCiB]\n", "");
        let err = derive(&BaseConfig::from_yaml_str(&text).unwrap(), &CliOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ExpError::MissingConfigKey("meta_graphs")));
    }

    #[test]
    fn global_reg_dominates_per_parameter_overrides() {
        let o = CliOverrides {
            reg: Some(0.3),
            reg_p: Some(9.0),
            reg_q: Some(8.0),
            reg_w: Some(7.0),
            ..Default::default()
        };
        let cfg = derive(&base(), &o).unwrap();
        assert_eq!(cfg.reg, Some(0.3));
        assert_eq!(cfg.reg_p, Some(0.3));
        assert_eq!(cfg.reg_q, Some(0.3));
        assert_eq!(cfg.reg_w, Some(0.3));
    }

    #[test]
    fn per_parameter_override_beats_base_value() {
        let o = CliOverrides {
            reg_q: Some(0.05),
            ..Default::default()
        };
        let cfg = derive(&base(), &o).unwrap();
        assert_eq!(cfg.reg_p, Some(0.5));
        assert_eq!(cfg.reg_q, Some(0.05));
        assert_eq!(cfg.reg_w, Some(0.7));
    }

    #[test]
    fn scalar_overrides_replace_base_values() {
        let o = CliOverrides {
            k: Some(20),
            max_iters: Some(3),
            eps: Some(1e-3),
            eta: Some(0.2),
            bias_eta: Some(0.02),
            initial: Some(0.1),
            nnl: Some(2),
            ..Default::default()
        };
        let cfg = derive(&base(), &o).unwrap();
        assert_eq!(cfg.k, Some(20));
        assert_eq!(cfg.max_iters, Some(3));
        assert_eq!(cfg.eps, 1e-3);
        assert_eq!(cfg.eta, 0.2);
        assert_eq!(cfg.bias_eta, 0.02);
        assert_eq!(cfg.initial, 0.1);
        assert_eq!(cfg.nnl, Some(2));
    }

    #[test]
    fn same_second_derivations_share_exp_id() {
        let now = at(1_700_000_000);
        let a = derive_at(&base(), &CliOverrides::default(), now).unwrap();
        let b = derive_at(&base(), &CliOverrides::default(), now).unwrap();
        assert_eq!(a.exp_id, b.exp_id);
    }

    #[test]
    fn split_copy_rewrites_only_paths() {
        let cfg = derive(&base(), &CliOverrides::default()).unwrap();
        let round = cfg.for_split(3);
        assert_eq!(round.data_dir, "data/ml100k/exp_split/3/");
        assert_eq!(round.train_filename.as_deref(), Some("ratings_train_3.txt"));
        assert_eq!(round.test_filename.as_deref(), Some("ratings_test_3.txt"));
        assert_eq!(round.exp_id, cfg.exp_id);
        assert_eq!(round.reg_p, cfg.reg_p);
        // 元の設定は変更されない
        assert_eq!(cfg.data_dir, "data/ml100k/ratings/");
    }

    #[test]
    fn loads_yaml_and_json_documents() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("exp.yaml");
        std::fs::write(&yaml, BASE).unwrap();
        let b = BaseConfig::load(&yaml).unwrap();
        assert_eq!(b.get("dt"), Some(&Value::String("ml100k".into())));
        assert!(b.get("config_filename").is_some());

        let json = dir.path().join("exp.json");
        let mut f = std::fs::File::create(&json).unwrap();
        write!(
            f,
            r#"{{"dt":"yelp","data_dir":"data/dt/","meta_graphs":["a","b"],"F":5,"eps":"1e-5","initial":0.1,"eta":0.01,"bias_eta":0.01}}"#
        )
        .unwrap();
        drop(f);
        let cfg = derive(&BaseConfig::load(&json).unwrap(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.n, 20);
        assert_eq!(cfg.data_dir, "data/yelp/");
        assert_eq!(cfg.config_filename, Some(json.display().to_string()));
    }

    #[test]
    fn malformed_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "dt: [unclosed\n").unwrap();
        let err = BaseConfig::load(&path).unwrap_err();
        assert!(matches!(err, ExpError::MalformedConfigFile { .. }), "{err:?}");
    }

    #[test]
    fn log_string_contains_resolved_fields() {
        let cfg = derive_at(&base(), &CliOverrides::default(), at(42)).unwrap();
        let text = cfg.to_log_string();
        assert!(text.contains("exp_id: 42"));
        assert!(text.contains("N: 80"));
        assert!(text.contains("solver: sgd"));
    }
}
