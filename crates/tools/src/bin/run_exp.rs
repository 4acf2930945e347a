use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fmg_core::overrides::{parse_float, parse_int, parse_uint};
use fmg_core::{run_id, BaseConfig, CliOverrides, RegPresence, RunLog, RunMode};
use tools::common::io::write_json;
use tools::RatingsBackend;

/// meta-graph FM 実験ドライバ。設定ファイルとモード番号を受け取り、単発実験か
/// 5分割交差検証を実行する。
///
/// # よく使うコマンド例
///
/// - group lasso を1回実行（reg を全パラメータに適用）:
///   `cargo run -p tools --bin run_exp -- configs/ml100k.yaml 4 --reg 0.05`
///
/// - 非凸正則化の5分割交差検証:
///   `cargo run -p tools --bin run_exp -- configs/ml100k.yaml 8 --max_iters 200`
///
/// ログは `log/<dt>_<label>_<modeTag>_<params>.log` に書き出す。
#[derive(Parser, Debug)]
#[command(author, version, about = "Experiment driver for meta-graph FM models")]
struct Cli {
    /// Configuration document (YAML, or JSON by extension)
    config: PathBuf,

    /// Run mode code: 1=fnorm_vs_glasso 2=glasso_first_syn 3=glasso_second_syn 4=glasso
    /// 5=fnorm 6=bias_eta_tuning 7=non_con 8=non_con(5 split) 9=nn_fm
    #[arg(value_parser = parse_mode)]
    run_func: RunMode,

    /// 潜在因子数
    #[arg(short = 'K', long = "K", value_parser = parse_uint)]
    k: Option<u64>,

    /// 全パラメータ共通の正則化（指定時は reg_P/reg_Q/reg_W を上書き）
    #[arg(long, value_parser = parse_float)]
    reg: Option<f64>,

    /// regularization for P
    #[arg(long = "reg_P", value_parser = parse_float)]
    reg_p: Option<f64>,

    /// regularization for Q
    #[arg(long = "reg_Q", value_parser = parse_float)]
    reg_q: Option<f64>,

    /// regularization for W
    #[arg(long = "reg_W", value_parser = parse_float)]
    reg_w: Option<f64>,

    /// 最大反復回数
    #[arg(long = "max_iters", value_parser = parse_uint)]
    max_iters: Option<u64>,

    /// 収束判定
    #[arg(long, value_parser = parse_float)]
    eps: Option<f64>,

    /// 学習率
    #[arg(long, value_parser = parse_float)]
    eta: Option<f64>,

    /// バイアス項の学習率
    #[arg(long = "bias_eta", value_parser = parse_float)]
    bias_eta: Option<f64>,

    /// 初期値のスケール
    #[arg(long, value_parser = parse_float)]
    initial: Option<f64>,

    /// nuclear norm の lambda 種別
    #[arg(long, value_parser = parse_int)]
    nnl: Option<i64>,

    /// Additional override as KEY=VALUE (applied after the typed flags)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// Treat an explicit `reg 0` as set when naming the run log
    #[arg(long, default_value_t = false)]
    explicit_zero_reg: bool,

    /// Directory the `log/...` run identifier is resolved against
    #[arg(long, default_value = ".")]
    log_root: PathBuf,

    /// Write the aggregate report as JSON (`-` for stdout)
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

fn parse_mode(s: &str) -> Result<RunMode, String> {
    let code = s.trim().parse::<i64>().map_err(|_| format!("invalid mode code '{s}'"))?;
    RunMode::from_code(code).map_err(|e| e.to_string())
}

/// `KEY=VALUE` を分割し、キー名と値の型を検証する
fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    CliOverrides::default().set(key, value).map_err(|e| e.to_string())?;
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    fn overrides(&self) -> Result<CliOverrides> {
        let mut o = CliOverrides {
            k: self.k,
            reg: self.reg,
            reg_p: self.reg_p,
            reg_q: self.reg_q,
            reg_w: self.reg_w,
            max_iters: self.max_iters,
            eps: self.eps,
            eta: self.eta,
            bias_eta: self.bias_eta,
            initial: self.initial,
            nnl: self.nnl,
        };
        for (key, value) in &self.set {
            o.set(key, value)?;
        }
        Ok(o)
    }

    fn presence(&self) -> RegPresence {
        if self.explicit_zero_reg {
            RegPresence::Explicit
        } else {
            RegPresence::Truthy
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let overrides = cli.overrides()?;
    let base = BaseConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    let mode = cli.run_func;
    let config = fmg_core::derive(&base, &overrides)?;
    let id = run_id::build_with(&config, mode, cli.presence());
    let config = config.with_log_filename(id.as_str());

    let log_path = cli.log_root.join(&id);
    let mut log = RunLog::create(&log_path)
        .with_context(|| format!("failed to create run log {}", log_path.display()))?;
    log.section("", config.to_log_string())?;
    log::info!("exp_id={} mode={} log={}", config.exp_id, mode, log_path.display());

    let outcome = match fmg_core::run(&config, mode, &RatingsBackend, &mut log) {
        Ok(outcome) => outcome,
        Err(e) => {
            // 失敗もログファイルに残す（RunLog は drop 時に flush される）
            if let Err(write_err) = log.info(format_args!("aborted: {e}")) {
                log::warn!("failed to record abort in {}: {write_err}", log_path.display());
            }
            return Err(e).context(format!("{mode} failed"));
        }
    };

    if let Some(path) = &cli.summary_json {
        write_json(path, &outcome)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
    }
    log.close()
        .with_context(|| format!("failed to flush run log {}", log_path.display()))?;
    Ok(())
}
