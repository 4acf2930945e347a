//! 参照用の潜在因子モデル
//!
//! 予測値は `mu + b_u + b_i + p_u·q_i`（1次モデルは因子項なし）。
//! エポックごとに SGD で更新し、正則化の種類に応じた近接写像をかけてから
//! テストデータの RMSE / MAE を記録する。

use anyhow::{bail, Result};
use fmg_core::{BoxError, ModelVariant, ResolvedConfig, TrainableModel};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::ratings::{Rating, RatingsData, UserRows};

pub const DEFAULT_K: u64 = 8;
pub const DEFAULT_MAX_ITERS: u64 = 30;
pub const DEFAULT_SEED: u64 = 42;
/// 非凸ペナルティの平滑化定数
const NON_CONVEX_GAMMA: f64 = 1.0;
const MIN_GROUP_NORM: f64 = 1e-12;

/// 因子行列にかける正則化
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Penalty {
    /// 二乗ノルム（勾配に含める）
    Frobenius,
    /// 行（ユーザ・アイテム）単位の group lasso
    GroupLasso,
    /// 行単位の再重み付け group lasso
    NonConvex,
    /// 潜在次元（列）単位の group lasso
    NuclearGroupLasso,
}

impl Penalty {
    /// モデル種別 → (正則化, 1次モデルか)
    pub fn for_variant(variant: ModelVariant) -> (Self, bool) {
        match variant {
            ModelVariant::AnovaGlasso | ModelVariant::GlassoSecondOrder => {
                (Penalty::GroupLasso, false)
            }
            ModelVariant::GlassoFirstOrder => (Penalty::GroupLasso, true),
            ModelVariant::AnovaFnorm => (Penalty::Frobenius, false),
            ModelVariant::NonConvex => (Penalty::NonConvex, false),
            ModelVariant::NuclearNormGlasso => (Penalty::NuclearGroupLasso, false),
        }
    }
}

/// 学習ハイパーパラメータ
#[derive(Clone, Debug, PartialEq)]
pub struct Hyper {
    pub k: usize,
    pub max_iters: usize,
    pub eta: f64,
    pub bias_eta: f64,
    pub initial: f64,
    pub eps: f64,
    pub reg_p: f64,
    pub reg_q: f64,
    pub reg_w: f64,
    /// 列単位 group lasso の係数
    pub reg: f64,
    pub seed: u64,
}

impl Hyper {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let seed = config
            .extra
            .get("seed")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_SEED);
        Self {
            k: config.k.unwrap_or(DEFAULT_K) as usize,
            max_iters: config.max_iters.unwrap_or(DEFAULT_MAX_ITERS) as usize,
            eta: config.eta,
            bias_eta: config.bias_eta,
            initial: config.initial,
            eps: config.eps,
            reg_p: config.reg_p.unwrap_or(0.0),
            reg_q: config.reg_q.unwrap_or(0.0),
            reg_w: config.reg_w.unwrap_or(0.0),
            reg: config.reg.or(config.reg_p).unwrap_or(0.0),
            seed,
        }
    }
}

enum TrainSet<'a> {
    Flat(&'a [Rating]),
    Rows(&'a [Vec<(usize, f64)>]),
}

/// 参照モデル本体
pub struct LatentFactorModel<'a> {
    variant: ModelVariant,
    hyper: Hyper,
    penalty: Penalty,
    first_order: bool,
    train: TrainSet<'a>,
    test: &'a [Rating],
    mu: f64,
    lo: f64,
    hi: f64,
    bu: Vec<f64>,
    bi: Vec<f64>,
    p: Vec<f64>,
    q: Vec<f64>,
    rng: ChaCha8Rng,
    rmses: Vec<f64>,
    maes: Vec<f64>,
}

impl<'a> LatentFactorModel<'a> {
    pub fn on_ratings(variant: ModelVariant, hyper: Hyper, data: &'a RatingsData) -> Self {
        let values: Vec<f64> = data.train.iter().map(|r| r.value).collect();
        Self::new(
            variant,
            hyper,
            TrainSet::Flat(&data.train),
            &data.test,
            &values,
            data.n_users,
            data.n_items,
        )
    }

    pub fn on_user_rows(variant: ModelVariant, hyper: Hyper, data: &'a UserRows) -> Self {
        let values: Vec<f64> = data.rows.iter().flatten().map(|&(_, v)| v).collect();
        Self::new(
            variant,
            hyper,
            TrainSet::Rows(&data.rows),
            &data.test,
            &values,
            data.n_users,
            data.n_items,
        )
    }

    fn new(
        variant: ModelVariant,
        hyper: Hyper,
        train: TrainSet<'a>,
        test: &'a [Rating],
        values: &[f64],
        n_users: usize,
        n_items: usize,
    ) -> Self {
        let (penalty, first_order) = Penalty::for_variant(variant);
        let mut rng = ChaCha8Rng::seed_from_u64(hyper.seed);
        let k = if first_order { 0 } else { hyper.k };
        let mut init = |n: usize| -> Vec<f64> {
            (0..n).map(|_| hyper.initial * rng.random_range(-1.0..1.0)).collect()
        };
        let p = init(n_users * k);
        let q = init(n_items * k);
        let (mu, lo, hi) = if values.is_empty() {
            (0.0, f64::NEG_INFINITY, f64::INFINITY)
        } else {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (values.iter().sum::<f64>() / values.len() as f64, lo, hi)
        };
        Self {
            variant,
            hyper: Hyper { k, ..hyper },
            penalty,
            first_order,
            train,
            test,
            mu,
            lo,
            hi,
            bu: vec![0.0; n_users],
            bi: vec![0.0; n_items],
            p,
            q,
            rng,
            rmses: Vec::new(),
            maes: Vec::new(),
        }
    }

    pub fn predict(&self, user: usize, item: usize) -> f64 {
        let k = self.hyper.k;
        let dot: f64 = self.p[user * k..(user + 1) * k]
            .iter()
            .zip(&self.q[item * k..(item + 1) * k])
            .map(|(a, b)| a * b)
            .sum();
        (self.mu + self.bu[user] + self.bi[item] + dot).clamp(self.lo, self.hi)
    }

    fn sgd_step(&mut self, user: usize, item: usize, value: f64) {
        let h = &self.hyper;
        let err = value - self.predict(user, item);
        self.bu[user] += h.bias_eta * (err - h.reg_w * self.bu[user]);
        self.bi[item] += h.bias_eta * (err - h.reg_w * self.bi[item]);
        if self.first_order {
            return;
        }
        let (l2p, l2q) = match self.penalty {
            Penalty::Frobenius => (h.reg_p, h.reg_q),
            _ => (0.0, 0.0),
        };
        let k = h.k;
        for f in 0..k {
            let pu = self.p[user * k + f];
            let qi = self.q[item * k + f];
            self.p[user * k + f] += h.eta * (err * qi - l2p * pu);
            self.q[item * k + f] += h.eta * (err * pu - l2q * qi);
        }
    }

    fn epoch(&mut self) {
        match self.train {
            TrainSet::Flat(ratings) => {
                let mut order: Vec<usize> = (0..ratings.len()).collect();
                order.shuffle(&mut self.rng);
                for idx in order {
                    let r = ratings[idx];
                    self.sgd_step(r.user, r.item, r.value);
                }
            }
            TrainSet::Rows(rows) => {
                let mut users: Vec<usize> = (0..rows.len()).collect();
                users.shuffle(&mut self.rng);
                for u in users {
                    for &(item, value) in &rows[u] {
                        self.sgd_step(u, item, value);
                    }
                }
            }
        }
        if !self.first_order {
            self.proximal();
        }
    }

    /// エポック末の近接写像
    fn proximal(&mut self) {
        let k = self.hyper.k;
        let eta = self.hyper.eta;
        match self.penalty {
            Penalty::Frobenius => {}
            Penalty::GroupLasso => {
                shrink_rows(&mut self.p, k, |_| eta * self.hyper.reg_p);
                shrink_rows(&mut self.q, k, |_| eta * self.hyper.reg_q);
            }
            Penalty::NonConvex => {
                // ノルムの小さい行ほど強く縮める
                let weight = |norm: f64| NON_CONVEX_GAMMA / (norm + NON_CONVEX_GAMMA);
                shrink_rows(&mut self.p, k, |n| eta * self.hyper.reg_p * weight(n));
                shrink_rows(&mut self.q, k, |n| eta * self.hyper.reg_q * weight(n));
            }
            Penalty::NuclearGroupLasso => {
                let threshold = eta * self.hyper.reg;
                for f in 0..k {
                    let norm = column_norm(&self.p, k, f).hypot(column_norm(&self.q, k, f));
                    let scale = shrink_factor(norm, threshold);
                    scale_column(&mut self.p, k, f, scale);
                    scale_column(&mut self.q, k, f, scale);
                }
            }
        }
    }

    fn evaluate(&self) -> (f64, f64) {
        let mut se = 0.0;
        let mut ae = 0.0;
        for r in self.test {
            let e = r.value - self.predict(r.user, r.item);
            se += e * e;
            ae += e.abs();
        }
        let n = self.test.len() as f64;
        ((se / n).sqrt(), ae / n)
    }

    fn train_set_len(&self) -> usize {
        match self.train {
            TrainSet::Flat(r) => r.len(),
            TrainSet::Rows(rows) => rows.iter().map(Vec::len).sum(),
        }
    }

    pub fn fit(&mut self) -> Result<()> {
        if self.train_set_len() == 0 {
            bail!("no training ratings");
        }
        if self.test.is_empty() {
            bail!("no test ratings");
        }
        log::info!(
            "{}: {} train ratings, K={}, max_iters={}, eta={}, bias_eta={}",
            self.variant.label(),
            self.train_set_len(),
            self.hyper.k,
            self.hyper.max_iters,
            self.hyper.eta,
            self.hyper.bias_eta
        );

        let progress = ProgressBar::new(self.hyper.max_iters as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} rmse:{msg}")
                .expect("valid template"),
        );

        for iter in 0..self.hyper.max_iters {
            self.epoch();
            let (rmse, mae) = self.evaluate();
            if !rmse.is_finite() {
                progress.abandon();
                bail!("{} diverged at iteration {}", self.variant.label(), iter + 1);
            }
            log::debug!("iter={} rmse={rmse:.6} mae={mae:.6}", iter + 1);
            self.rmses.push(rmse);
            self.maes.push(mae);
            progress.set_message(format!("{rmse:.4}"));
            progress.inc(1);

            if let [.., prev, last] = self.rmses[..] {
                if (prev - last).abs() < self.hyper.eps {
                    log::info!("converged at iteration {} (|Δrmse| < {})", iter + 1, self.hyper.eps);
                    break;
                }
            }
        }
        progress.finish_and_clear();
        Ok(())
    }
}

fn shrink_factor(norm: f64, threshold: f64) -> f64 {
    if norm < MIN_GROUP_NORM {
        0.0
    } else {
        (1.0 - threshold / norm).max(0.0)
    }
}

fn shrink_rows(m: &mut [f64], k: usize, threshold: impl Fn(f64) -> f64) {
    if k == 0 {
        return;
    }
    for row in m.chunks_mut(k) {
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        let scale = shrink_factor(norm, threshold(norm));
        row.iter_mut().for_each(|v| *v *= scale);
    }
}

fn column_norm(m: &[f64], k: usize, f: usize) -> f64 {
    m.iter().skip(f).step_by(k).map(|v| v * v).sum::<f64>().sqrt()
}

fn scale_column(m: &mut [f64], k: usize, f: usize, scale: f64) {
    m.iter_mut().skip(f).step_by(k).for_each(|v| *v *= scale);
}

impl TrainableModel for LatentFactorModel<'_> {
    fn train(&mut self) -> Result<(), BoxError> {
        self.fit().map_err(Into::into)
    }

    fn eval_res(&self) -> (&[f64], &[f64]) {
        (&self.rmses, &self.maes)
    }
}
