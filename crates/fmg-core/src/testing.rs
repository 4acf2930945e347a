//! テスト用の協調者

use std::cell::{Cell, RefCell};

use crate::config::{derive, BaseConfig, ResolvedConfig};
use crate::dispatch::{Backend, TrainableModel};
use crate::error::{BoxError, ExpResult};
use crate::mode::ModelVariant;
use crate::overrides::CliOverrides;

pub(crate) fn config() -> ResolvedConfig {
    let text = "dt: ml100k\ndata_dir: data/dt/\nmeta_graphs: [a, b]\nF: 10\neps: 1e-6\ninitial: 0.1\neta: 0.01\nbias_eta: 0.005\nreg: 0.1\nlog_filename: exp\n";
    derive(&BaseConfig::from_yaml_str(text).unwrap(), &CliOverrides::default()).unwrap()
}

/// 呼び出しを記録する協調者
#[derive(Default)]
pub(crate) struct FakeBackend {
    calls: RefCell<Vec<String>>,
    train_files: RefCell<Vec<String>>,
    series: Option<(Vec<f64>, Vec<f64>)>,
    per_round: bool,
    fail_on: Option<usize>,
    built: Cell<usize>,
}

impl FakeBackend {
    pub(crate) fn with_series(rmses: Vec<f64>, maes: Vec<f64>) -> Self {
        Self {
            series: Some((rmses, maes)),
            ..Default::default()
        }
    }

    /// ラウンド r で RMSE 0.1*r, MAE 0.05*r を返す
    pub(crate) fn per_round() -> Self {
        Self {
            per_round: true,
            ..Default::default()
        }
    }

    /// n 番目（1 始まり）に作られたモデルの学習を失敗させる
    pub(crate) fn failing_on(n: usize) -> Self {
        Self {
            fail_on: Some(n),
            ..Self::per_round()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub(crate) fn loaded_train_files(&self) -> Vec<String> {
        self.train_files.borrow().clone()
    }

    fn round_of(&self, config: &ResolvedConfig) -> f64 {
        if let Some(name) = &config.train_filename {
            self.train_files.borrow_mut().push(name.clone());
        }
        config
            .train_filename
            .as_deref()
            .and_then(|s| s.trim_start_matches("ratings_train_").trim_end_matches(".txt").parse().ok())
            .unwrap_or(1.0)
    }

    fn model(&self, variant: ModelVariant, round: f64) -> FakeModel {
        let n = self.built.get() + 1;
        self.built.set(n);
        let (rmses, maes) = match (&self.series, self.per_round) {
            (Some(series), _) => series.clone(),
            (None, true) => (vec![0.1 * round], vec![0.05 * round]),
            (None, false) => (vec![1.0, 0.9, 0.8], vec![0.5, 0.4, 0.3]),
        };
        FakeModel {
            variant,
            fail: self.fail_on == Some(n),
            trained: false,
            rmses,
            maes,
        }
    }
}

pub(crate) struct FakeModel {
    variant: ModelVariant,
    fail: bool,
    trained: bool,
    rmses: Vec<f64>,
    maes: Vec<f64>,
}

impl TrainableModel for FakeModel {
    fn train(&mut self) -> Result<(), BoxError> {
        if self.fail {
            return Err(format!("{} diverged", self.variant.label()).into());
        }
        self.trained = true;
        Ok(())
    }

    fn eval_res(&self) -> (&[f64], &[f64]) {
        assert!(self.trained, "eval_res before train");
        (&self.rmses, &self.maes)
    }
}

impl Backend for FakeBackend {
    type Standard = f64;
    type Alternate = f64;

    fn load_standard(&self, config: &ResolvedConfig) -> ExpResult<f64> {
        self.calls.borrow_mut().push("load_standard".to_string());
        Ok(self.round_of(config))
    }

    fn load_alternate(&self, config: &ResolvedConfig) -> ExpResult<f64> {
        self.calls.borrow_mut().push("load_alternate".to_string());
        Ok(self.round_of(config))
    }

    fn standard_model<'a>(
        &self,
        variant: ModelVariant,
        _config: &ResolvedConfig,
        data: &'a f64,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>> {
        self.calls.borrow_mut().push(format!("standard_model:{}", variant.label()));
        Ok(Box::new(self.model(variant, *data)))
    }

    fn alternate_model<'a>(
        &self,
        variant: ModelVariant,
        _config: &ResolvedConfig,
        data: &'a f64,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>> {
        self.calls.borrow_mut().push(format!("alternate_model:{}", variant.label()));
        Ok(Box::new(self.model(variant, *data)))
    }
}
