//! 評価値ファイルと参照モデルによる協調者

use fmg_core::{Backend, ExpError, ExpResult, ModelVariant, ResolvedConfig, TrainableModel};

use crate::ratings::{data_paths, RatingsData, UserRows};
use crate::trainer::{Hyper, LatentFactorModel};

/// `run_exp` が使う協調者
#[derive(Clone, Copy, Debug, Default)]
pub struct RatingsBackend;

fn load(config: &ResolvedConfig) -> ExpResult<RatingsData> {
    RatingsData::load(config).map_err(|e| ExpError::DataLoad {
        path: data_paths(config).0,
        source: e.into(),
    })
}

impl Backend for RatingsBackend {
    type Standard = RatingsData;
    type Alternate = UserRows;

    fn load_standard(&self, config: &ResolvedConfig) -> ExpResult<RatingsData> {
        load(config)
    }

    fn load_alternate(&self, config: &ResolvedConfig) -> ExpResult<UserRows> {
        Ok(load(config)?.into_user_rows())
    }

    fn standard_model<'a>(
        &self,
        variant: ModelVariant,
        config: &ResolvedConfig,
        data: &'a RatingsData,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>> {
        let hyper = Hyper::from_config(config);
        Ok(Box::new(LatentFactorModel::on_ratings(variant, hyper, data)))
    }

    fn alternate_model<'a>(
        &self,
        variant: ModelVariant,
        config: &ResolvedConfig,
        data: &'a UserRows,
    ) -> ExpResult<Box<dyn TrainableModel + 'a>> {
        let hyper = Hyper::from_config(config);
        Ok(Box::new(LatentFactorModel::on_user_rows(variant, hyper, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmg_core::{BaseConfig, CliOverrides, RunMode, RunLog, dispatch, run_log::MemorySink};

    fn config_for(dir: &std::path::Path) -> ResolvedConfig {
        let text = format!(
            "dt: dt\ndata_dir: {}\nmeta_graphs: [a]\nF: 2\nK: 2\nmax_iters: 4\neps: 0\ninitial: 0.1\neta: 0.02\nbias_eta: 0.02\nreg: 0.01\n",
            dir.display()
        );
        fmg_core::derive(&BaseConfig::from_yaml_str(&text).unwrap(), &CliOverrides::default())
            .unwrap()
    }

    #[test]
    fn missing_files_are_reported_as_data_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = RatingsBackend.load_standard(&config_for(dir.path())).unwrap_err();
        match err {
            ExpError::DataLoad { path, .. } => {
                assert_eq!(path, dir.path().join("ratings_train.txt"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn dispatches_nuclear_norm_mode_over_user_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ratings_train.txt"), "a x 5\na y 1\nb x 4\nb y 2\n")
            .unwrap();
        std::fs::write(dir.path().join("ratings_test.txt"), "a x 5\nb y 2\n").unwrap();
        let sink = MemorySink::new();
        let mut log = RunLog::from_writer(sink.clone());
        let reports =
            dispatch(&config_for(dir.path()), RunMode::NuclearNormFm, &RatingsBackend, &mut log)
                .unwrap();
        assert_eq!(reports[0].iterations, 4);
        assert!(sink.contents().contains("fm_glasso_nn finish"));
    }
}
