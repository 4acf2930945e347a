//! 実行モード（数値コード 1..=9）とモデル種別の対応表

use std::fmt;

use serde::Serialize;

use crate::error::{ExpError, ExpResult};

/// 学習させるモデルの種別（正則化・カーネルの違い）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// ANOVA カーネル FM + group lasso
    AnovaGlasso,
    /// ANOVA カーネル FM + Frobenius ノルム
    AnovaFnorm,
    /// 合成データ用 group lasso（1次項のみ）
    GlassoFirstOrder,
    /// 合成データ用 group lasso（2次項まで）
    GlassoSecondOrder,
    /// 非凸正則化
    NonConvex,
    /// nuclear norm 向け group lasso
    NuclearNormGlasso,
}

impl ModelVariant {
    pub fn label(self) -> &'static str {
        match self {
            ModelVariant::AnovaGlasso => "fm_anova_kernel_glasso",
            ModelVariant::AnovaFnorm => "fm_anova_kernel",
            ModelVariant::GlassoFirstOrder => "fm_glasso_first_order",
            ModelVariant::GlassoSecondOrder => "fm_glasso_second_order",
            ModelVariant::NonConvex => "fm_non_convex_reg",
            ModelVariant::NuclearNormGlasso => "fm_glasso_nn",
        }
    }
}

/// データローダの種類
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// 通常の train/test 行列
    Standard,
    /// nuclear norm モデル用の別形式ビュー
    Alternate,
}

/// 識別子に埋め込むパラメータの分岐
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingBranch {
    /// `reg` か `reg_W`/`reg_P`
    Regularization,
    /// `bias_eta` も埋め込む
    BiasEta,
    /// `nnl` と `reg`
    NuclearNorm,
}

/// 実行モード
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunMode {
    FnormVsGlasso,
    GlassoFoSyn,
    GlassoSoSyn,
    Glasso,
    Fnorm,
    BiasEtaTune,
    NonConvexReg,
    NonConvex5Split,
    NuclearNormFm,
}

impl RunMode {
    pub const ALL: [RunMode; 9] = [
        RunMode::FnormVsGlasso,
        RunMode::GlassoFoSyn,
        RunMode::GlassoSoSyn,
        RunMode::Glasso,
        RunMode::Fnorm,
        RunMode::BiasEtaTune,
        RunMode::NonConvexReg,
        RunMode::NonConvex5Split,
        RunMode::NuclearNormFm,
    ];

    pub fn from_code(code: i64) -> ExpResult<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.code() == code)
            .ok_or(ExpError::UnknownMode(code))
    }

    pub fn code(self) -> i64 {
        match self {
            RunMode::FnormVsGlasso => 1,
            RunMode::GlassoFoSyn => 2,
            RunMode::GlassoSoSyn => 3,
            RunMode::Glasso => 4,
            RunMode::Fnorm => 5,
            RunMode::BiasEtaTune => 6,
            RunMode::NonConvexReg => 7,
            RunMode::NonConvex5Split => 8,
            RunMode::NuclearNormFm => 9,
        }
    }

    /// 識別子に埋め込む短いタグ
    pub fn tag(self) -> &'static str {
        match self {
            RunMode::FnormVsGlasso => "fnorm_vs_glasso",
            RunMode::GlassoFoSyn => "glasso_first_syn",
            RunMode::GlassoSoSyn => "glasso_second_syn",
            RunMode::Glasso => "glasso",
            RunMode::Fnorm => "fnorm",
            RunMode::BiasEtaTune => "bias_eta_tuning",
            RunMode::NonConvexReg | RunMode::NonConvex5Split => "non_con",
            RunMode::NuclearNormFm => "nn_fm",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RunMode::FnormVsGlasso => "FNORM_VS_GLASSO",
            RunMode::GlassoFoSyn => "GLASSO_FO_SYN",
            RunMode::GlassoSoSyn => "GLASSO_SO_SYN",
            RunMode::Glasso => "GLASSO",
            RunMode::Fnorm => "FNORM",
            RunMode::BiasEtaTune => "BIAS_ETA_TUNE",
            RunMode::NonConvexReg => "NON_CONVEX_REG",
            RunMode::NonConvex5Split => "NON_CONVEX_5SPLIT",
            RunMode::NuclearNormFm => "NUCLEAR_NORM_FM",
        }
    }

    pub fn naming(self) -> NamingBranch {
        match self {
            RunMode::BiasEtaTune => NamingBranch::BiasEta,
            RunMode::NuclearNormFm => NamingBranch::NuclearNorm,
            _ => NamingBranch::Regularization,
        }
    }

    pub fn loader(self) -> LoaderKind {
        match self {
            RunMode::NuclearNormFm => LoaderKind::Alternate,
            _ => LoaderKind::Standard,
        }
    }

    /// ハンドラが順に学習させるモデル
    pub fn variants(self) -> &'static [ModelVariant] {
        match self {
            RunMode::FnormVsGlasso => &[ModelVariant::AnovaGlasso, ModelVariant::AnovaFnorm],
            RunMode::GlassoFoSyn => &[ModelVariant::GlassoFirstOrder],
            RunMode::GlassoSoSyn => &[ModelVariant::GlassoSecondOrder],
            RunMode::Glasso | RunMode::BiasEtaTune => &[ModelVariant::AnovaGlasso],
            RunMode::Fnorm => &[ModelVariant::AnovaFnorm],
            RunMode::NonConvexReg | RunMode::NonConvex5Split => &[ModelVariant::NonConvex],
            RunMode::NuclearNormFm => &[ModelVariant::NuclearNormGlasso],
        }
    }

    /// 5分割交差検証としてオーケストレータに回すモードか
    pub fn is_split_sweep(self) -> bool {
        self == RunMode::NonConvex5Split
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
