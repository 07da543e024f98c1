//! Name-to-model resolution for the `--model-name` flag.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use data_contracts::{ConfigError, UserConfig};
use models::{DoubleCnnLstm, DoubleCnnLstmConfig, DummyModel, DummyModelConfig, ModelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown model `{name}` (known: {known})")]
    UnknownModel { name: String, known: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build {kind}: {source}")]
    Build {
        kind: ModelKind,
        #[source]
        source: ModelError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    DoubleCnnLstm,
    DummyModel,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::DoubleCnnLstm, ModelKind::DummyModel];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::DoubleCnnLstm => "DoubleCnnLstm",
            ModelKind::DummyModel => "DummyModel",
        }
    }

    /// User config section holding this model's hyper-parameters.
    pub fn section(self) -> &'static str {
        match self {
            ModelKind::DoubleCnnLstm => "double_cnn_lstm",
            ModelKind::DummyModel => "dummy_model",
        }
    }

    fn known() -> String {
        Self::ALL
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = FactoryError;

    /// Accepts `DoubleCnnLstm` / `double_cnn_lstm` style names, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|k| k.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| FactoryError::UnknownModel {
                name: s.to_string(),
                known: Self::known(),
            })
    }
}

/// A constructed model, ready to hand to the trainer.
#[derive(Debug)]
pub enum RegressionModel<B: Backend> {
    DoubleCnnLstm(DoubleCnnLstm<B>),
    Dummy(DummyModel<B>),
}

impl<B: Backend> RegressionModel<B> {
    pub fn kind(&self) -> ModelKind {
        match self {
            RegressionModel::DoubleCnnLstm(_) => ModelKind::DoubleCnnLstm,
            RegressionModel::Dummy(_) => ModelKind::DummyModel,
        }
    }
}

/// Builds models whose output width and metadata width match the dataset.
///
/// Hyper-parameters come from the user config section named after the model;
/// `target_count` and `meta_dim` always come from the factory.
#[derive(Debug, Clone)]
pub struct ModelFactory {
    target_count: usize,
    meta_dim: usize,
    user: UserConfig,
}

impl ModelFactory {
    pub fn new(target_count: usize, meta_dim: usize, user: &UserConfig) -> Self {
        Self {
            target_count,
            meta_dim,
            user: user.clone(),
        }
    }

    pub fn double_cnn_lstm_config(&self) -> Result<DoubleCnnLstmConfig, FactoryError> {
        let mut cfg: DoubleCnnLstmConfig =
            self.user.section_or_default(ModelKind::DoubleCnnLstm.section())?;
        cfg.target_count = self.target_count;
        cfg.meta_dim = self.meta_dim;
        Ok(cfg)
    }

    pub fn dummy_config(&self) -> Result<DummyModelConfig, FactoryError> {
        let mut cfg: DummyModelConfig =
            self.user.section_or_default(ModelKind::DummyModel.section())?;
        cfg.target_count = self.target_count;
        cfg.meta_dim = self.meta_dim;
        Ok(cfg)
    }

    pub fn build<B: Backend>(
        &self,
        name: &str,
        device: &B::Device,
    ) -> Result<RegressionModel<B>, FactoryError> {
        self.build_kind(name.parse()?, device)
    }

    pub fn build_kind<B: Backend>(
        &self,
        kind: ModelKind,
        device: &B::Device,
    ) -> Result<RegressionModel<B>, FactoryError> {
        let wrap = |source| FactoryError::Build { kind, source };
        let model = match kind {
            ModelKind::DoubleCnnLstm => RegressionModel::DoubleCnnLstm(
                DoubleCnnLstm::new(&self.double_cnn_lstm_config()?, device).map_err(wrap)?,
            ),
            ModelKind::DummyModel => RegressionModel::Dummy(
                DummyModel::new(&self.dummy_config()?, device).map_err(wrap)?,
            ),
        };
        log::info!(
            "built {kind} (targets={}, meta_dim={})",
            self.target_count,
            self.meta_dim
        );
        Ok(model)
    }
}
