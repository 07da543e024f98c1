use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::AutodiffModule;
use burn_dataset::{DataframeSpec, LoaderOptions, SampleShape, SequenceDataset};
use clap::{Parser, ValueEnum};
use data_contracts::{DatasetTuning, TrainConfig, UserConfig};
use models::SequenceRegressor;

use crate::checkpoint::{default_checkpoint_path, save_checkpoint};
use crate::factory::{ModelFactory, ModelKind, RegressionModel};
use crate::trainer::{Trainer, TrainerConfig};
use crate::ADBackend;

/// Metadata width of `--synthetic` samples.
pub const SYNTHETIC_META_DIM: usize = 3;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Train a sequence regressor on satellite image sequences"
)]
pub struct TrainArgs {
    /// Training configuration file (JSON).
    pub config: PathBuf,
    /// Number of epochs.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub num_epochs: usize,
    /// Model to train (DoubleCnnLstm or DummyModel).
    #[arg(short = 'm', long, default_value = "DummyModel")]
    pub model_name: String,
    /// Optional user configuration (JSON or TOML) with per-model sections.
    #[arg(short = 'u', long)]
    pub user_config: Option<PathBuf>,
    /// Scratch directory for the sequence cache (defaults to the working directory).
    #[arg(short = 's', long)]
    pub scratch_dir: Option<PathBuf>,
    /// Apply gradient updates; `false` runs loss-only passes.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub training: bool,
    /// Materialise samples in the on-disk sequence cache and shuffle them.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub use_cache: bool,
    /// Learning rate.
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Log the running loss every N batches.
    #[arg(long, default_value_t = 1000)]
    pub log_every: usize,
    /// Checkpoint output path (defaults to checkpoints/<model>.bin).
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Train on N synthetic samples instead of the dataframe.
    #[arg(long)]
    pub synthetic: Option<usize>,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;

    let cfg = TrainConfig::from_path(&args.config)?;
    let user = UserConfig::load(args.user_config.as_deref())?;
    let tuning = user.dataset_tuning()?;
    let kind: ModelKind = args.model_name.parse()?;

    let options = loader_options(&cfg, &tuning, args.use_cache);
    let dataset = match args.synthetic {
        Some(samples) => {
            let shape = SampleShape::new(
                tuning.sequence_length,
                tuning.image_size,
                SYNTHETIC_META_DIM,
                cfg.target_count(),
            );
            log::info!("using {samples} synthetic samples");
            SequenceDataset::synthetic(shape, samples, options)?
        }
        None => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            let path = cfg.resolve_dataframe_path(&cwd)?;
            let spec = DataframeSpec {
                path,
                stations: cfg.stations.clone(),
                target_count: cfg.target_count(),
                sequence_length: tuning.sequence_length,
                image_size: tuning.image_size,
            };
            let cache_root = args.use_cache.then(|| args.scratch_dir.clone().unwrap_or(cwd));
            let (dataset, summary) =
                SequenceDataset::from_dataframe(&spec, cache_root.as_deref(), options)?;
            log::debug!("dataframe summary: {summary:?}");
            dataset
        }
    };
    log::info!(
        "dataset: {} samples, {} batches/epoch, shape {:?}",
        dataset.len(),
        dataset.num_batches(),
        dataset.shape()
    );

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let factory = ModelFactory::new(cfg.target_count(), dataset.shape().meta_dim, &user);
    let trainer = Trainer::new(TrainerConfig {
        epochs: args.num_epochs,
        learning_rate: args.lr,
        log_every: args.log_every,
        training: args.training,
    });
    let ckpt_path = args
        .checkpoint_out
        .clone()
        .unwrap_or_else(|| default_checkpoint_path(kind));

    match factory.build_kind::<ADBackend>(kind, &device)? {
        RegressionModel::DoubleCnnLstm(model) => {
            fit_and_save(&trainer, model, &dataset, &device, &ckpt_path)
        }
        RegressionModel::Dummy(model) => {
            fit_and_save(&trainer, model, &dataset, &device, &ckpt_path)
        }
    }
}

/// Batch policy for a run. Only cached runs shuffle; `--use-cache false`
/// walks the dataframe in file order.
pub fn loader_options(cfg: &TrainConfig, tuning: &DatasetTuning, use_cache: bool) -> LoaderOptions {
    LoaderOptions {
        batch_size: cfg.batch_size,
        shuffle_buffer: use_cache.then_some(cfg.buffer_size),
        seed: tuning.seed,
        drop_last: tuning.drop_last,
    }
}

fn fit_and_save<M>(
    trainer: &Trainer,
    model: M,
    dataset: &SequenceDataset,
    device: &<ADBackend as burn::tensor::backend::Backend>::Device,
    ckpt_path: &Path,
) -> anyhow::Result<()>
where
    M: SequenceRegressor<ADBackend> + AutodiffModule<ADBackend>,
{
    let (model, report) = trainer.fit::<ADBackend, M>(model, dataset, device)?;
    if let Some(loss) = report.final_loss() {
        log::info!(
            "finished {} epoch(s), {} loss evaluations, final mean loss {loss:.6}",
            report.epochs.len(),
            report.loss_evaluations
        );
    }
    let written = save_checkpoint::<ADBackend, M>(&model, ckpt_path)?;
    log::info!("saved checkpoint to {}", written.display());
    Ok(())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose nd-array backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = TrainArgs::try_parse_from(["train", "cfg.json"]).unwrap();
        assert_eq!(args.config, PathBuf::from("cfg.json"));
        assert_eq!(args.num_epochs, 100);
        assert_eq!(args.model_name, "DummyModel");
        assert!(args.training);
        assert!(args.use_cache);
        assert_eq!(args.log_every, 1000);
        assert_eq!(args.backend, BackendKind::NdArray);
        assert!(args.user_config.is_none() && args.scratch_dir.is_none());
    }

    #[test]
    fn cli_accepts_short_flags_and_explicit_bools() {
        let args = TrainArgs::try_parse_from([
            "train",
            "cfg.json",
            "-n",
            "3",
            "-m",
            "double_cnn_lstm",
            "-u",
            "user.toml",
            "-s",
            "/tmp/scratch",
            "--training",
            "false",
            "--use-cache",
            "false",
        ])
        .unwrap();
        assert_eq!(args.num_epochs, 3);
        assert_eq!(args.model_name, "double_cnn_lstm");
        assert_eq!(args.user_config, Some(PathBuf::from("user.toml")));
        assert_eq!(args.scratch_dir, Some(PathBuf::from("/tmp/scratch")));
        assert!(!args.training);
        assert!(!args.use_cache);
    }

    #[test]
    fn missing_config_path_is_a_usage_error() {
        assert!(TrainArgs::try_parse_from(["train"]).is_err());
    }

    #[test]
    fn shuffle_buffer_follows_the_cache_flag() {
        let cfg = TrainConfig::from_slice(
            br#"{"dataframe_path": "df.jsonl", "stations": ["BND"], "target_time_offsets": ["P0D"], "batch_size": 4, "buffer_size": 16}"#,
        )
        .unwrap();
        let tuning = DatasetTuning {
            seed: Some(9),
            drop_last: true,
            ..DatasetTuning::default()
        };

        let cached = loader_options(&cfg, &tuning, true);
        assert_eq!(cached.shuffle_buffer, Some(16));
        assert_eq!(cached.batch_size, 4);
        assert_eq!(cached.seed, Some(9));
        assert!(cached.drop_last);

        let direct = loader_options(&cfg, &tuning, false);
        assert_eq!(direct.shuffle_buffer, None);
        assert_eq!(direct.batch_size, 4);
    }

    #[cfg(not(feature = "backend-wgpu"))]
    #[test]
    fn wgpu_requires_the_feature() {
        assert!(validate_backend_choice(BackendKind::Wgpu).is_err());
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }
}
