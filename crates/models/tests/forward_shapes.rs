use burn::backend::Autodiff;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::backbone::ResNetBackbone;
use models::{
    BackboneConfig, DoubleCnnLstm, DoubleCnnLstmConfig, DummyModel, DummyModelConfig, ModelError,
    SequenceRegressor,
};

// CPU backend keeps these checks runnable without a GPU.
type ADBackend = Autodiff<NdArray<f32>>;

fn small_config(target_count: usize, meta_dim: usize) -> DoubleCnnLstmConfig {
    DoubleCnnLstmConfig {
        target_count,
        meta_dim,
        backbone: BackboneConfig {
            stem_channels: 4,
            stage_channels: vec![4, 8],
            blocks_per_stage: 1,
        },
        frame_features: 16,
        lstm_hidden: 8,
        summary_features: 4,
        ..Default::default()
    }
}

fn random_batch(
    batch: usize,
    seq: usize,
    size: usize,
    meta_dim: usize,
    device: &<ADBackend as burn::tensor::backend::Backend>::Device,
) -> (Tensor<ADBackend, 2>, Tensor<ADBackend, 5>) {
    let metas = Tensor::random([batch, meta_dim], Distribution::Uniform(-1.0, 1.0), device);
    let images = Tensor::random(
        [batch, seq, size, size, 5],
        Distribution::Uniform(0.0, 255.0),
        device,
    );
    (metas, images)
}

#[test]
fn double_cnn_lstm_outputs_one_value_per_offset() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = DoubleCnnLstm::<ADBackend>::new(&small_config(3, 4), &device).unwrap();
    let (metas, images) = random_batch(2, 6, 16, 4, &device);

    let out = model.forward(metas, images).unwrap();
    assert_eq!(out.dims(), [2, 3]);
    assert_eq!(model.target_count(), 3);
}

#[test]
fn default_head_clamps_predictions_non_negative() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = DoubleCnnLstm::<ADBackend>::new(&small_config(4, 3), &device).unwrap();
    let (metas, images) = random_batch(3, 2, 16, 3, &device);

    let out = model.forward(metas * 100.0, images).unwrap();
    let values = out.into_data().to_vec::<f32>().unwrap();
    assert!(values.iter().all(|v| *v >= 0.0), "negative prediction in {values:?}");
}

#[test]
fn nan_imagery_fails_before_prediction() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = DoubleCnnLstm::<ADBackend>::new(&small_config(2, 3), &device).unwrap();
    let (metas, _) = random_batch(2, 2, 8, 3, &device);

    let mut pixels = vec![10.0f32; 2 * 2 * 8 * 8 * 5];
    pixels[123] = f32::NAN;
    let images =
        Tensor::<ADBackend, 1>::from_floats(pixels.as_slice(), &device).reshape([2, 2, 8, 8, 5]);

    match model.forward(metas, images) {
        Err(ModelError::NanInput { count }) => assert_eq!(count, 1),
        other => panic!("expected NanInput, got {other:?}"),
    }
}

#[test]
fn metadata_width_is_checked() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = DoubleCnnLstm::<ADBackend>::new(&small_config(2, 3), &device).unwrap();
    assert_eq!(model.meta_dim(), 3);
    let (metas, images) = random_batch(2, 2, 8, 5, &device);
    assert!(matches!(
        model.forward(metas, images),
        Err(ModelError::MetadataMismatch {
            expected: 3,
            actual: 5
        })
    ));
}

#[test]
fn zero_targets_rejected() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let err = DoubleCnnLstm::<ADBackend>::new(&small_config(0, 3), &device).unwrap_err();
    assert!(matches!(err, ModelError::InvalidConfig(_)));
}

#[test]
fn pretrained_backbone_weights_are_loaded() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let tmp = tempfile::tempdir().unwrap();
    let weights = tmp.path().join("backbone.bin");

    let cfg = small_config(2, 3);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    ResNetBackbone::<ADBackend>::new(&cfg.backbone, 3, &device)
        .save_file(weights.clone(), &recorder)
        .expect("save backbone");

    let cfg = DoubleCnnLstmConfig {
        backbone_weights: Some(weights),
        ..cfg
    };
    let model = DoubleCnnLstm::<ADBackend>::new(&cfg, &device).unwrap();
    let (metas, images) = random_batch(1, 2, 16, 3, &device);
    assert_eq!(model.forward(metas, images).unwrap().dims(), [1, 2]);
}

#[test]
fn missing_backbone_weights_is_a_checkpoint_error() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let cfg = DoubleCnnLstmConfig {
        backbone_weights: Some("/no/such/backbone.bin".into()),
        ..small_config(2, 3)
    };
    let err = DoubleCnnLstm::<ADBackend>::new(&cfg, &device).unwrap_err();
    assert!(matches!(err, ModelError::Checkpoint { .. }));
}

#[test]
fn dummy_model_shapes_and_nan_guard() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = DummyModel::<ADBackend>::new(
        &DummyModelConfig {
            target_count: 2,
            meta_dim: 3,
            ..Default::default()
        },
        &device,
    )
    .unwrap();
    let (metas, images) = random_batch(4, 6, 8, 3, &device);
    let out = model.forward(metas.clone(), images.clone()).unwrap();
    assert_eq!(out.dims(), [4, 2]);

    let nan_images = images.mask_fill(
        Tensor::<ADBackend, 5>::ones([4, 6, 8, 8, 5], &device).equal_elem(1.0),
        f32::NAN,
    );
    assert!(matches!(
        model.forward(metas, nan_images),
        Err(ModelError::NanInput { .. })
    ));
}
