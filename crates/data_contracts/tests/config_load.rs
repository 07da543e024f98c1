use std::fs;
use std::path::PathBuf;

use data_contracts::{ConfigError, DatasetTuning, TrainConfig, UserConfig};
use serde::Deserialize;

fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write temp config");
    path
}

#[test]
fn loads_train_config_and_resolves_absolute_dataframe() {
    let dir = tempfile::tempdir().unwrap();
    let df = write(&dir, "frames.jsonl", "");
    let cfg_path = write(
        &dir,
        "train.json",
        &format!(
            r#"{{
                "dataframe_path": "{}",
                "stations": ["BND", "TBL"],
                "target_time_offsets": ["P0DT0H0M0S", "P0DT1H0M0S"],
                "batch_size": 8
            }}"#,
            df.display()
        ),
    );
    let cfg = TrainConfig::from_path(&cfg_path).expect("load config");
    assert_eq!(cfg.stations, vec!["BND".to_string(), "TBL".to_string()]);
    assert_eq!(cfg.target_count(), 2);
    assert_eq!(cfg.batch_size, 8);
    assert_eq!(cfg.buffer_size, 1000);
    assert_eq!(cfg.resolve_dataframe_path(dir.path()).unwrap(), df);
}

#[test]
fn falls_back_to_relative_dataframe_path() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("data")).unwrap();
    let df = write(&dir, "data/frames.jsonl", "");
    let cfg = TrainConfig::from_slice(
        br#"{
            "dataframe_path": "/does/not/exist.jsonl",
            "relative_dataframe_path": "/data/frames.jsonl",
            "stations": ["BND"],
            "target_time_offsets": ["P0DT0H0M0S"]
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.resolve_dataframe_path(dir.path()).unwrap(), df);
}

#[test]
fn unresolved_dataframe_lists_tried_paths() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig::from_slice(
        br#"{
            "dataframe_path": "/does/not/exist.jsonl",
            "relative_dataframe_path": "missing.jsonl",
            "stations": ["BND"],
            "target_time_offsets": ["P0DT0H0M0S"]
        }"#,
    )
    .unwrap();
    match cfg.resolve_dataframe_path(dir.path()) {
        Err(ConfigError::DataframeNotFound { tried }) => assert_eq!(tried.len(), 2),
        other => panic!("expected DataframeNotFound, got {other:?}"),
    }
}

#[test]
fn missing_train_config_file_is_reported() {
    let err = TrainConfig::from_path(&PathBuf::from("/no/such/train.json")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn missing_stations_rejected() {
    let err = TrainConfig::from_slice(
        br#"{"dataframe_path": "a", "target_time_offsets": ["P0DT0H0M0S"]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("stations")));
}

#[derive(Debug, Deserialize, PartialEq)]
struct ModelSection {
    lstm_hidden: usize,
}

#[test]
fn user_config_sections_from_json_and_toml() {
    let dir = tempfile::tempdir().unwrap();
    let json = write(
        &dir,
        "user.json",
        r#"{"dataset": {"sequence_length": 4}, "double_cnn_lstm": {"lstm_hidden": 16}}"#,
    );
    let toml = write(
        &dir,
        "user.toml",
        "[dataset]\nimage_size = 32\n\n[double_cnn_lstm]\nlstm_hidden = 8\n",
    );

    let from_json = UserConfig::from_path(&json).unwrap();
    assert_eq!(from_json.source(), Some(json.as_path()));
    let tuning = from_json.dataset_tuning().unwrap();
    assert_eq!(tuning.sequence_length, 4);
    assert_eq!(tuning.image_size, DatasetTuning::default().image_size);
    assert_eq!(
        from_json.section::<ModelSection>("double_cnn_lstm").unwrap(),
        Some(ModelSection { lstm_hidden: 16 })
    );

    let from_toml = UserConfig::from_path(&toml).unwrap();
    assert_eq!(from_toml.raw()["dataset"]["image_size"], serde_json::json!(32));
    assert_eq!(from_toml.dataset_tuning().unwrap().image_size, 32);
    assert_eq!(
        from_toml.section::<ModelSection>("double_cnn_lstm").unwrap(),
        Some(ModelSection { lstm_hidden: 8 })
    );
    assert!(from_toml.section::<ModelSection>("dummy_model").unwrap().is_none());
}

#[test]
fn malformed_section_is_an_error() {
    let cfg = UserConfig::from_value(serde_json::json!({"dataset": {"sequence_length": "six"}}));
    assert!(matches!(
        cfg.dataset_tuning().unwrap_err(),
        ConfigError::Section { .. }
    ));
}

#[test]
fn zero_sequence_length_rejected() {
    let cfg = UserConfig::from_value(serde_json::json!({"dataset": {"sequence_length": 0}}));
    assert!(matches!(
        cfg.dataset_tuning().unwrap_err(),
        ConfigError::Invalid { .. }
    ));
}

#[test]
fn absent_user_config_is_empty() {
    let cfg = UserConfig::load(None).unwrap();
    assert!(cfg.source().is_none());
    assert!(cfg.raw().is_null());
    assert_eq!(cfg.dataset_tuning().unwrap(), DatasetTuning::default());
}
