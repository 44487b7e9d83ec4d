//! Integration tests for configuration system

use capmux_core::backend::{CaptureBackend, FakeDeviceSpec};
use capmux_core::config::{ConfigFile, ManagerConfig, sample_config};
use capmux_core::types::{PixelFormat, StreamKind};
use tempfile::TempDir;

#[test]
fn test_manager_config_builder() {
    let config = ManagerConfig::default()
        .with_worker_thread_name("cam-worker")
        .with_max_buffers(4)
        .with_max_buffers_derived(12)
        .with_event_capacity(8);

    assert_eq!(config.worker_thread_name, "cam-worker");
    assert_eq!(config.max_buffers_for(StreamKind::Device), 4);
    assert_eq!(config.max_buffers_for(StreamKind::Tab), 12);
    assert_eq!(config.event_capacity, 8);
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_manager_config_validation() {
    assert!(
        ManagerConfig::default()
            .with_max_buffers_derived(0)
            .validate_strict()
            .is_err()
    );
    assert!(
        ManagerConfig::default()
            .with_worker_thread_name("")
            .validate_strict()
            .is_err()
    );
}

#[test]
fn test_config_file_default() {
    let config = ConfigFile::default();
    assert_eq!(config.manager.worker_thread_name, "capmux-device");
    assert_eq!(config.manager.max_buffers, 3);
    assert_eq!(config.manager.max_buffers_derived, 10);
    assert_eq!(config.capture.width, 640);
    assert_eq!(config.fake.devices.len(), 2);
    assert_eq!(config.manager_config(), ManagerConfig::default());
}

#[test]
fn test_config_file_sample_parses() {
    let sample = sample_config();
    let config: ConfigFile = toml::from_str(&sample).expect("Sample config should parse");
    assert_eq!(config, ConfigFile::default());
}

#[test]
fn test_config_file_partial() {
    let config: ConfigFile = toml::from_str(
        r#"
        [manager]
        max_buffers = 6

        [capture]
        fps = 15.0
        "#,
    )
    .expect("Partial config should parse");

    assert_eq!(config.manager.max_buffers, 6);
    assert_eq!(config.manager.max_buffers_derived, 10);
    assert_eq!(config.capture.height, 480);

    let params = config.capture_params();
    assert_eq!(params.requested_format.frame_rate, 15.0);
    assert_eq!(params.requested_format.pixel_format, PixelFormat::I420);
}

#[test]
fn test_config_file_fake_devices() {
    let config: ConfigFile = toml::from_str(
        r#"
        [[fake.devices]]
        id = "broken"
        name = "Broken Camera"
        fail_create = true
        start_delay_ms = 250
        "#,
    )
    .expect("Fake device table should parse");

    assert_eq!(config.fake.devices.len(), 1);
    assert!(config.fake.devices[0].fail_create);
    assert_eq!(config.fake.devices[0].start_delay_ms, 250);

    let backend = config.fake_backend();
    let devices = backend.enumerate().expect("enumerate");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name, "Broken Camera");
}

#[test]
fn test_config_file_save_load() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = ConfigFile::default();
    config.manager.max_buffers = 5;
    config.capture.width = 1280;
    config.capture.height = 720;
    config
        .fake
        .devices
        .push(FakeDeviceSpec::new("fake-cam-2", "Fake Side Camera").failing());
    config
        .save_to(config_path.clone())
        .expect("Failed to save config");

    let loaded = ConfigFile::load_from(config_path).expect("Failed to load config");
    assert_eq!(loaded, config);
}

#[test]
fn test_config_file_load_nonexistent() {
    let result = ConfigFile::load_from("/nonexistent/path/config.toml".into());
    assert_eq!(result.expect("defaults"), ConfigFile::default());
}

#[test]
fn test_config_file_load_invalid() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "[manager\nmax_buffers = ").expect("write");

    let err = ConfigFile::load_from(config_path).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}
