use gcodebridge_settings::{Config, LogFormat, SettingsError};
use tempfile::TempDir;

#[test]
fn test_toml_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("bridge.toml");

    let mut config = Config::default();
    config.server.listen = "0.0.0.0:8080".to_string();
    config.connection.port = "/dev/ttyACM0".to_string();
    config.bridge.queue_depth = 4;
    config.logging.format = LogFormat::Compact;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bridge.json");
    std::fs::write(
        &path,
        r#"{"connection": {"baud_rate": 250000, "auto_reconnect": false}}"#,
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.connection.baud_rate, 250000);
    assert!(!config.connection.auto_reconnect);
    assert_eq!(config.server.listen, "127.0.0.1:5000");
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_files_are_rejected() {
    let dir = TempDir::new().unwrap();

    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[connection\nport = 1").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::LoadError { .. })
    ));

    let path = dir.path().join("zero.toml");
    std::fs::write(&path, "[connection]\nbaud_rate = 0\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::InvalidSetting { .. })
    ));

    let path = dir.path().join("bridge.yaml");
    std::fs::write(&path, "server: {}").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::UnsupportedFormat(_))
    ));
}
