//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use castv2::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig, DEFAULT_PORT,
    MAX_FRAME_SIZE,
};
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_defaults_follow_protocol_constants() {
    let config = NetworkConfig::default();
    assert_eq!(config.server.port, DEFAULT_PORT);
    assert_eq!(config.client.port, 8009);
    assert_eq!(config.transport.max_frame_size, MAX_FRAME_SIZE);
    assert!(!config.client.verify_certificates);
}

#[test]
fn test_invalid_bind_address() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server bind address")));
}

#[test]
fn test_empty_bind_address() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_client_port() {
    let mut config = NetworkConfig::default();
    config.client.port = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Client port cannot be 0")));
}

#[test]
fn test_empty_server_name() {
    let mut config = NetworkConfig::default();
    config.client.server_name = Some(String::new());

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("server_name cannot be empty")));
}

#[test]
fn test_zero_event_capacity() {
    let mut config = NetworkConfig::default();
    config.server.event_capacity = 0;
    config.client.event_capacity = 0;

    let errors = config.validate();
    assert_eq!(
        errors
            .iter()
            .filter(|e| e.contains("event capacity must be greater than 0"))
            .count(),
        2
    );
}

#[test]
fn test_zero_max_frame_size() {
    let mut config = NetworkConfig::default();
    config.transport.max_frame_size = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame size cannot be 0")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.transport.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_excessive_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.transport.backpressure_limit = 2_000_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Backpressure limit too large")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = String::new();

    let err = config.validate_strict().unwrap_err();
    assert!(err.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = String::new();
    config.client.port = 0;
    config.transport.max_frame_size = 0;
    config.transport.backpressure_limit = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [transport]
        max_frame_size = 1024
        backpressure_limit = 8

        [logging]
        app_name = "receiver"
        log_level = "debug"
        log_to_console = true
        log_to_file = false
        json_format = true
        "#,
    )
    .unwrap();

    assert_eq!(config.transport.max_frame_size, 1024);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(config.server.port, DEFAULT_PORT);
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = NetworkConfig::from_toml("[transport\nmax_frame_size = ").unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}

#[test]
fn test_example_config_round_trips() {
    let text = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&text).unwrap();
    assert_eq!(parsed.server.bind_address, "0.0.0.0");
    assert_eq!(parsed.logging.log_level, Level::INFO);
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("castv2-config-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.client.server_name = Some("living-room".into());
        c.transport.backpressure_limit = 16;
    });

    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.client.server_name.as_deref(), Some("living-room"));
    assert_eq!(loaded.transport.backpressure_limit, 16);
}

#[test]
fn test_valid_custom_config() {
    let config = NetworkConfig {
        server: ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 18009,
            event_capacity: 1024,
        },
        client: ClientConfig {
            port: 18009,
            verify_certificates: true,
            server_name: Some("chromecast.local".to_string()),
            event_capacity: 64,
        },
        transport: TransportConfig {
            max_frame_size: 1024 * 1024,
            backpressure_limit: 128,
        },
        logging: LoggingConfig {
            app_name: "cast-receiver".to_string(),
            log_level: Level::WARN,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    assert!(config.validate_strict().is_ok());
}
