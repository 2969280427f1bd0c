//! Integration tests for the logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_config_builder_chain() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_target(false);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.display_target);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_token_fields_are_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "gho_abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("github_token", "gho_abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("fingerprint", "a.jpg_1_2"), "a.jpg_1_2");
}

#[test]
fn test_device_paths_are_stripped() {
    assert_eq!(strip_path("/private/var/mobile/Media/DCIM/100APPLE/IMG_0001.HEIC"), "IMG_0001.HEIC");
    assert_eq!(strip_path("D:\\Photos\\2024\\beach.jpg"), "beach.jpg");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_second_initialization_fails() {
    // Only one global subscriber per process; whichever call loses must error.
    let first = init_logging(LoggingConfig::default().with_format(LogFormat::Compact));
    let second = init_logging(LoggingConfig::default().with_format(LogFormat::Json));

    assert!(first.is_ok() || second.is_err());
    assert!(second.is_err());
}
