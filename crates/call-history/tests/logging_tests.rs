//! `setup_logging` tests live in their own test binary because they install
//! the process-wide tracing subscriber, which would clash with
//! `#[traced_test]` tests in the lib test binary.

use rvoip_call_history::logging::{parse_log_level, setup_logging, LoggingConfig};
use serial_test::serial;
use tracing::Level;

#[test]
fn test_parse_log_level() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
    assert!(parse_log_level("loud").is_err());
}

#[test]
#[serial]
fn test_second_setup_reports_error() {
    let config = LoggingConfig::new("debug", "test").with_file_info();
    // Another test binary may already own the global subscriber
    let _ = setup_logging(&config);
    assert!(setup_logging(&config).is_err());
}

#[test]
#[serial]
fn test_invalid_level_is_rejected_before_install() {
    let config = LoggingConfig::new("chatty", "test");
    let err = setup_logging(&config).unwrap_err();
    assert_eq!(err.category(), "configuration");
}
