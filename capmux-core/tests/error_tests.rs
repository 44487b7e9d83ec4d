//! Integration tests for error handling

use capmux_core::error::{CapmuxError, ResultExt};
use capmux_core::types::SessionId;

fn session(raw: u64) -> SessionId {
    serde_json::from_str(&raw.to_string()).expect("session ids are plain numbers")
}

#[test]
fn test_error_context_chaining() {
    let base_error = CapmuxError::creation("Camera busy");
    let with_context = base_error.with_context("Failed to start capture");

    let msg = format!("{}", with_context);
    assert!(msg.contains("Failed to start capture"));
    assert!(msg.contains("Camera busy"));
}

#[test]
fn test_error_context_preserves_hint() {
    let base_error = CapmuxError::DeviceNotFound("cam9".to_string());
    let hint_before = base_error.user_hint();

    let with_context = base_error.with_context("Resolving start target");
    let hint_after = with_context.user_hint();

    assert_eq!(hint_before, hint_after);
}

#[test]
fn test_result_ext_context() {
    let result: Result<(), CapmuxError> = Err(CapmuxError::ipc("Connection refused"));
    let with_context = result.context("Querying daemon status");

    let err = with_context.unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Querying daemon status"));
    assert!(matches!(err.root(), CapmuxError::Ipc(_)));
}

#[test]
fn test_user_hints() {
    let err = CapmuxError::DeviceNotFound("cam0".to_string());
    assert!(err.user_hint().unwrap().contains("capmux devices"));

    let err = CapmuxError::ipc("test");
    assert!(err.user_hint().unwrap().contains("capmux daemon"));

    let err = CapmuxError::config("test");
    assert!(err.user_hint().unwrap().contains("config.toml"));

    assert!(CapmuxError::UnknownSession(session(1)).user_hint().is_some());
    assert!(
        CapmuxError::InvalidTransition {
            from: "idle",
            event: "start-succeeded"
        }
        .user_hint()
        .is_none()
    );
}

#[test]
fn test_user_recoverable() {
    assert!(CapmuxError::UnknownSession(session(1)).is_user_recoverable());
    assert!(CapmuxError::NotCapturing(session(1)).is_user_recoverable());
    assert!(CapmuxError::creation("busy").is_user_recoverable());
    assert!(CapmuxError::config("bad").is_user_recoverable());

    assert!(!CapmuxError::unsupported("take-photo").is_user_recoverable());
    assert!(!CapmuxError::WorkerGone.is_user_recoverable());
    assert!(
        !CapmuxError::InvalidTransition {
            from: "started",
            event: "start-queued"
        }
        .is_user_recoverable()
    );
}

#[test]
fn test_error_display_format() {
    assert_eq!(
        format!("{}", CapmuxError::UnknownSession(session(4))),
        "Unknown session: Session(4)"
    );
    assert_eq!(
        format!("{}", CapmuxError::creation("cam0 is busy")),
        "Device creation failed: cam0 is busy"
    );
    assert_eq!(
        format!(
            "{}",
            CapmuxError::InvalidTransition {
                from: "idle",
                event: "start-succeeded"
            }
        ),
        "Invalid transition: start-succeeded while idle"
    );
    assert_eq!(
        format!("{}", CapmuxError::ManagerGone),
        "Session manager is not running"
    );
}

#[test]
fn test_nested_context() {
    let err = CapmuxError::device("USB reset")
        .with_context("Delivering frame")
        .with_context("During capture");

    let msg = format!("{}", err);
    assert!(msg.contains("During capture"));
    assert!(err.user_hint().is_some());
    assert!(err.is_user_recoverable());
}

#[test]
fn test_io_error_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
    let capmux_err: CapmuxError = io_err.into();

    let msg = format!("{}", capmux_err);
    assert!(msg.contains("I/O error"));
    assert!(msg.contains("File not found"));
}

#[test]
fn test_parse_errors_convert() {
    let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    assert!(matches!(CapmuxError::from(toml_err), CapmuxError::Config(_)));

    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(CapmuxError::from(json_err), CapmuxError::Ipc(_)));
}
