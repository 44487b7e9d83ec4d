//! Integration tests for the control service

mod mocks;

use capmux_core::types::CapabilityResponse;
use capmux_core::{
    CapabilityRequest, CaptureParams, ClientEvent, ManagerEvent, ManagerService, StreamDescriptor,
    StreamKind,
};
use mocks::{MockBackend, client, manager, next_event};

#[tokio::test]
async fn test_service_runs_full_capture() {
    let backend = MockBackend::new(&["cam0"]);
    let handle = ManagerService::spawn(manager(&backend));
    let mut events = handle.subscribe().await.expect("subscribe");

    let devices = handle.enumerate_devices().await.expect("enumerate");
    assert_eq!(devices.len(), 1);
    assert_eq!(handle.devices().await.expect("devices"), devices);

    let session = handle
        .open(StreamDescriptor::device("cam0"))
        .await
        .expect("open");
    let (c, mut rx) = client();
    let accessor = handle
        .start_capture_for_client(session, CaptureParams::default(), c.clone())
        .await
        .expect("start");
    assert!(accessor.is_live());
    assert!(matches!(next_event(&mut rx).await, ClientEvent::Started));

    // Frames pumped by the service task
    assert!(backend.push_frame("cam0"));
    assert!(matches!(next_event(&mut rx).await, ClientEvent::Buffer(_)));

    let ticket = handle
        .get_capability(session, CapabilityRequest::TakePhoto)
        .await
        .expect("capability");
    assert!(matches!(
        ticket.wait().await.expect("photo"),
        CapabilityResponse::Photo(_)
    ));

    let formats = handle.supported_formats(session).await.expect("formats");
    assert_eq!(formats.len(), 2);

    let status = handle.status().await.expect("status");
    assert_eq!(status.entries.len(), 1);
    assert_eq!(status.stats.starts_device, 1);

    handle
        .stop_capture_for_client(session, c.id(), false)
        .await
        .expect("stop");
    assert!(backend.wait_for("stop cam0", 1).await);
    assert!(!accessor.is_live());

    handle.close(session).await.expect("close");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&ManagerEvent::DevicesEnumerated { count: 1 }));
    assert!(seen.contains(&ManagerEvent::Opened {
        session,
        kind: StreamKind::Device
    }));
    assert!(seen.contains(&ManagerEvent::Closed {
        session,
        kind: StreamKind::Device
    }));

    tokio_test::assert_ok!(handle.shutdown().await);
    tokio_test::assert_err!(handle.status().await);
}

#[tokio::test]
async fn test_handle_reports_manager_gone() {
    let backend = MockBackend::new(&[]);
    let handle = ManagerService::spawn(manager(&backend));
    handle.shutdown().await.expect("shutdown");

    tokio_test::assert_err!(handle.open(StreamDescriptor::tab("tab-1")).await);
    tokio_test::assert_err!(handle.status().await);
}
