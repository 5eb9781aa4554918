//! Process-wide instance discipline.
//!
//! The instances live in statics, so everything runs in one sequential test
//! within this test binary.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use turm_server::config::SerialConfig;
use turm_server::gateway::{CommandGateway, ServerError};
use turm_server::port::MockTransport;
use turm_server::session::{DeviceSession, LinkStatus, SessionError};

#[tokio::test]
async fn session_and_gateway_are_created_once() {
    assert!(matches!(
        DeviceSession::get_instance(),
        Err(SessionError::NotInitialized)
    ));

    // A failed creation leaves nothing behind.
    let transport = MockTransport::new();
    transport.set_fail_open(true);
    let failed = DeviceSession::create_instance(
        &SerialConfig::for_device("MOCK0"),
        Arc::new(transport.clone()),
    )
    .await;
    assert!(matches!(failed, Err(SessionError::OpenFailed { .. })));
    assert!(matches!(
        DeviceSession::get_instance(),
        Err(SessionError::NotInitialized)
    ));

    transport.set_fail_open(false);
    let session = DeviceSession::create_instance(
        &SerialConfig::for_device("MOCK0"),
        Arc::new(transport.clone()),
    )
    .await
    .unwrap();
    assert!(Arc::ptr_eq(&session, &DeviceSession::get_instance().unwrap()));

    // The second creation is refused and the first session is untouched.
    let second = DeviceSession::create_instance(
        &SerialConfig::disabled(),
        Arc::new(MockTransport::new()),
    )
    .await;
    assert!(matches!(second, Err(SessionError::AlreadyInitialized)));
    assert_eq!(session.status().state, LinkStatus::Open);
    assert_eq!(transport.open_calls(), 2);
    assert_eq!(transport.written_text(), vec!["Hello\n".to_string()]);

    assert!(matches!(
        CommandGateway::get_instance(),
        Err(ServerError::NotInitialized)
    ));
    let gateway = CommandGateway::create_instance(Arc::clone(&session))
        .await
        .unwrap();
    assert!(matches!(
        CommandGateway::create_instance(Arc::clone(&session)).await,
        Err(ServerError::AlreadyInitialized)
    ));
    assert!(Arc::ptr_eq(&gateway, &CommandGateway::get_instance().unwrap()));
    assert_eq!(gateway.state(), "created");
}
