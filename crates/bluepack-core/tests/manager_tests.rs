//! Integration tests for the connection manager
//!
//! These cover the manager's lifecycle rules across listen, dial and transfer
//! workers: one session at a time, idempotent start, dial supersession, and
//! recovery after endpoint failures.


use std::time::Duration;

use bluepack_core::{
    ConnectionEvent, ConnectionState, LinkConfig, LinkError, LoopbackAir, PeerDevice,
    SessionOrigin,
};
use test_utils::*;
use tokio::time::sleep;

// ----------------------------------------------------------------------------
// Start and Listen
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_is_idempotent() {
    let air = LoopbackAir::new();
    let mut node = create_test_node(&air, 1);

    node.manager.start().await.unwrap();
    node.manager.start().await.unwrap();

    wait_for_event(&mut node.events, |event| {
        matches!(event, ConnectionEvent::Listening { .. })
    })
    .await;
    node.manager.start().await.unwrap();

    let stats = node.manager.stats().await.unwrap();
    assert_eq!(stats.listeners_started, 1);
    assert_eq!(node.radio.listens_opened(), 1);
    assert_eq!(node.manager.state(), ConnectionState::Listening);
}

#[tokio::test]
async fn test_listen_failure_is_reported_and_start_retries() {
    let air = LoopbackAir::new();
    let mut node = create_test_node(&air, 1);
    node.radio.set_powered(false);

    node.manager.start().await.unwrap();
    let event = wait_for_event(&mut node.events, |event| event.is_failure()).await;
    match event {
        ConnectionEvent::ListenFailed {
            error: LinkError::EndpointUnavailable { service, reason },
        } => {
            assert_eq!(service, "BluetoothTinyChat");
            assert!(reason.contains("powered off"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    wait_for_state(&node.manager, ConnectionState::Idle).await;

    node.radio.set_powered(true);
    node.manager.start().await.unwrap();
    wait_for_state(&node.manager, ConnectionState::Listening).await;
    assert_eq!(node.manager.stats().await.unwrap().listeners_started, 2);
}

#[tokio::test]
async fn test_accept_loop_gives_up_after_repeated_failures() {
    let air = LoopbackAir::new();
    let mut node = create_listening_node(&air, 1).await;

    node.radio.set_powered(false);

    let event = wait_for_event(&mut node.events, |event| {
        matches!(event, ConnectionEvent::ListenFailed { .. })
    })
    .await;
    if let ConnectionEvent::ListenFailed { error } = event {
        assert!(error.to_string().contains("accept failed 3 times"));
    }
    wait_for_state(&node.manager, ConnectionState::Idle).await;
    assert!(!air.is_listening(node.address(), &node.manager.service()));
}

#[tokio::test]
async fn test_listener_rearms_after_session() {
    let air = LoopbackAir::new();
    let x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    let z = create_test_node(&air, 3);

    connect_nodes(&y, &x).await;
    assert!(y.manager.close().await.unwrap());
    wait_for_state(&x.manager, ConnectionState::Listening).await;

    connect_nodes(&z, &x).await;
    z.manager.send_text("second peer").await.unwrap();
    wait_for_text(&x.inbox, "second peer").await;

    let stats = x.manager.stats().await.unwrap();
    assert_eq!(stats.listeners_started, 1);
    assert_eq!(stats.sessions_established, 2);
    assert_eq!(x.radio.listens_opened(), 1);
}

// ----------------------------------------------------------------------------
// Single Session
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_new_inbound_session_replaces_active_one() {
    let air = LoopbackAir::new();
    let mut x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    let z = create_test_node(&air, 3);

    connect_nodes(&y, &x).await;
    z.manager.connect_to(x.device()).await.unwrap();

    let ended = wait_for_event(&mut x.events, |event| {
        matches!(event, ConnectionEvent::SessionEnded { .. })
    })
    .await;
    assert_eq!(
        ended,
        ConnectionEvent::SessionEnded {
            peer: y.address(),
            reason: "replaced by a new session".to_string(),
        }
    );

    // The replaced peer sees its stream end
    wait_for_state(&y.manager, ConnectionState::Idle).await;
    wait_for_state(&z.manager, ConnectionState::Connected).await;

    z.manager.send_text("from z").await.unwrap();
    wait_for_text(&x.inbox, "from z").await;

    let stats = x.manager.stats().await.unwrap();
    assert_eq!(stats.sessions_established, 2);
    assert_eq!(stats.sessions_replaced, 1);
}

#[tokio::test]
async fn test_simultaneous_accept_and_dial_leave_one_session() {
    let air = LoopbackAir::new();
    let x = create_listening_node(&air, 1).await;
    let w = create_listening_node(&air, 2).await;
    let z = create_test_node(&air, 3);

    let (dialed, inbound) = tokio::join!(
        x.manager.connect_to(w.device()),
        z.manager.connect_to(x.device()),
    );
    dialed.unwrap();
    inbound.unwrap();

    let (xm, wm, zm) = (&x.manager, &w.manager, &z.manager);
    wait_until("x adopted both sessions", move || async move {
        xm.stats().await.unwrap().sessions_established == 2
    })
    .await;
    wait_until("exactly one peer still connected", move || async move {
        let connected = [wm, zm]
            .iter()
            .filter(|manager| manager.state() == ConnectionState::Connected)
            .count();
        connected == 1
    })
    .await;

    assert_eq!(x.manager.state(), ConnectionState::Connected);
    assert_eq!(x.manager.stats().await.unwrap().sessions_replaced, 1);
}

#[tokio::test]
async fn test_close_keeps_listener() {
    let air = LoopbackAir::new();
    let mut x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);

    connect_nodes(&y, &x).await;
    assert!(x.manager.close().await.unwrap());
    assert!(!x.manager.close().await.unwrap());

    let ended = wait_for_event(&mut x.events, |event| {
        matches!(event, ConnectionEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ConnectionEvent::SessionEnded { ref reason, .. } if reason == "closed locally"
    ));
    wait_for_state(&x.manager, ConnectionState::Listening).await;
    wait_for_state(&y.manager, ConnectionState::Idle).await;
}

#[tokio::test]
async fn test_closed_session_delivers_nothing_more() {
    let air = LoopbackAir::new();
    let x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    connect_nodes(&y, &x).await;

    y.manager.send_text("a").await.unwrap();
    wait_for_text(&x.inbox, "a").await;

    assert!(x.manager.close().await.unwrap());
    // y may not have noticed the close yet
    let _ = y.manager.send_text("b").await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(x.inbox.text(), "a");
    wait_for_state(&y.manager, ConnectionState::Idle).await;
}

// ----------------------------------------------------------------------------
// Dialing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_new_dial_supersedes_pending_one() {
    let air = LoopbackAir::new();
    let a = create_listening_node(&air, 1).await;
    let b = create_listening_node(&air, 2).await;
    let mut y = create_test_node(&air, 3);

    air.stall(a.address());
    let first = y.manager.connect_to(a.device()).await.unwrap();
    let second = y.manager.connect_to(b.device()).await.unwrap();
    assert_ne!(first, second);

    let connected = wait_for_event(&mut y.events, |event| {
        matches!(event, ConnectionEvent::Connected { .. })
    })
    .await;
    assert_eq!(
        connected,
        ConnectionEvent::Connected {
            peer: b.address(),
            origin: SessionOrigin::Dialed(second),
        }
    );

    // A late answer from the first peer must never be adopted
    air.release(a.address());
    sleep(Duration::from_millis(50)).await;

    assert_eq!(a.manager.state(), ConnectionState::Listening);
    assert_eq!(b.manager.state(), ConnectionState::Connected);
    let stats = y.manager.stats().await.unwrap();
    assert_eq!(stats.dials_started, 2);
    assert_eq!(stats.dials_cancelled, 1);
    assert_eq!(stats.sessions_established, 1);
    assert_eq!(y.radio.discovery_cancellations(), 2);
}

#[tokio::test]
async fn test_start_cancels_pending_dial() {
    let air = LoopbackAir::new();
    let a = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);

    air.stall(a.address());
    y.manager.connect_to(a.device()).await.unwrap();
    assert_eq!(y.manager.state(), ConnectionState::Connecting);

    y.manager.start().await.unwrap();
    wait_for_state(&y.manager, ConnectionState::Listening).await;
    air.release(a.address());
    sleep(Duration::from_millis(50)).await;

    assert_eq!(a.manager.state(), ConnectionState::Listening);
    assert_eq!(y.manager.stats().await.unwrap().dials_cancelled, 1);
}

#[tokio::test]
async fn test_connect_timeout_reports_dial_failure() {
    let air = LoopbackAir::new();
    let a = create_listening_node(&air, 1).await;
    let config = create_test_config().with_connect_timeout(Duration::from_millis(30));
    let mut y = create_test_node_with_config(&air, 2, config);

    air.stall(a.address());
    let attempt = y.manager.connect_to(a.device()).await.unwrap();

    let failed = wait_for_event(&mut y.events, |event| event.is_failure()).await;
    match failed {
        ConnectionEvent::DialFailed {
            attempt: reported,
            error: LinkError::DialFailed { reason, .. },
            ..
        } => {
            assert_eq!(reported, attempt);
            assert_eq!(reason, "connect timed out after 30ms");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    wait_for_state(&y.manager, ConnectionState::Idle).await;
    air.release(a.address());
}

#[tokio::test]
async fn test_socket_creation_failure() {
    let air = LoopbackAir::new();
    let a = create_listening_node(&air, 1).await;
    let mut y = create_test_node(&air, 2);
    y.radio.set_powered(false);

    y.manager.connect_to(a.device()).await.unwrap();
    let failed = wait_for_event(&mut y.events, |event| event.is_failure()).await;
    assert!(matches!(
        failed,
        ConnectionEvent::DialFailed { error: LinkError::DialFailed { ref reason, .. }, .. }
            if reason.starts_with("could not create socket")
    ));
    assert_eq!(y.manager.stats().await.unwrap().dials_failed, 1);
}

// ----------------------------------------------------------------------------
// Sending and Sinks
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_without_session() {
    let air = LoopbackAir::new();
    let node = create_listening_node(&air, 1).await;

    let err = node.manager.send_text("nobody").await.unwrap_err();
    assert_eq!(err, LinkError::NoActiveSession);
}

#[tokio::test]
async fn test_write_failure_keeps_session_reading() {
    let air = LoopbackAir::new();
    let x = create_listening_node(&air, 1).await;
    let mut y = create_test_node(&air, 2);
    connect_nodes(&y, &x).await;

    y.radio.inject_write_failures(true);
    let err = y.manager.send_text("lost").await.unwrap_err();
    assert!(matches!(err, LinkError::StreamClosed { .. }));
    wait_for_event(&mut y.events, |event| {
        matches!(event, ConnectionEvent::SendFailed { .. })
    })
    .await;

    x.manager.send_text("still here").await.unwrap();
    wait_for_text(&y.inbox, "still here").await;
    assert_eq!(y.manager.state(), ConnectionState::Connected);

    y.radio.inject_write_failures(false);
    y.manager.send_text("recovered").await.unwrap();
    wait_for_text(&x.inbox, "recovered").await;
}

#[tokio::test]
async fn test_unsubscribed_sink_receives_nothing() {
    let air = LoopbackAir::new();
    let mut x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    connect_nodes(&y, &x).await;

    y.manager.send_text("one").await.unwrap();
    wait_for_text(&x.inbox, "one").await;

    if let Some(subscription) = x.subscription.take() {
        subscription.unsubscribe();
    }
    let later = Inbox::default();
    let _later_subscription = x.manager.subscribe(later.sink());

    y.manager.send_text("two").await.unwrap();
    wait_for_text(&later, "two").await;
    assert_eq!(x.inbox.text(), "one");
}

#[tokio::test]
async fn test_panicking_sink_does_not_end_session() {
    let air = LoopbackAir::new();
    let mut x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    connect_nodes(&y, &x).await;

    let _faulty = x.manager.subscribe(|text: &str| {
        if text.contains("boom") {
            panic!("sink rejected {:?}", text);
        }
    });

    y.manager.send_text("boom").await.unwrap();
    wait_for_text(&x.inbox, "boom").await;
    y.manager.send_text("after").await.unwrap();
    wait_for_text(&x.inbox, "after").await;
    assert_eq!(x.manager.state(), ConnectionState::Connected);

    x.manager.send_text("reply").await.unwrap();
    wait_for_text(&y.inbox, "reply").await;

    assert!(x.manager.close().await.unwrap());
    let ended = wait_for_event(&mut x.events, |event| {
        matches!(event, ConnectionEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ConnectionEvent::SessionEnded { ref reason, .. } if reason == "closed locally"
    ));
    wait_for_state(&y.manager, ConnectionState::Idle).await;
}

// ----------------------------------------------------------------------------
// Shutdown and Configuration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let air = LoopbackAir::new();
    let x = create_listening_node(&air, 1).await;
    let y = create_test_node(&air, 2);
    connect_nodes(&y, &x).await;

    x.manager.shutdown().await.unwrap();
    wait_for_state(&y.manager, ConnectionState::Idle).await;
    assert_eq!(x.manager.state(), ConnectionState::Idle);

    let err = x
        .manager
        .connect_to(PeerDevice::from_address(y.address()))
        .await
        .unwrap_err();
    assert_eq!(err, LinkError::ManagerClosed);
    assert!(x.manager.shutdown().await.is_ok());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let air = LoopbackAir::new();
    let radio = air.radio(test_address(1));
    let config = LinkConfig::default().with_read_buffer_size(0);

    let result = bluepack_core::ConnectionManager::new(std::sync::Arc::new(radio), config);
    assert!(matches!(
        result,
        Err(LinkError::InvalidConfiguration { .. })
    ));
}
