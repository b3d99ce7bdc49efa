//! Integration tests for the connection state machine.
//!
//! Drives `ConnectionMachine` by hand through full delivery cycles, so every
//! transition and every issued action can be asserted without sockets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use herald_core::{ClientEvent, DropReason, HaltOutcome, TestClock};
use herald_delivery::{
    Action, ClientConfig, ConnState, ConnectionMachine, DeliveryError, EnqueueRejected,
    ResponseHead, RetryPolicy, RetryPolicyAction,
};
use herald_testing::{destination, event_payload};

const URL: &str = "http://10.0.0.5:9000/events";

fn machine_with(policy: RetryPolicy) -> ConnectionMachine {
    let config = ClientConfig { retry_policy: policy, ..ClientConfig::default() };
    ConnectionMachine::new(destination(URL).unwrap(), &config, Arc::new(TestClock::new()))
}

fn machine() -> ConnectionMachine {
    machine_with(RetryPolicy::default())
}

fn endpoints() -> Vec<SocketAddr> {
    vec!["10.0.0.5:9000".parse().unwrap()]
}

fn response(status: u16, keep_alive: bool) -> Result<ResponseHead, DeliveryError> {
    Ok(ResponseHead { status, keep_alive, content_length: Some(0) })
}

/// Runs resolve and connect to completion, returning the send action.
fn open(m: &mut ConnectionMachine) -> Action {
    assert_eq!(m.on_resolved(Ok(endpoints())), Action::Connect(endpoints()));
    m.on_connected(Ok(()))
}

#[test]
fn single_payload_is_delivered_on_keep_alive_connection() {
    let mut m = machine();
    let payload = r#"{"Id":1}"#.to_string();

    assert_eq!(m.enqueue(payload.clone()), Ok(Action::Resolve));
    assert_eq!(m.state(), ConnState::ResolveInProgress);
    assert_eq!(open(&mut m), Action::Send(payload));
    assert_eq!(m.on_sent(Ok(())), Action::Receive);
    assert_eq!(m.state(), ConnState::RecvInProgress);
    assert_eq!(m.on_received(response(200, true)), Action::None);

    assert_eq!(m.state(), ConnState::Idle);
    assert!(m.queue().is_empty());

    let events = m.take_events();
    assert!(matches!(
        events.as_slice(),
        [ClientEvent::Delivered(delivered)] if delivered.event_id == Some(1) && delivered.status == 200
    ));
}

#[test]
fn terminate_after_retries_stops_connecting() {
    let mut m = machine_with(RetryPolicy {
        max_attempts: 2,
        interval: Duration::ZERO,
        action: RetryPolicyAction::TerminateAfterRetries,
    });
    let refused = || Err(DeliveryError::connect("connection refused"));

    m.enqueue(event_payload(1)).unwrap();
    let mut connects = 0;

    for attempt in 1..=2 {
        assert_eq!(m.on_resolved(Ok(endpoints())), Action::Connect(endpoints()));
        connects += 1;
        assert_eq!(m.on_connected(refused()), Action::Wait(Duration::ZERO));
        assert_eq!(m.state(), ConnState::ConnectFailed);
        assert_eq!(m.retry().retry_count(), attempt);
        assert_eq!(m.on_timer_fired(), Action::Close);
        assert_eq!(m.on_closed(), Action::Resolve);
    }

    assert_eq!(m.on_resolved(Ok(endpoints())), Action::Connect(endpoints()));
    connects += 1;
    assert_eq!(m.on_connected(refused()), Action::None);

    assert_eq!(connects, 3);
    assert_eq!(m.state(), ConnState::Terminated);
    assert!(m.queue().is_empty());
    assert_eq!(m.dispatch(), Action::None);
    assert_eq!(m.enqueue(event_payload(2)), Err(EnqueueRejected::Inactive(ConnState::Terminated)));
    assert_eq!(m.resume(), Action::None);
    assert_eq!(m.state(), ConnState::Terminated);

    let events = m.take_events();
    assert!(matches!(
        events.first(),
        Some(ClientEvent::Halted(halted)) if halted.outcome == HaltOutcome::Terminated && halted.discarded == 1
    ));
    assert!(matches!(
        events.get(1),
        Some(ClientEvent::Dropped(dropped)) if dropped.reason == DropReason::ClientInactive
    ));
}

#[test]
fn queue_caps_at_fifty_without_network_activity() {
    let mut m = machine();

    for id in 1..=60 {
        let result = m.enqueue(event_payload(id));
        if id <= 50 {
            assert!(result.is_ok(), "payload {id} should be accepted");
        } else {
            assert_eq!(result, Err(EnqueueRejected::QueueFull { capacity: 50 }));
        }
    }

    assert_eq!(m.queue().len(), 50);
    assert_eq!(m.state(), ConnState::ResolveInProgress);

    let dropped: Vec<_> = m
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Dropped(d) => d.event_id,
            _ => None,
        })
        .collect();
    assert_eq!(dropped, (51..=60).collect::<Vec<_>>());
}

#[test]
fn non_success_status_engages_retry() {
    let mut m = machine_with(RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_secs(30),
        action: RetryPolicyAction::TerminateAfterRetries,
    });

    m.enqueue(event_payload(1)).unwrap();
    open(&mut m);
    m.on_sent(Ok(()));

    assert_eq!(m.on_received(response(503, true)), Action::Wait(Duration::from_secs(30)));
    assert_eq!(m.state(), ConnState::RecvFailed);
    assert_eq!(m.retry().retry_count(), 1);
    assert_eq!(m.queue().len(), 1);
    assert!(m.take_events().is_empty());
}

#[test]
fn payloads_are_delivered_in_order() {
    let mut m = machine();
    for id in 1..=3 {
        m.enqueue(event_payload(id)).unwrap();
    }

    let mut action = open(&mut m);
    let mut sent = Vec::new();
    while let Action::Send(payload) = action {
        sent.push(payload);
        assert_eq!(m.on_sent(Ok(())), Action::Receive);
        action = m.on_received(response(204, true));
    }

    assert_eq!(sent, vec![event_payload(1), event_payload(2), event_payload(3)]);
    assert_eq!(action, Action::None);
    assert_eq!(m.state(), ConnState::Idle);
}

#[test]
fn success_restores_retry_budget() {
    let mut m = machine();
    m.enqueue(event_payload(1)).unwrap();

    m.on_resolved(Err(DeliveryError::resolve("10.0.0.5", "timed out")));
    m.on_timer_fired();
    m.on_closed();
    assert_eq!(m.retry().retry_count(), 1);

    open(&mut m);
    m.on_sent(Ok(()));
    m.on_received(response(200, true));
    assert_eq!(m.retry().retry_count(), 0);
}

#[test]
fn write_failure_retries_from_fresh_resolve() {
    let mut m = machine();
    m.enqueue(event_payload(1)).unwrap();
    open(&mut m);

    assert_eq!(m.on_sent(Err(DeliveryError::write("broken pipe"))), Action::Wait(Duration::ZERO));
    assert_eq!(m.state(), ConnState::SendFailed);
    assert_eq!(m.on_timer_fired(), Action::Close);
    assert_eq!(m.state(), ConnState::CloseInProgress);
    assert_eq!(m.on_closed(), Action::Resolve);
}

#[test]
fn https_failed_handshake_is_retried() {
    let config = ClientConfig::default();
    let dest = destination("https://listener.example.com/events").unwrap();
    let mut m = ConnectionMachine::new(dest, &config, Arc::new(TestClock::new()));

    m.enqueue(event_payload(1)).unwrap();
    m.on_resolved(Ok(endpoints()));
    assert_eq!(m.on_connected(Ok(())), Action::Handshake);
    assert_eq!(
        m.on_handshake(Err(DeliveryError::tls("certificate verify failed"))),
        Action::Wait(Duration::ZERO)
    );
    assert_eq!(m.state(), ConnState::HandshakeFailed);
}

#[test]
fn skip_and_continue_drops_only_head_payload() {
    let mut m = machine_with(RetryPolicy {
        max_attempts: 1,
        interval: Duration::ZERO,
        action: RetryPolicyAction::from("RetryForever"),
    });
    m.enqueue(event_payload(1)).unwrap();
    m.enqueue(event_payload(2)).unwrap();
    open(&mut m);

    m.on_sent(Ok(()));
    assert_eq!(m.on_received(response(500, true)), Action::Wait(Duration::ZERO));
    m.on_timer_fired();
    m.on_closed();
    open(&mut m);
    m.on_sent(Ok(()));

    // Budget spent: the head is dropped and the next payload goes out at once.
    assert_eq!(m.on_received(response(500, true)), Action::Send(event_payload(2)));
    assert_eq!(m.queue().len(), 1);
    assert_eq!(m.retry().retry_count(), 0);

    let reasons: Vec<_> = m
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Dropped(d) => Some((d.event_id, d.reason)),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![(Some(1), DropReason::RetriesExhausted)]);
}

#[test]
fn suspended_client_discards_queue_and_resumes() {
    let mut m = machine_with(RetryPolicy {
        max_attempts: 0,
        interval: Duration::ZERO,
        action: RetryPolicyAction::SuspendRetries,
    });
    m.enqueue(event_payload(1)).unwrap();
    m.enqueue(event_payload(2)).unwrap();

    assert_eq!(m.on_resolved(Err(DeliveryError::resolve("10.0.0.5", "nxdomain"))), Action::Close);
    assert_eq!(m.state(), ConnState::Suspended);
    assert!(m.queue().is_empty());
    assert_eq!(m.on_closed(), Action::None);
    assert_eq!(m.enqueue(event_payload(3)), Err(EnqueueRejected::Inactive(ConnState::Suspended)));

    assert_eq!(m.resume(), Action::None);
    assert_eq!(m.state(), ConnState::Closed);
    assert_eq!(m.enqueue(event_payload(4)), Ok(Action::Resolve));

    let halts: Vec<_> = m
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Halted(h) => Some((h.outcome, h.discarded)),
            _ => None,
        })
        .collect();
    assert_eq!(halts, vec![(HaltOutcome::Suspended, 2)]);
}

#[test]
fn policy_changes_apply_to_next_decision() {
    let mut m = machine();
    m.configure_retry(1, Duration::from_secs(5));
    m.set_retry_action(RetryPolicyAction::SuspendRetries);
    m.enqueue(event_payload(1)).unwrap();

    assert_eq!(m.on_resolved(Ok(vec![])), Action::Wait(Duration::from_secs(5)));
    m.on_timer_fired();
    m.on_closed();
    assert_eq!(m.on_resolved(Ok(vec![])), Action::Close);
    assert_eq!(m.state(), ConnState::Suspended);
}

#[test]
fn keep_alive_refused_reconnects_for_next_payload() {
    let mut m = machine();
    m.enqueue(event_payload(1)).unwrap();
    m.enqueue(event_payload(2)).unwrap();
    open(&mut m);
    m.on_sent(Ok(()));

    assert_eq!(m.on_received(response(200, false)), Action::Close);
    assert_eq!(m.on_closed(), Action::Resolve);
    assert_eq!(open(&mut m), Action::Send(event_payload(2)));
}
