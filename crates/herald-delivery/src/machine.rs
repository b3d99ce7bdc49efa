//! Connection state machine for a single destination.
//!
//! The machine performs no I/O. Every method mutates `ConnState` and returns
//! the one `Action` the driver must perform next; the driver reports the
//! outcome through the matching `on_*` method. Because the machine only
//! hands out a new action after the previous one completed, at most one
//! resolve, connect, handshake, send, receive, close or retry wait is ever
//! outstanding.
//!
//! ```text
//!  initialized/closed ──▶ resolve ──▶ connect ──▶ [handshake] ──▶ connected
//!          ▲                                                        │
//!          │                                        send ◀── idle ◀─┤
//!        close ◀── abortConnection ◀── (no keep-alive) ── receive ◀─┘
//!          ▲
//!          └── retry wait ◀── *Failed
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use herald_core::{
    ClientEvent, Clock, DeliveredEvent, Destination, DropReason, DroppedEvent, HaltOutcome,
    HaltedEvent,
};
use tracing::{debug, error, info, warn};

use crate::{
    client::ClientConfig,
    error::{DeliveryError, EnqueueRejected, ErrorCategory, Result},
    pipeline::{extract_event_id, ResponseHead},
    queue::DeliveryQueue,
    retry::{RetryController, RetryDecision, RetryPolicyAction},
    state::ConnState,
};

/// Next operation the driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until new work or a completion arrives.
    None,
    /// Resolve the destination host.
    Resolve,
    /// Connect to the resolved endpoints, in order.
    Connect(Vec<SocketAddr>),
    /// Run the TLS handshake on the open stream.
    Handshake,
    /// Write a request carrying this payload.
    Send(String),
    /// Read one response.
    Receive,
    /// Shut the transport down (a no-op if none is open).
    Close,
    /// Start the retry timer.
    Wait(Duration),
}

/// Point-in-time view of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientSnapshot {
    /// Current connection state.
    pub state: ConnState,
    /// Payloads waiting for delivery.
    pub queue_len: usize,
    /// Retries consumed since the last success.
    pub retry_count: u32,
}

/// State, queue and retry budget of one client.
#[derive(Debug)]
pub struct ConnectionMachine {
    destination: Destination,
    state: ConnState,
    queue: DeliveryQueue,
    retry: RetryController,
    transport_open: bool,
    close_pending: bool,
    rest_close_issued: bool,
    clock: Arc<dyn Clock>,
    events: Vec<ClientEvent>,
}

impl ConnectionMachine {
    /// Creates a machine in `initialized` with an empty queue.
    pub fn new(destination: Destination, config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            destination,
            state: ConnState::Initialized,
            queue: DeliveryQueue::new(config.queue_capacity),
            retry: RetryController::new(config.retry_policy.clone()),
            transport_open: false,
            close_pending: false,
            rest_close_issued: false,
            clock,
            events: Vec::new(),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Destination this machine delivers to.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Pending payloads.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Retry counter and policy.
    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    /// Whether the driver holds an open stream to the destination.
    pub fn has_transport(&self) -> bool {
        self.transport_open
    }

    /// Current state, queue length and retry count.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state,
            queue_len: self.queue.len(),
            retry_count: self.retry.retry_count(),
        }
    }

    /// Notifications produced since the last call.
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Queues a payload and starts delivery if the client is waiting for work.
    ///
    /// # Errors
    ///
    /// Returns `EnqueueRejected` if the client is suspended or terminated,
    /// or if the queue is full. The payload is dropped in both cases.
    pub fn enqueue(&mut self, payload: String) -> std::result::Result<Action, EnqueueRejected> {
        let event_id = extract_event_id(&payload);

        let pushed = if self.state.is_inactive() {
            Err(EnqueueRejected::Inactive(self.state))
        } else {
            self.queue.push(payload)
        };

        if let Err(rejected) = pushed {
            warn!(
                state = %self.state,
                event_id = ?event_id,
                reason = %rejected,
                "payload rejected"
            );
            self.emit_dropped(event_id, rejected.into());
            return Err(rejected);
        }

        debug!(event_id = ?event_id, queue_len = self.queue.len(), "payload queued");
        Ok(self.dispatch())
    }

    /// Updates the retry budget and interval.
    pub fn configure_retry(&mut self, max_attempts: u32, interval: Duration) {
        debug!(max_attempts, interval_secs = interval.as_secs(), "retry policy updated");
        self.retry.configure(max_attempts, interval);
    }

    /// Updates the action applied once retries are exhausted.
    pub fn set_retry_action(&mut self, action: RetryPolicyAction) {
        debug!(action = %action, "retry policy action updated");
        self.retry.set_action(action);
    }

    /// Moves a suspended client back into service.
    ///
    /// The retry budget is restored and the client waits in `closed` for new
    /// payloads. A terminated client cannot be resumed.
    pub fn resume(&mut self) -> Action {
        match self.state {
            ConnState::Suspended => {
                self.retry.reset();
                self.rest_close_issued = false;
                self.state =
                    if self.close_pending { ConnState::CloseInProgress } else { ConnState::Closed };
                info!("client resumed");
                self.dispatch()
            },
            ConnState::Terminated => {
                warn!("terminated client cannot be resumed");
                Action::None
            },
            state => {
                debug!(state = %state, "resume ignored, client is not suspended");
                Action::None
            },
        }
    }

    /// Decides the next action for the current state.
    pub fn dispatch(&mut self) -> Action {
        match self.state {
            state if state.is_in_progress() => Action::None,
            ConnState::Initialized | ConnState::Closed => {
                if self.queue.is_empty() {
                    Action::None
                } else {
                    self.state = ConnState::ResolveInProgress;
                    Action::Resolve
                }
            },
            ConnState::Suspended => {
                if self.rest_close_issued {
                    Action::None
                } else {
                    self.rest_close_issued = true;
                    self.begin_close()
                }
            },
            ConnState::Terminated => {
                debug!("client terminated, nothing to do");
                Action::None
            },
            state if state.is_failure() => self.handle_failure(),
            ConnState::Connected | ConnState::Idle => match self.queue.front() {
                Some(payload) => {
                    let payload = payload.to_string();
                    self.state = ConnState::SendInProgress;
                    Action::Send(payload)
                },
                None => Action::None,
            },
            ConnState::AbortConnection => self.begin_close(),
            state => {
                error!(state = %state, "unhandled connection state");
                Action::None
            },
        }
    }

    /// Name resolution finished.
    pub fn on_resolved(&mut self, result: Result<Vec<SocketAddr>>) -> Action {
        match result {
            Ok(endpoints) if !endpoints.is_empty() => {
                debug!(endpoints = endpoints.len(), "destination resolved");
                self.state = ConnState::ConnectInProgress;
                Action::Connect(endpoints)
            },
            Ok(_) => {
                let host = self.destination.host().to_string();
                self.fail(ConnState::ResolveFailed, &DeliveryError::NoEndpoints { host })
            },
            Err(e) => self.fail(ConnState::ResolveFailed, &e),
        }
    }

    /// TCP connect finished.
    pub fn on_connected(&mut self, result: Result<()>) -> Action {
        match result {
            Ok(()) if self.destination.is_tls() => {
                debug!("tcp connected, starting tls handshake");
                self.transport_open = true;
                self.state = ConnState::HandshakeInProgress;
                Action::Handshake
            },
            Ok(()) => {
                debug!("connected");
                self.transport_open = true;
                self.state = ConnState::Connected;
                self.dispatch()
            },
            Err(e) => self.fail(ConnState::ConnectFailed, &e),
        }
    }

    /// TLS handshake finished.
    pub fn on_handshake(&mut self, result: Result<()>) -> Action {
        match result {
            Ok(()) => {
                debug!("tls handshake complete");
                self.state = ConnState::Connected;
                self.dispatch()
            },
            Err(e) => {
                self.transport_open = false;
                self.fail(ConnState::HandshakeFailed, &e)
            },
        }
    }

    /// Request write finished.
    pub fn on_sent(&mut self, result: Result<()>) -> Action {
        match result {
            Ok(()) => {
                self.state = ConnState::RecvInProgress;
                Action::Receive
            },
            Err(e) => {
                self.transport_open = false;
                self.fail(ConnState::SendFailed, &e)
            },
        }
    }

    /// Response read finished.
    ///
    /// A 2xx status removes the head payload and restores the retry budget.
    /// The connection is kept for the next payload only if the response
    /// allows keep-alive.
    pub fn on_received(&mut self, result: Result<ResponseHead>) -> Action {
        let head = match result {
            Ok(head) if head.is_success() => head,
            Ok(head) => {
                let status_error = DeliveryError::HttpStatus { status_code: head.status };
                return self.fail(ConnState::RecvFailed, &status_error);
            },
            Err(e) => {
                self.transport_open = false;
                return self.fail(ConnState::RecvFailed, &e);
            },
        };

        let event_id = self.queue.pop_front().as_deref().and_then(extract_event_id);
        self.retry.reset();

        info!(
            event_id = ?event_id,
            status = head.status,
            keep_alive = head.keep_alive,
            "event delivered"
        );
        self.events.push(ClientEvent::Delivered(DeliveredEvent {
            subscription_id: self.destination.subscription_id().clone(),
            event_id,
            status: head.status,
            delivered_at: self.clock.timestamp(),
        }));

        self.state = if head.keep_alive { ConnState::Idle } else { ConnState::AbortConnection };
        self.dispatch()
    }

    /// The retry timer expired. Delivery restarts from a clean resolve.
    pub fn on_timer_fired(&mut self) -> Action {
        self.retry.timer_fired();
        debug!(retry_count = self.retry.retry_count(), "retry timer fired");
        self.begin_close()
    }

    /// Transport shutdown finished.
    ///
    /// `suspended` and `terminated` are left untouched.
    pub fn on_closed(&mut self) -> Action {
        self.close_pending = false;
        self.transport_open = false;

        if self.state.is_inactive() {
            debug!(state = %self.state, "transport closed, client at rest");
            return Action::None;
        }

        self.state = ConnState::Closed;
        self.dispatch()
    }

    fn begin_close(&mut self) -> Action {
        self.close_pending = true;
        if !self.state.is_inactive() {
            self.state = ConnState::CloseInProgress;
        }
        Action::Close
    }

    fn fail(&mut self, state: ConnState, error: &DeliveryError) -> Action {
        let event_id = self.queue.front().and_then(extract_event_id);
        let category = ErrorCategory::from(error);

        match state {
            ConnState::ConnectFailed => warn!(
                state = %state,
                category = %category,
                error = %error,
                "connect failed"
            ),
            _ => error!(
                state = %state,
                category = %category,
                event_id = ?event_id,
                error = %error,
                "delivery step failed"
            ),
        }

        self.state = state;
        self.dispatch()
    }

    fn handle_failure(&mut self) -> Action {
        match self.retry.decide() {
            RetryDecision::Wait { delay, attempt } => {
                debug!(
                    retry_count = attempt,
                    delay_secs = delay.as_secs(),
                    "scheduling retry"
                );
                Action::Wait(delay)
            },
            RetryDecision::AlreadyWaiting => Action::None,
            RetryDecision::Terminate => self.halt(HaltOutcome::Terminated),
            RetryDecision::Suspend => self.halt(HaltOutcome::Suspended),
            RetryDecision::DropEvent => {
                let event_id = self.queue.pop_front().as_deref().and_then(extract_event_id);
                warn!(
                    event_id = ?event_id,
                    action = %self.retry.policy().action,
                    "retries exhausted, dropping event"
                );
                self.emit_dropped(event_id, DropReason::RetriesExhausted);
                // Without a stream the next payload starts from a fresh resolve.
                self.state =
                    if self.transport_open { ConnState::Idle } else { ConnState::Closed };
                self.dispatch()
            },
        }
    }

    fn halt(&mut self, outcome: HaltOutcome) -> Action {
        let discarded = self.queue.clear();
        self.state = match outcome {
            HaltOutcome::Terminated => ConnState::Terminated,
            HaltOutcome::Suspended => ConnState::Suspended,
        };

        error!(
            state = %self.state,
            retry_count = self.retry.retry_count(),
            discarded,
            action = %self.retry.policy().action,
            "retries exhausted"
        );
        self.events.push(ClientEvent::Halted(HaltedEvent {
            subscription_id: self.destination.subscription_id().clone(),
            outcome,
            discarded,
            halted_at: self.clock.timestamp(),
        }));

        self.dispatch()
    }

    fn emit_dropped(&mut self, event_id: Option<u64>, reason: DropReason) {
        self.events.push(ClientEvent::Dropped(DroppedEvent {
            subscription_id: self.destination.subscription_id().clone(),
            event_id,
            reason,
            dropped_at: self.clock.timestamp(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use herald_core::TestClock;

    use super::*;
    use crate::retry::RetryPolicy;

    fn machine(url: &str) -> ConnectionMachine {
        let destination = Destination::from_url("1", url, &[]).unwrap();
        ConnectionMachine::new(destination, &ClientConfig::default(), Arc::new(TestClock::new()))
    }

    fn endpoint() -> Vec<SocketAddr> {
        vec!["10.0.0.5:9000".parse().unwrap()]
    }

    fn ok_head(keep_alive: bool) -> Result<ResponseHead> {
        Ok(ResponseHead { status: 200, keep_alive, content_length: Some(0) })
    }

    #[test]
    fn empty_queue_does_nothing() {
        let mut m = machine("http://10.0.0.5:9000/events");
        assert_eq!(m.dispatch(), Action::None);
        assert_eq!(m.state(), ConnState::Initialized);
    }

    #[test]
    fn plain_http_goes_straight_to_send() {
        let mut m = machine("http://10.0.0.5:9000/events");

        assert_eq!(m.enqueue(r#"{"Id":1}"#.into()), Ok(Action::Resolve));
        assert_eq!(m.on_resolved(Ok(endpoint())), Action::Connect(endpoint()));
        assert_eq!(m.on_connected(Ok(())), Action::Send(r#"{"Id":1}"#.into()));
        assert_eq!(m.state(), ConnState::SendInProgress);
    }

    #[test]
    fn https_handshakes_before_send() {
        let mut m = machine("https://listener.example.com/events");

        m.enqueue("{}".into()).unwrap();
        m.on_resolved(Ok(endpoint()));
        assert_eq!(m.on_connected(Ok(())), Action::Handshake);
        assert_eq!(m.state(), ConnState::HandshakeInProgress);
        assert_eq!(m.on_handshake(Ok(())), Action::Send("{}".into()));
    }

    #[test]
    fn empty_resolution_is_a_failure() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.enqueue("{}".into()).unwrap();

        assert_eq!(m.on_resolved(Ok(vec![])), Action::Wait(Duration::ZERO));
        assert_eq!(m.state(), ConnState::ResolveFailed);
    }

    #[test]
    fn no_keep_alive_forces_close_then_resolve() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.enqueue("a".into()).unwrap();
        m.enqueue("b".into()).unwrap();
        m.on_resolved(Ok(endpoint()));
        m.on_connected(Ok(()));
        m.on_sent(Ok(()));

        assert_eq!(m.on_received(ok_head(false)), Action::Close);
        assert_eq!(m.state(), ConnState::CloseInProgress);
        assert_eq!(m.on_closed(), Action::Resolve);
        assert_eq!(m.queue().len(), 1);
    }

    #[test]
    fn in_progress_states_issue_nothing() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.enqueue("a".into()).unwrap();

        assert_eq!(m.state(), ConnState::ResolveInProgress);
        assert_eq!(m.enqueue("b".into()), Ok(Action::None));
        assert_eq!(m.dispatch(), Action::None);
    }

    #[test]
    fn close_never_overwrites_terminated() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.enqueue("a".into()).unwrap();

        assert_eq!(m.on_resolved(Err(DeliveryError::resolve("h", "nxdomain"))), Action::None);
        assert_eq!(m.state(), ConnState::Terminated);
        assert_eq!(m.on_closed(), Action::None);
        assert_eq!(m.state(), ConnState::Terminated);
    }

    #[test]
    fn suspend_closes_transport_once() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::SuspendRetries);
        m.enqueue("a".into()).unwrap();

        assert_eq!(m.on_resolved(Ok(vec![])), Action::Close);
        assert_eq!(m.state(), ConnState::Suspended);
        assert_eq!(m.dispatch(), Action::None);
        assert_eq!(m.on_closed(), Action::None);
        assert_eq!(m.state(), ConnState::Suspended);
    }

    #[test]
    fn resume_reopens_suspended_client() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::SuspendRetries);
        m.enqueue("a".into()).unwrap();
        m.on_resolved(Ok(vec![]));
        m.on_closed();

        assert_eq!(m.resume(), Action::None);
        assert_eq!(m.state(), ConnState::Closed);
        assert_eq!(m.enqueue("b".into()), Ok(Action::Resolve));
    }

    #[test]
    fn resume_during_pending_close_waits_for_it() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::SuspendRetries);
        m.enqueue("a".into()).unwrap();
        m.on_resolved(Ok(vec![]));

        assert_eq!(m.resume(), Action::None);
        assert_eq!(m.state(), ConnState::CloseInProgress);
        assert_eq!(m.on_closed(), Action::None);
        assert_eq!(m.state(), ConnState::Closed);
    }

    #[test]
    fn retry_wait_is_single_flight() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.enqueue("a".into()).unwrap();

        assert_eq!(m.on_resolved(Ok(vec![])), Action::Wait(Duration::ZERO));
        assert_eq!(m.enqueue("b".into()), Ok(Action::None));
        assert_eq!(m.on_timer_fired(), Action::Close);
        assert_eq!(m.on_closed(), Action::Resolve);
    }

    #[test]
    fn skipped_payload_without_transport_reconnects() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::RetryForever);
        m.enqueue("a".into()).unwrap();
        m.enqueue("b".into()).unwrap();
        m.on_resolved(Ok(endpoint()));

        let refused = Err(DeliveryError::connect("connection refused"));
        assert_eq!(m.on_connected(refused), Action::Resolve);
        assert_eq!(m.state(), ConnState::ResolveInProgress);
        assert!(!m.has_transport());
        assert_eq!(m.queue().front(), Some("b"));
    }

    #[test]
    fn skipped_payload_reuses_open_transport() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(0, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::RetryForever);
        m.enqueue("a".into()).unwrap();
        m.enqueue("b".into()).unwrap();
        m.on_resolved(Ok(endpoint()));
        m.on_connected(Ok(()));
        m.on_sent(Ok(()));

        let rejected = Ok(ResponseHead { status: 500, keep_alive: true, content_length: Some(0) });
        assert_eq!(m.on_received(rejected), Action::Send("b".into()));
        assert!(m.has_transport());
    }

    #[test]
    fn failed_read_forgets_transport() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.enqueue("a".into()).unwrap();
        m.on_resolved(Ok(endpoint()));
        m.on_connected(Ok(()));
        assert!(m.has_transport());
        m.on_sent(Ok(()));

        m.on_received(Err(DeliveryError::read("connection reset")));
        assert!(!m.has_transport());
    }

    #[test]
    fn enqueue_during_final_wait_does_not_apply_policy() {
        let mut m = machine("http://10.0.0.5:9000/events");
        m.configure_retry(1, Duration::ZERO);
        m.set_retry_action(RetryPolicyAction::RetryForever);
        m.enqueue("a".into()).unwrap();

        assert_eq!(m.on_resolved(Ok(vec![])), Action::Wait(Duration::ZERO));
        assert_eq!(m.enqueue("b".into()), Ok(Action::None));
        assert_eq!(m.queue().len(), 2);
        assert!(m.take_events().is_empty());

        assert_eq!(m.on_timer_fired(), Action::Close);
        assert_eq!(m.on_closed(), Action::Resolve);
    }

    #[test]
    fn rejected_payloads_emit_drop_events() {
        let destination = Destination::from_url("1", "http://10.0.0.5/", &[]).unwrap();
        let config = ClientConfig {
            queue_capacity: 1,
            retry_policy: RetryPolicy::default(),
            ..ClientConfig::default()
        };
        let mut m = ConnectionMachine::new(destination, &config, Arc::new(TestClock::new()));

        m.enqueue(r#"{"Id":1}"#.into()).unwrap();
        assert_eq!(
            m.enqueue(r#"{"Id":2}"#.into()),
            Err(EnqueueRejected::QueueFull { capacity: 1 })
        );

        let events = m.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ClientEvent::Dropped(DroppedEvent { event_id: Some(2), reason: DropReason::QueueFull, .. })
        ));
    }
}
