//! Event client actor and its handle.
//!
//! Each destination gets one spawned task that owns the connection machine,
//! the transport and the single in-flight operation. Callers talk to it
//! through a cheap, clonable `EventClient` handle. Dropping every handle or
//! calling `shutdown` ends the task, and any outstanding operation is
//! dropped with it.

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};

use herald_core::{
    Clock, Destination, EventHandler, NoOpEventHandler, RealClock, SubscriptionId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    machine::{Action, ClientSnapshot, ConnectionMachine},
    pipeline::{
        encode_request, read_response, write_request, ResponseHead, DEFAULT_RESPONSE_BODY_LIMIT,
    },
    queue::DEFAULT_QUEUE_CAPACITY,
    retry::{RetryPolicy, RetryPolicyAction},
    state::ConnState,
    transport::{self, BoxedStream, Connector, DnsResolver, Resolver, TcpConnector},
};

/// Per-client tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Payloads held before new ones are dropped.
    pub queue_capacity: usize,
    /// Deadline for connect and handshake.
    pub connect_timeout: Duration,
    /// Deadline for the request write and for the full response read.
    pub response_timeout: Duration,
    /// Largest accepted response body in bytes.
    pub response_body_limit: usize,
    /// Initial retry policy.
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECONDS),
            response_timeout: Duration::from_secs(crate::DEFAULT_RESPONSE_TIMEOUT_SECONDS),
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Rejects values that would stall or disable the client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be greater than 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(DeliveryError::configuration("connect_timeout must be greater than 0"));
        }
        if self.response_timeout.is_zero() {
            return Err(DeliveryError::configuration("response_timeout must be greater than 0"));
        }
        if self.response_body_limit == 0 {
            return Err(DeliveryError::configuration("response_body_limit must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Command {
    Enqueue(String),
    ConfigureRetry { max_attempts: u32, interval: Duration },
    SetRetryAction(RetryPolicyAction),
    Resume,
}

enum Completion {
    Resolved(Result<Vec<SocketAddr>>),
    Connected(Result<BoxedStream>),
    Handshaken(Result<BoxedStream>),
    Sent { stream: Option<BoxedStream>, result: Result<()> },
    Received { stream: Option<BoxedStream>, result: Result<ResponseHead> },
    Closed,
    TimerFired,
}

type InFlight = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// Handle to a running delivery client.
///
/// Cloning is cheap; all clones drive the same client.
#[derive(Debug, Clone)]
pub struct EventClient {
    subscription_id: SubscriptionId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ClientSnapshot>,
    cancellation_token: CancellationToken,
}

impl EventClient {
    /// Starts a client for `destination` with system DNS, TCP and rustls.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for an invalid config and
    /// `DeliveryError::Tls` if the default TLS setup fails.
    pub fn new(destination: Destination, config: ClientConfig) -> Result<Self> {
        Self::builder(destination).config(config).spawn()
    }

    /// Starts building a client with injectable collaborators.
    pub fn builder(destination: Destination) -> EventClientBuilder {
        EventClientBuilder::new(destination)
    }

    /// Hands a payload to the client.
    ///
    /// Rejections (client suspended or terminated, queue full) are logged
    /// and reported to the event handler, never returned here.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ClientClosed` if the client task has stopped.
    pub fn enqueue(&self, payload: impl Into<String>) -> Result<()> {
        self.send(Command::Enqueue(payload.into()))
    }

    /// Sets the retry budget and the wait between retries.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ClientClosed` if the client task has stopped.
    pub fn configure_retry_policy(&self, max_attempts: u32, interval_seconds: u64) -> Result<()> {
        self.send(Command::ConfigureRetry {
            max_attempts,
            interval: Duration::from_secs(interval_seconds),
        })
    }

    /// Sets the action applied once retries are exhausted.
    ///
    /// `TerminateAfterRetries` and `SuspendRetries` are recognized; any
    /// other value keeps the client running and drops each event that
    /// exhausts its retries.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ClientClosed` if the client task has stopped.
    pub fn set_retry_policy_action(&self, action: &str) -> Result<()> {
        self.send(Command::SetRetryAction(RetryPolicyAction::from(action)))
    }

    /// Returns a suspended client to service. Terminated clients stay terminated.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ClientClosed` if the client task has stopped.
    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Latest published connection state.
    pub fn connection_state(&self) -> ConnState {
        self.snapshot.borrow().state
    }

    /// Latest published state, queue length and retry count.
    pub fn snapshot(&self) -> ClientSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver notified after every step of the client.
    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.clone()
    }

    /// Subscription this client delivers for.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Stops the client task. Queued payloads and any in-flight operation
    /// are dropped.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Whether the client task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| DeliveryError::ClientClosed)
    }
}

/// Builder for `EventClient`.
#[derive(Debug)]
pub struct EventClientBuilder {
    destination: Destination,
    config: ClientConfig,
    resolver: Arc<dyn Resolver>,
    connector: Option<Arc<dyn Connector>>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
}

impl EventClientBuilder {
    fn new(destination: Destination) -> Self {
        Self {
            destination,
            config: ClientConfig::default(),
            resolver: Arc::new(DnsResolver),
            connector: None,
            tls_config: None,
            clock: Arc::new(RealClock::new()),
            event_handler: Arc::new(NoOpEventHandler::new()),
        }
    }

    /// Client tunables.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Name resolver.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Connector, replacing the default TCP/rustls one.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// TLS configuration for the default connector.
    pub fn tls_config(mut self, tls_config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Clock driving the retry timer and event timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receiver of delivery notifications.
    pub fn event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Spawns the client task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for an invalid config and
    /// `DeliveryError::Tls` if the default TLS setup fails.
    pub fn spawn(self) -> Result<EventClient> {
        self.config.validate()?;

        let connector: Arc<dyn Connector> = match (self.connector, self.tls_config) {
            (Some(connector), _) => connector,
            (None, Some(tls_config)) => Arc::new(TcpConnector::with_tls_config(tls_config)),
            (None, None) => Arc::new(TcpConnector::new()?),
        };

        let subscription_id = self.destination.subscription_id().clone();
        let span = info_span!(
            "event_client",
            subscription_id = %subscription_id,
            destination = %self.destination,
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ClientSnapshot::default());
        let cancellation_token = CancellationToken::new();

        let actor = ClientActor {
            machine: ConnectionMachine::new(self.destination, &self.config, self.clock.clone()),
            config: self.config,
            resolver: self.resolver,
            connector,
            clock: self.clock,
            event_handler: self.event_handler,
            stream: None,
            in_flight: None,
            commands: command_rx,
            snapshot: snapshot_tx,
            cancellation_token: cancellation_token.clone(),
        };

        tokio::spawn(actor.run().instrument(span));

        Ok(EventClient {
            subscription_id,
            commands: command_tx,
            snapshot: snapshot_rx,
            cancellation_token,
        })
    }
}

struct ClientActor {
    machine: ConnectionMachine,
    config: ClientConfig,
    resolver: Arc<dyn Resolver>,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
    stream: Option<BoxedStream>,
    in_flight: Option<InFlight>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<ClientSnapshot>,
    cancellation_token: CancellationToken,
}

impl ClientActor {
    async fn run(mut self) {
        info!("event client started");

        loop {
            tokio::select! {
                () = self.cancellation_token.cancelled() => {
                    info!("event client received shutdown signal");
                    break;
                },
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all handles dropped");
                        break;
                    };
                    let action = self.handle_command(command);
                    self.perform(action);
                },
                completion = next_completion(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    let action = self.complete(completion);
                    self.perform(action);
                },
            }

            self.after_step().await;
        }

        self.commands.close();
        info!(state = %self.machine.state(), queue_len = self.machine.queue().len(), "event client stopped");
    }

    fn handle_command(&mut self, command: Command) -> Action {
        match command {
            Command::Enqueue(payload) => self.machine.enqueue(payload).unwrap_or(Action::None),
            Command::ConfigureRetry { max_attempts, interval } => {
                self.machine.configure_retry(max_attempts, interval);
                Action::None
            },
            Command::SetRetryAction(action) => {
                self.machine.set_retry_action(action);
                Action::None
            },
            Command::Resume => self.machine.resume(),
        }
    }

    fn complete(&mut self, completion: Completion) -> Action {
        match completion {
            Completion::Resolved(result) => self.machine.on_resolved(result),
            Completion::Connected(result) => {
                let result = self.keep_stream(result);
                self.machine.on_connected(result)
            },
            Completion::Handshaken(result) => {
                let result = self.keep_stream(result);
                self.machine.on_handshake(result)
            },
            Completion::Sent { stream, result } => {
                if result.is_ok() {
                    self.stream = stream;
                }
                self.machine.on_sent(result)
            },
            Completion::Received { stream, result } => {
                if result.is_ok() {
                    self.stream = stream;
                }
                self.machine.on_received(result)
            },
            Completion::Closed => self.machine.on_closed(),
            Completion::TimerFired => self.machine.on_timer_fired(),
        }
    }

    fn keep_stream(&mut self, result: Result<BoxedStream>) -> Result<()> {
        result.map(|stream| {
            self.stream = Some(stream);
        })
    }

    fn perform(&mut self, action: Action) {
        if action == Action::None {
            return;
        }
        if self.in_flight.is_some() {
            error!(action = ?action, "operation already in flight, dropping action");
            return;
        }

        let operation: InFlight = match action {
            Action::None => return,
            Action::Resolve => {
                let resolver = self.resolver.clone();
                let host = self.machine.destination().host().to_string();
                let port = self.machine.destination().port();
                debug!(host = %host, port, "resolving destination");
                Box::pin(async move { Completion::Resolved(resolver.resolve(&host, port).await) })
            },
            Action::Connect(endpoints) => {
                let connector = self.connector.clone();
                let deadline = self.config.connect_timeout;
                Box::pin(async move {
                    let result = tokio::time::timeout(deadline, connector.connect(&endpoints))
                        .await
                        .unwrap_or_else(|_| Err(DeliveryError::timeout("connect", deadline.as_secs())));
                    Completion::Connected(result)
                })
            },
            Action::Handshake => {
                let connector = self.connector.clone();
                let host = self.machine.destination().host().to_string();
                let deadline = self.config.connect_timeout;
                let stream = self.stream.take();
                Box::pin(async move {
                    let Some(stream) = stream else {
                        return Completion::Handshaken(Err(DeliveryError::NotConnected));
                    };
                    let result = tokio::time::timeout(deadline, connector.handshake(&host, stream))
                        .await
                        .unwrap_or_else(|_| {
                            Err(DeliveryError::timeout("tls handshake", deadline.as_secs()))
                        });
                    Completion::Handshaken(result)
                })
            },
            Action::Send(payload) => {
                let request = encode_request(self.machine.destination(), &payload);
                let deadline = self.config.response_timeout;
                let stream = self.stream.take();
                Box::pin(async move {
                    let Some(mut stream) = stream else {
                        return Completion::Sent { stream: None, result: Err(DeliveryError::NotConnected) };
                    };
                    let result = tokio::time::timeout(deadline, write_request(&mut stream, &request))
                        .await
                        .unwrap_or_else(|_| Err(DeliveryError::timeout("write", deadline.as_secs())));
                    Completion::Sent { stream: Some(stream), result }
                })
            },
            Action::Receive => {
                let deadline = self.config.response_timeout;
                let body_limit = self.config.response_body_limit;
                let stream = self.stream.take();
                Box::pin(async move {
                    let Some(mut stream) = stream else {
                        return Completion::Received {
                            stream: None,
                            result: Err(DeliveryError::NotConnected),
                        };
                    };
                    let result = tokio::time::timeout(deadline, read_response(&mut stream, body_limit))
                        .await
                        .unwrap_or_else(|_| Err(DeliveryError::timeout("response", deadline.as_secs())));
                    Completion::Received { stream: Some(stream), result }
                })
            },
            Action::Close => {
                let deadline = self.config.connect_timeout;
                let stream = self.stream.take();
                Box::pin(async move {
                    if let Some(mut stream) = stream {
                        if tokio::time::timeout(deadline, transport::shutdown(&mut stream)).await.is_err() {
                            debug!("transport shutdown timed out");
                        }
                    }
                    Completion::Closed
                })
            },
            Action::Wait(delay) => {
                let clock = self.clock.clone();
                Box::pin(async move {
                    clock.sleep(delay).await;
                    Completion::TimerFired
                })
            },
        };

        self.in_flight = Some(operation);
    }

    async fn after_step(&mut self) {
        if self.machine.state() == ConnState::Terminated && self.stream.take().is_some() {
            debug!("released transport of terminated client");
        }

        self.snapshot.send_replace(self.machine.snapshot());

        for event in self.machine.take_events() {
            self.event_handler.handle_event(event).await;
        }
    }
}

async fn next_completion(in_flight: &mut Option<InFlight>) -> Completion {
    match in_flight.as_mut() {
        Some(operation) => operation.await,
        None => std::future::pending().await,
    }
}
