//! Herald event delivery client.
//!
//! Reads newline-delimited JSON payloads from stdin and delivers them, in
//! order, to the configured subscriber. Exits once stdin is closed and every
//! payload was delivered or dropped, or on Ctrl-C / SIGTERM.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use herald::Config;
use herald_core::{ClientEvent, EventHandler};
use herald_delivery::EventClient;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Notify,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        subscription_id = %config.subscription_id,
        destination = %config.destination_url,
        max_retry_attempts = config.max_retry_attempts,
        retry_interval_seconds = config.retry_interval_seconds,
        retry_policy_action = %config.retry_policy_action,
        "Configuration loaded"
    );

    let progress = Arc::new(Progress::default());
    let client = EventClient::builder(config.to_destination()?)
        .config(config.to_client_config())
        .event_handler(progress.clone())
        .spawn()
        .context("Failed to start event client")?;

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received");
        },
        result = deliver_stdin(&client, &progress) => {
            let enqueued = result?;
            info!(enqueued, settled = progress.settled(), "All payloads settled");
        },
    }

    let snapshot = client.snapshot();
    client.shutdown();
    info!(state = %snapshot.state, queue_len = snapshot.queue_len, "Herald shutdown complete");
    Ok(())
}

/// Enqueues every non-empty stdin line, then waits until each one was
/// delivered or dropped.
async fn deliver_stdin(client: &EventClient, progress: &Progress) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut enqueued = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let payload = line.trim();
        if payload.is_empty() {
            continue;
        }
        client.enqueue(payload).context("Event client stopped")?;
        enqueued += 1;
    }

    info!(enqueued, "stdin closed, waiting for queue to drain");
    progress.wait_for(enqueued).await;
    Ok(enqueued)
}

/// Counts payloads that left the client, delivered or not.
#[derive(Debug, Default)]
struct Progress {
    settled: AtomicUsize,
    notify: Notify,
}

impl Progress {
    fn settled(&self) -> usize {
        self.settled.load(Ordering::SeqCst)
    }

    async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.settled() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for Progress {
    async fn handle_event(&self, event: ClientEvent) {
        let settled = match &event {
            ClientEvent::Delivered(_) | ClientEvent::Dropped(_) => 1,
            ClientEvent::Halted(halted) => {
                warn!(outcome = ?halted.outcome, discarded = halted.discarded, "Client halted");
                halted.discarded
            },
        };
        self.settled.fetch_add(settled, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Initializes tracing with the configured filter (`RUST_LOG` by default).
fn init_tracing(filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(filter).context("Invalid RUST_LOG filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
