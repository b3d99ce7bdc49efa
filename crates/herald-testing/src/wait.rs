//! Deadline-bounded waits on a client's published snapshot.
//!
//! The snapshot channel only keeps the latest value, so intermediate states
//! can be skipped. Wait for resting conditions (a terminal state, a drained
//! queue) rather than for transient ones.

use std::time::Duration;

use anyhow::{anyhow, Result};
use herald_delivery::{ClientSnapshot, ConnState, EventClient};

/// Default deadline for snapshot waits.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Waits until `predicate` holds for the client's snapshot.
///
/// # Errors
///
/// Returns an error naming the last snapshot if `timeout` elapses or the
/// client stops first.
pub async fn wait_for_snapshot<F>(
    client: &EventClient,
    timeout: Duration,
    mut predicate: F,
) -> Result<ClientSnapshot>
where
    F: FnMut(&ClientSnapshot) -> bool,
{
    let mut receiver = client.subscribe();

    let outcome =
        match tokio::time::timeout(timeout, receiver.wait_for(|snapshot| predicate(snapshot))).await {
            Ok(Ok(snapshot)) => Ok(*snapshot),
            Ok(Err(_)) => Err(anyhow!("client stopped while waiting; last {:?}", client.snapshot())),
            Err(_) => Err(anyhow!("timed out after {timeout:?}; last {:?}", client.snapshot())),
        };
    outcome
}

/// Waits until the client reaches `state`.
///
/// # Errors
///
/// See `wait_for_snapshot`.
pub async fn wait_for_state(client: &EventClient, state: ConnState) -> Result<ClientSnapshot> {
    wait_for_snapshot(client, DEFAULT_WAIT, |snapshot| snapshot.state == state).await
}

/// Waits until the queue is empty and the client is idle on an open
/// connection or resting after a close.
///
/// # Errors
///
/// See `wait_for_snapshot`.
pub async fn wait_for_drained(client: &EventClient) -> Result<ClientSnapshot> {
    wait_for_snapshot(client, DEFAULT_WAIT, |snapshot| {
        snapshot.queue_len == 0
            && matches!(
                snapshot.state,
                ConnState::Idle | ConnState::Closed | ConnState::Suspended | ConnState::Terminated
            )
    })
    .await
}

/// Polls `condition` every 10ms until it holds.
///
/// # Errors
///
/// Returns an error if `timeout` elapses first.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("condition not met within {timeout:?}"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
