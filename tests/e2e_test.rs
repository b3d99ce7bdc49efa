//! End-to-end tests: configuration through delivery, and the binary itself.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{process::Stdio, time::Duration};

use anyhow::Result;
use figment::{providers::Serialized, Figment};
use herald::Config;
use herald_delivery::{ConnState, EventClient};
use herald_testing::{wait_for_drained, MockSubscriber, RecordingEventHandler, Reply};
use serde_json::json;
use tokio::{io::AsyncWriteExt, process::Command};

fn config_for(url: String) -> Config {
    Config {
        destination_url: url,
        destination_headers: "X-Subscription-Key: k1".to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn configured_client_delivers_with_extra_headers() -> Result<()> {
    let subscriber = MockSubscriber::start().await?;
    let defaults = Serialized::defaults(config_for(subscriber.url("/events")));
    let config = Config::from_figment(Figment::from(defaults))?;
    let recorder = RecordingEventHandler::new();

    let client = EventClient::builder(config.to_destination()?)
        .config(config.to_client_config())
        .event_handler(recorder.clone())
        .spawn()?;

    let payload = json!({ "Id": 11, "Events": [] }).to_string();
    client.enqueue(payload.clone())?;
    recorder.wait_for_events(1).await;
    wait_for_drained(&client).await?;

    let request = &subscriber.requests()[0];
    assert_eq!(request.body, payload);
    assert_eq!(request.header("x-subscription-key"), Some("k1"));
    assert_eq!(client.connection_state(), ConnState::Idle);
    Ok(())
}

#[tokio::test]
async fn binary_delivers_stdin_lines_and_exits() -> Result<()> {
    let subscriber = MockSubscriber::with_script(vec![Reply::StatusAndClose(200)]).await?;
    let payloads: Vec<String> =
        (1..=3).map(|id| json!({ "Id": id, "Events": [] }).to_string()).collect();

    let mut child = Command::new(env!("CARGO_BIN_EXE_herald"))
        .env("DESTINATION_URL", subscriber.url("/events"))
        .env("SUBSCRIPTION_ID", "e2e")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin is piped");
    for payload in &payloads {
        stdin.write_all(format!("{payload}\n\n").as_bytes()).await?;
    }
    drop(stdin);

    let status = tokio::time::timeout(Duration::from_secs(20), child.wait()).await??;

    assert!(status.success());
    assert_eq!(subscriber.bodies(), payloads);
    assert_eq!(subscriber.connection_count(), 2);
    Ok(())
}

#[tokio::test]
async fn binary_exits_when_client_terminates() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut child = Command::new(env!("CARGO_BIN_EXE_herald"))
        .env("DESTINATION_URL", format!("http://{addr}/events"))
        .env("MAX_RETRY_ATTEMPTS", "1")
        .env("RETRY_INTERVAL_SECONDS", "0")
        .env("RETRY_POLICY_ACTION", "TerminateAfterRetries")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin is piped");
    stdin.write_all(b"{\"Id\":1}\n{\"Id\":2}\n").await?;
    drop(stdin);

    let status = tokio::time::timeout(Duration::from_secs(20), child.wait()).await??;
    assert!(status.success());
    Ok(())
}

#[test]
fn missing_destination_fails_to_load() {
    let err = Config::from_figment(Figment::from(Serialized::defaults(Config::default())))
        .unwrap_err();
    assert!(format!("{err:#}").contains("destination_url"));
}
