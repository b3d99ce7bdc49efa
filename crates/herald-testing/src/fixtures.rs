//! Payload and destination fixtures.

use std::time::Duration;

use anyhow::Result;
use herald_core::Destination;
use herald_delivery::ClientConfig;
use serde_json::json;

/// Redfish-style event payload carrying `Id = id`.
pub fn event_payload(id: u64) -> String {
    json!({
        "@odata.type": "#Event.v1_4_0.Event",
        "Id": id,
        "Name": "Event Array",
        "Context": "herald-test",
        "Events": [{
            "EventType": "Alert",
            "EventId": id.to_string(),
            "Severity": "OK",
            "Message": format!("test event {id}"),
            "MessageId": "ResourceEvent.1.0.ResourceChanged",
            "OriginOfCondition": { "@odata.id": "/redfish/v1/Systems/system" },
        }],
    })
    .to_string()
}

/// Payloads with ids `1..=count`.
pub fn payloads(count: u64) -> Vec<String> {
    (1..=count).map(event_payload).collect()
}

/// `http` destination for `url` under subscription `"1"`.
///
/// # Errors
///
/// Returns an error if `url` is not a valid destination.
pub fn destination(url: &str) -> Result<Destination> {
    Ok(Destination::from_url("1", url, &[])?)
}

/// Client config with short deadlines, for tests that expect failures.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_its_id() {
        let value: serde_json::Value = serde_json::from_str(&event_payload(7)).unwrap();
        assert_eq!(value["Id"], 7);
        assert_eq!(herald_delivery::pipeline::extract_event_id(&event_payload(7)), Some(7));
    }
}
