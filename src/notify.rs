//! Notifier: fan-out of state transitions as versioned JSON events (spec
//! §4.9). Consumed from a bounded channel, grounded on the teacher's
//! `tokio::sync::mpsc` usage in its own service layer.

use serde::Serialize;
use tokio::sync::mpsc::Receiver;
use tracing::info;

pub const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotifyType {
    #[serde(rename = "NETWORK")]
    Network,
    #[serde(rename = "CONTAINER")]
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotifyOperation {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "JOIN")]
    Join,
    #[serde(rename = "LEAVE")]
    Leave,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyMsg {
    #[serde(rename = "Type")]
    pub msg_type: NotifyType,
    #[serde(rename = "Operation")]
    pub operation: NotifyOperation,
    #[serde(rename = "NetworkState")]
    pub network_name: String,
    #[serde(rename = "Details")]
    pub details: NotifyDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyMsgEnvelope {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Time")]
    pub time: i64,
    #[serde(rename = "Msg")]
    pub msg: NotifyMsg,
}

impl NotifyMsgEnvelope {
    pub fn new(time: i64, msg: NotifyMsg) -> Self {
        Self { version: 1, time, msg }
    }
}

/// Drains notifications from the bounded channel and logs each as JSON.
/// Runs for the process lifetime as its own `tokio::task`.
pub async fn run(mut rx: Receiver<NotifyMsgEnvelope>) {
    while let Some(envelope) = rx.recv().await {
        match serde_json::to_string(&envelope) {
            Ok(json) => info!(notification = %json, "emitting notification"),
            Err(e) => tracing::error!(%e, "failed to serialize notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_expected_field_names() {
        let envelope = NotifyMsgEnvelope::new(
            1_700_000_000,
            NotifyMsg {
                msg_type: NotifyType::Network,
                operation: NotifyOperation::Create,
                network_name: "mynet".to_string(),
                details: NotifyDetails {
                    name: Some("mynet".to_string()),
                    ..Default::default()
                },
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["Version"], 1);
        assert_eq!(json["Msg"]["Type"], "NETWORK");
        assert_eq!(json["Msg"]["Operation"], "CREATE");
    }
}
