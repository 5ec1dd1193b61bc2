use relive_engine::lifecycle::StatusSnapshot;
use relive_engine::{LifecycleEvent, SessionCredential};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    Ping,
    /// Open a context for the credential, replacing any active one.
    Open { credential: SessionCredential },
    Close,
    ToggleDevtools,
    Status,
    /// Switch this connection into event streaming until it closes.
    Watch,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Pong,
    Ok,
    Status { status: StatusSnapshot },
    Event { event: EventWire },
    Error { code: String, message: String },
}

/// Wire form of engine lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventWire {
    Loading,
    Loaded,
    Error { message: String },
    Closed,
}

impl From<LifecycleEvent> for EventWire {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Loading => EventWire::Loading,
            LifecycleEvent::Loaded => EventWire::Loaded,
            LifecycleEvent::Error(message) => EventWire::Error { message },
            LifecycleEvent::Closed => EventWire::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_as_tagged_json() {
        let json = r#"{"type":"open","credential":{"id":"s1","cookieBlob":"a=b","fingerprint":"f"}}"#;
        let request: DaemonRequest = serde_json::from_str(json).unwrap();
        match request {
            DaemonRequest::Open { credential } => assert_eq!(credential.id, "s1"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn event_wire_tags_error_with_message() {
        let wire = EventWire::from(LifecycleEvent::Error("boom".into()));
        let json = serde_json::to_string(&DaemonResponse::Event { event: wire }).unwrap();
        assert_eq!(
            json,
            r#"{"type":"event","event":{"event":"error","message":"boom"}}"#
        );
    }
}
