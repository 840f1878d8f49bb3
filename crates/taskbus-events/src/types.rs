//! Event envelope
//!
//! This module defines the envelope every task publishes and receives, the
//! subject vocabulary used by the automation tasks and correlation id
//! generation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{self, CodecError};

/// Name of the JSON coding.
pub const JSON_CODING: &str = "json";

/// Subjects published and consumed by the automation tasks.
///
/// Subjects are opaque strings at the bus level; any task may introduce new
/// ones as long as no dot-separated segment is `*` or `#`. These are the ones
/// the stock tasks agree on.
pub mod subjects {
    /// Periodic timer tick.
    pub const TIMER: &str = "timer-tick";
    /// GitHub push webhook received.
    pub const GITHUB_HOOK: &str = "github-webhook-received";
    /// GitLab push webhook received.
    pub const GITLAB_HOOK: &str = "gitlab-webhook-received";
    /// Jira webhook received.
    pub const JIRA_HOOK: &str = "jira-webhook-received";
    /// Trigger a pipeline step for a plugin.
    pub const SERVE_CMD: &str = "pipeline-trigger";
    /// Trigger a pipeline step carrying a full manifest.
    pub const SERVE_CMD_WITH_DATA: &str = "pipeline-trigger-with-data";
    /// A tracked resource outlived its end of life.
    pub const OUTDATED: &str = "resource-outdated";
    /// Slack message received.
    pub const SLACK_MESSAGE: &str = "slack-message-received";
    /// Post a message to Slack.
    pub const SLACK_POST_MESSAGE: &str = "slack-post-message";
    /// Telegram message received.
    pub const TELEGRAM_MESSAGE: &str = "telegram-message-received";
    /// Anything else.
    pub const UNKNOWN: &str = "unknown";
}

/// Start a new causal chain.
///
/// Events caused by an earlier event must reuse its trace instead
/// (see [`Event::derive`]).
pub fn new_trace() -> String {
    Uuid::now_v7().to_string()
}

/// Event envelope.
///
/// `data` is opaque to the bus: its shape is agreed between the publisher and
/// its subscribers, and `coding` names the scheme it was serialized with.
/// Subscribers receive events behind an `Arc`, so an event cannot change once
/// it has been published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Correlation id shared by every event of one workflow
    pub trace: String,

    /// Topic name used for routing
    pub subject: String,

    /// Name of the coding used for `data`
    pub coding: String,

    /// Serialized payload
    #[serde(with = "payload_base64", default)]
    pub data: Vec<u8>,
}

impl Event {
    /// Create an envelope with an empty payload.
    pub fn new(
        trace: impl Into<String>,
        subject: impl Into<String>,
        coding: impl Into<String>,
    ) -> Self {
        Self {
            trace: trace.into(),
            subject: subject.into(),
            coding: coding.into(),
            data: Vec::new(),
        }
    }

    /// Create an envelope and serialize `value` into it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use taskbus_events::{new_trace, subjects, Event, JSON_CODING};
    ///
    /// let event = Event::with_data(new_trace(), subjects::TIMER, JSON_CODING, &42u32).unwrap();
    /// assert_eq!(event.data, b"42");
    /// ```
    pub fn with_data<T: Serialize + ?Sized>(
        trace: impl Into<String>,
        subject: impl Into<String>,
        coding: impl Into<String>,
        value: &T,
    ) -> Result<Self, CodecError> {
        let mut event = Self::new(trace, subject, coding);
        event.encode(value)?;
        Ok(event)
    }

    /// New envelope caused by this one: same trace, new subject and coding.
    pub fn derive(&self, subject: impl Into<String>, coding: impl Into<String>) -> Self {
        Self::new(self.trace.clone(), subject, coding)
    }

    /// Serialize `value` into the payload with this event's coding.
    ///
    /// Replaces any previous payload. On failure the payload is left untouched.
    pub fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        self.data = codec::encode(&self.coding, value)?;
        Ok(())
    }

    /// Deserialize the payload with this event's coding.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::decode(&self.data, &self.coding)
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Payload bytes as base64 text in serialized envelopes.
mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Outdated {
        #[serde(rename = "endOfLife")]
        end_of_life: i64,
        key: String,
    }

    #[test]
    fn test_new_event_has_empty_payload() {
        let event = Event::new("t1", subjects::OUTDATED, JSON_CODING);
        assert_eq!(event.trace, "t1");
        assert_eq!(event.subject, "resource-outdated");
        assert_eq!(event.coding, "json");
        assert!(event.is_empty());
    }

    #[test]
    fn test_with_data_encodes_payload() {
        let value = Outdated {
            end_of_life: 100,
            key: "k".to_string(),
        };
        let event = Event::with_data("t1", subjects::OUTDATED, JSON_CODING, &value).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&event.data).unwrap(),
            serde_json::json!({"endOfLife": 100, "key": "k"})
        );
        assert_eq!(event.decode::<Outdated>().unwrap(), value);
    }

    #[test]
    fn test_encode_overwrites_payload() {
        let mut event = Event::new("t1", subjects::TIMER, JSON_CODING);
        event.encode(&1u32).unwrap();
        event.encode(&"second").unwrap();
        assert_eq!(event.decode::<String>().unwrap(), "second");
    }

    #[test]
    fn test_encode_unknown_coding_keeps_payload() {
        let mut event = Event::new("t1", subjects::TIMER, JSON_CODING);
        event.encode(&7u8).unwrap();
        event.coding = "msgpack".to_string();

        let err = event.encode(&8u8).unwrap_err();
        assert!(!err.is_decoding());
        assert_eq!(event.data, b"7");
    }

    #[test]
    fn test_derive_keeps_trace() {
        let cause = Event::new(new_trace(), subjects::GITLAB_HOOK, JSON_CODING);
        let effect = cause.derive(subjects::SERVE_CMD, JSON_CODING);
        assert_eq!(effect.trace, cause.trace);
        assert_eq!(effect.subject, subjects::SERVE_CMD);
        assert!(effect.is_empty());
    }

    #[test]
    fn test_new_trace_is_unique() {
        let a = new_trace();
        let b = new_trace();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_envelope_wire_form_uses_base64() {
        let event = Event::with_data("t1", subjects::TIMER, JSON_CODING, &"hi").unwrap();
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["data"], "ImhpIg==");

        let back: Event = serde_json::from_value(wire).unwrap();
        assert_eq!(back, event);
    }
}
