//! Protocol message shapes exchanged between a job and its caller.
//!
//! Both directions are closed enumerations. Adding a message kind is a
//! protocol version bump, never a silent extension.

use serde::{Deserialize, Serialize};

/// Structured payload value: a tree of null/bool/number/string/array/object.
pub type Value = serde_json::Value;

/// Caller-supplied metadata identifying a job.
///
/// Echoed verbatim on every outbound message as the correlation token. The
/// engine never reads into `metadata`; it only clones the description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Job name as registered with the scheduler.
    pub name: String,
    /// Opaque extras (versions, schema references, ...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl JobDescription {
    /// Describe a job by name with no extra metadata.
    pub fn new<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            metadata: Value::Null,
        }
    }
}

/// Control message sent by the caller to a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Liveness probe; answered with `Pong` carrying the same id.
    Ping { id: u64 },
    /// Cancellation request. Always resolves with a normal `End`.
    Stop,
    /// One unit of streamed input for the job body to consume.
    Input { value: Value },
}

/// Status message emitted by a running job.
///
/// The sequence of these is the job's complete externally observable
/// behavior: exactly one `Start` first, exactly one `End` last (a run
/// failure replaces `End`; see [`crate::engine::Error`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Correlation token, cloned from the run's description.
    pub description: JobDescription,
    #[serde(flatten)]
    pub kind: OutboundKind,
}

/// The payload half of an [`OutboundMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundKind {
    /// The run has begun. Precedes every other message of the run.
    Start,
    /// Answer to an inbound `Ping` with the same id.
    Pong { id: u64 },
    /// Structured log entry forwarded from the job body's logger.
    Log { entry: LogEntry },
    /// One unit of primary output.
    Output { value: Value },
    /// Message pushed through the named side channel.
    ChannelMessage { name: String, message: Value },
    /// The named side channel failed; the name becomes reusable.
    ChannelError { name: String, error: Value },
    /// The named side channel completed; the name becomes reusable.
    ChannelComplete { name: String },
    /// The run ended normally. Nothing follows on the primary stream.
    End,
}

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry carried by `OutboundKind::Log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new<S>(level: LogLevel, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_message_is_tagged_by_kind() {
        let msg = OutboundMessage {
            description: JobDescription::new("copy"),
            kind: OutboundKind::ChannelMessage {
                name: "progress".to_string(),
                message: serde_json::json!({"done": 3}),
            },
        };

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["kind"], "channel_message");
        assert_eq!(encoded["description"]["name"], "copy");

        let decoded = serde_json::from_value::<OutboundMessage>(encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
