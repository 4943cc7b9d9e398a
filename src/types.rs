use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque `pstk` credential used to build the identity message.
///
/// Held for the life of one connection attempt only. `Debug` never prints
/// the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} chars>)", self.0.len())
    }
}

/// One decoded load/delta message: the topic it belongs to and its raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicUpdate {
    pub topic: String,
    pub content: String,
}

impl TopicUpdate {
    pub fn new(topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            content: content.into(),
        }
    }
}

/// Result of decoding a single inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Server is ready; the client should send its subscriptions.
    SubscribeNow,
    TopicUpdate(TopicUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingSubscribeSignal,
    Subscribed,
    Closed,
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "cause")]
pub enum CloseReason {
    /// `disconnect()` was requested by the caller.
    Disconnected,
    /// Bootstrap produced no token; the socket was never opened.
    NoSessionToken,
    /// The server ended the stream.
    RemoteClosed,
    /// Connect, send or receive failed.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnect requested"),
            Self::NoSessionToken => write!(f, "no session token available"),
            Self::RemoteClosed => write!(f, "closed by server"),
            Self::Transport(cause) => write!(f, "transport failure: {cause}"),
        }
    }
}

/// Final report for one connection attempt, emitted on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: String,
    pub ended_at: String,
    pub final_state: ConnectionState,
    pub close_reason: CloseReason,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub updates_emitted: u64,
    pub subscriptions_sent: u64,
}
