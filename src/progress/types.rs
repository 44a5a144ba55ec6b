// src/progress/types.rs
// Progress stream wire types and channel notifications

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Close code for a normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the peer closed without a status
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code used when the socket dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Conversion phase reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Uploading,
    #[serde(alias = "processing")]
    Converting,
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl ProgressStatus {
    /// Returns true once no further progress is expected
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

/// One progress frame pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(default, alias = "session_id")]
    pub session_id: String,
    /// Percentage in 0..=100
    pub progress: f32,
    pub status: ProgressStatus,
    #[serde(default)]
    pub message: String,
    #[serde(
        default,
        alias = "current_operation",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_operation: Option<String>,
    #[serde(default, alias = "download_url", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ProgressEvent {
    /// Decode a text frame, clamping progress into range
    pub fn decode(raw: &str) -> Result<Self, ChannelError> {
        let mut event: ProgressEvent = serde_json::from_str(raw)
            .map_err(|e| ChannelError::MalformedFrame(e.to_string()))?;
        event.progress = event.progress.clamp(0.0, 100.0);
        Ok(event)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Connection state owned by a ProgressChannel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub is_connected: bool,
    pub reconnect_attempt: u32,
    pub last_progress: Option<ProgressEvent>,
    /// Set once reconnect attempts ran out
    pub exhausted: bool,
    /// A completed or failed event was seen; nothing reconnects after this
    pub session_complete: bool,
}

/// Notification delivered to the channel subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub session_id: String,
    pub kind: ChannelEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Connected,
    Progress(ProgressEvent),
    /// Side-channel error report; the connection stays up
    Error(String),
    Disconnected {
        code: u16,
        reason: String,
        reconnect_scheduled: bool,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    Exhausted {
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Malformed progress frame: {0}")]
    MalformedFrame(String),
}
