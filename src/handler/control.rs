//! Control channel messages
//!
//! Inbound: `{"action": "<name>"}` text messages from the client.
//! Outbound: status objects tagged by `type`, mirrored back so the client can
//! reflect pipeline state.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::broadcast;

/// Control actions understood by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    StartRecord,
    StopRecord,
    StartFrameCapture,
    StopFrameCapture,
    StartVideoRecording,
    StopVideoRecording,
}

impl ControlAction {
    pub const ALL: [ControlAction; 6] = [
        ControlAction::StartRecord,
        ControlAction::StopRecord,
        ControlAction::StartFrameCapture,
        ControlAction::StopFrameCapture,
        ControlAction::StartVideoRecording,
        ControlAction::StopVideoRecording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::StartRecord => "start_record",
            ControlAction::StopRecord => "stop_record",
            ControlAction::StartFrameCapture => "start_frame_capture",
            ControlAction::StopFrameCapture => "stop_frame_capture",
            ControlAction::StartVideoRecording => "start_video_recording",
            ControlAction::StopVideoRecording => "stop_video_recording",
        }
    }

    /// Parse a raw control message
    pub fn parse(message: &str) -> AppResult<Self> {
        let value: serde_json::Value = serde_json::from_str(message)
            .map_err(|e| AppError::InvalidMessage(format!("not JSON: {}", e)))?;
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .ok_or_else(|| AppError::InvalidMessage("missing \"action\" field".to_string()))?;
        action.parse()
    }
}

impl FromStr for ControlAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| AppError::InvalidMessage(format!("unknown action: {}", s)))
    }
}

/// Server-to-client status messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    Status {
        message: String,
    },
    Saved {
        message: String,
        filename: String,
        path: String,
        count: u64,
    },
    FrameCaptureStatus {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
    FrameSaved {
        filename: String,
        count: u64,
    },
    VideoRecordingStatus {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },
}

impl StatusMessage {
    pub fn status(message: impl Into<String>) -> Self {
        StatusMessage::Status {
            message: message.into(),
        }
    }

    pub fn frame_capture(message: impl Into<String>, count: Option<u64>) -> Self {
        StatusMessage::FrameCaptureStatus {
            message: message.into(),
            count,
        }
    }

    pub fn video_recording(message: impl Into<String>) -> Self {
        StatusMessage::VideoRecordingStatus {
            message: message.into(),
            filename: None,
            path: None,
            count: None,
            resolution: None,
        }
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound side of the text control channel.
///
/// Sending never fails from the handler's point of view; with no listener
/// attached the message is discarded.
#[derive(Debug, Clone)]
pub struct StatusChannel {
    tx: broadcast::Sender<StatusMessage>,
}

impl StatusChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn send(&self, message: StatusMessage) {
        tracing::debug!("Status -> client: {:?}", message);
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.tx.subscribe()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(64)
    }
}
