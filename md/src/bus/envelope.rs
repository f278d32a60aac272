//! Wire envelope and acknowledgement types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::OwnerId;

/// Commands the worker context understands
///
/// A closed set: adding a new command is a compile-time decision, and every
/// dispatch site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Play,
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Play => "play",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// One command envelope, immutable once sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Named execution context this envelope is addressed to
    pub target: String,

    pub kind: MessageKind,

    #[serde(rename = "owner-id", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,

    /// Correlation key for acknowledgements; assigned by the bus on send
    #[serde(rename = "request-id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(target: impl Into<String>, kind: MessageKind, owner_id: Option<OwnerId>, payload: serde_json::Value) -> Self {
        Self {
            target: target.into(),
            kind,
            owner_id,
            request_id: None,
            payload,
        }
    }
}

/// Acknowledgement outcome reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Response correlated back to a sent envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    #[serde(rename = "request-id")]
    pub request_id: String,

    pub ack: bool,

    pub status: AckStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok(request_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            ack: true,
            status: AckStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ack: true,
            status: AckStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}
