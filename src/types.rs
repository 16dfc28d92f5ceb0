//! Core call types shared across the crate.

use serde::{Deserialize, Serialize};

/// Opaque call correlation identifier.
///
/// Generated by whichever side initiates a call attempt and echoed in every
/// subsequent signaling message belonging to that attempt. A new attempt
/// always gets a freshly generated id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random call id (32 uppercase hex characters).
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a call carries audio only or audio plus video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

/// Who initiated the call, from this client's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Reason attached to an outgoing `end` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndReason {
    /// Local user hung up.
    #[default]
    Hangup,
    /// Local user declined after having accepted elsewhere.
    Declined,
    /// Ended because another call took precedence.
    Busy,
    /// Local media could no longer be captured.
    MediaFailure,
    /// The transport path was lost.
    ConnectionFailure,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hangup => "hangup",
            Self::Declined => "declined",
            Self::Busy => "busy",
            Self::MediaFailure => "media-failure",
            Self::ConnectionFailure => "connection-failure",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized peer display metadata carried on the session and snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerUser {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl PeerUser {
    /// A peer known only by id, before (or without) directory resolution.
    pub fn from_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }

    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}
