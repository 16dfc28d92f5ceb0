//! Peer connection adapter seam.
//!
//! One [`PeerConnection`] wraps the real-time transport for one call
//! attempt: it drives SDP negotiation, accepts network-path candidates and
//! surfaces transport events ([`PeerEvent`]) tagged with the owning call id
//! into the manager's dispatcher. Fresh connections are built per attempt
//! by a [`PeerConnectionFactory`].

pub mod webrtc;

use crate::media::{LocalMedia, MediaTrack};
use crate::types::CallId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to create session description: {0}")]
    Sdp(String),

    #[error("failed to apply session description: {0}")]
    ApplyDescription(String),

    #[error("failed to apply candidate: {0}")]
    Candidate(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network-path candidate exchanged incrementally with the peer.
///
/// The candidate string follows RFC 5245.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate string (e.g. "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host").
    pub candidate: String,
    /// SDP media stream identification (e.g. "0" for audio).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP media line index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// Username fragment for ICE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    pub fn with_username_fragment(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }
}

/// Connectivity of the underlying transport path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Terminal states force the session back to idle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by a peer connection, tagged with the owning call.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered candidate ready to be trickled to the peer.
    LocalCandidate {
        call_id: CallId,
        candidate: IceCandidate,
    },
    /// A media track delivered by the peer.
    RemoteTrack { call_id: CallId, track: MediaTrack },
    /// The transport's connectivity observable changed.
    Connectivity {
        call_id: CallId,
        state: ConnectivityState,
    },
}

impl PeerEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::LocalCandidate { call_id, .. }
            | Self::RemoteTrack { call_id, .. }
            | Self::Connectivity { call_id, .. } => call_id,
        }
    }
}

/// One peer connection per call attempt.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach all local capture tracks. Must happen before negotiation.
    async fn add_local_tracks(&self, media: &LocalMedia) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Applying the remote description also drains any queued candidates.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Apply a remote candidate. Candidates received before the remote
    /// description must be queued, not rejected.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Tear the transport down. Idempotent.
    async fn close(&self);
}

/// Builds a fresh connection per call attempt.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        call_id: CallId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
