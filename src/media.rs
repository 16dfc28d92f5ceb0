//! Local and remote media stream handles.
//!
//! [`LocalMedia`] owns the locally captured tracks for the duration of one
//! call attempt and guarantees the underlying capture resources are
//! released exactly once, either explicitly on session reset or on drop.
//! [`RemoteStream`] accumulates the tracks the peer delivers over time.

use crate::types::CallType;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single audio or video media component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Owned handle to locally captured tracks.
pub struct LocalMedia {
    call_type: CallType,
    tracks: Vec<MediaTrack>,
    releaser: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LocalMedia {
    pub fn new(call_type: CallType, tracks: Vec<MediaTrack>) -> Self {
        Self {
            call_type,
            tracks,
            releaser: None,
        }
    }

    /// Attach the hook that stops the underlying capture devices.
    pub fn with_releaser(mut self, releaser: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.releaser = Some(Box::new(releaser));
        self
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Release the underlying capture resources. Idempotent.
    pub fn release(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            releaser();
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("call_type", &self.call_type)
            .field("tracks", &self.tracks)
            .finish()
    }
}

/// Incrementally built container of tracks received from the peer.
///
/// Tracks can arrive as separate events at different times; they are
/// accumulated here rather than replaced per track.
#[derive(Debug, Default)]
pub struct RemoteStream {
    tracks: Vec<MediaTrack>,
}

impl RemoteStream {
    /// Add a track, replacing any previous track with the same id.
    pub fn add_track(&mut self, track: MediaTrack) {
        if let Some(existing) = self.tracks.iter_mut().find(|t| t.id == track.id) {
            *existing = track;
        } else {
            self.tracks.push(track);
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Requests access to local capture devices for a call type.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(&self, call_type: CallType) -> Result<LocalMedia, MediaError>;
}
