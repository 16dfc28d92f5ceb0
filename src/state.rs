//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::media::{LocalMedia, MediaTrack, RemoteStream};
use crate::peer::{IceCandidate, PeerConnection, SessionDescription};
use crate::types::{CallDirection, CallId, CallType, PeerUser};
use std::sync::Arc;

/// Current status of the single call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// No call in progress.
    #[default]
    Idle,
    /// Outgoing call: offer being prepared or awaiting an answer.
    Outgoing,
    /// Incoming call: offer stored, ringing locally.
    Incoming,
    /// Incoming call accepted, negotiation in progress.
    Connecting,
    /// Call active.
    Connected,
}

impl CallStatus {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn can_accept(self) -> bool {
        matches!(self, Self::Incoming)
    }

    /// Apply a transition, yielding the next status.
    ///
    /// Reset-to-idle is always legal from any status and therefore not
    /// modeled as a transition.
    pub fn transition(self, transition: CallTransition) -> Result<CallStatus, InvalidTransition> {
        use CallTransition::*;

        let next = match (self, transition) {
            (Self::Idle, OutgoingStarted) => Self::Outgoing,
            (Self::Idle, OfferReceived) => Self::Incoming,
            (Self::Incoming, LocalAccepted) => Self::Connecting,
            (Self::Connecting, AnswerSent) => Self::Connected,
            (Self::Outgoing, AnswerReceived) => Self::Connected,
            (current, attempted) => return Err(InvalidTransition { current, attempted }),
        };
        Ok(next)
    }
}

/// State transitions for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    /// Local user started an outgoing call.
    OutgoingStarted,
    /// A remote offer was stored; ringing locally.
    OfferReceived,
    /// Local user accepted the pending offer.
    LocalAccepted,
    /// Our answer went out to the caller.
    AnswerSent,
    /// The callee's answer was applied.
    AnswerReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current: CallStatus,
    pub attempted: CallTransition,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {:?} in status {:?}",
            self.attempted, self.current
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// A remote offer awaiting a local accept/reject decision.
///
/// Exists if and only if the session status is `Incoming`.
#[derive(Debug, Clone)]
pub struct PendingOffer {
    pub call_id: CallId,
    pub from: String,
    pub call_type: CallType,
    pub remote_description: SessionDescription,
}

/// The single mutable call session, exclusively owned by the manager.
///
/// Every field returns to its idle default on [`CallSession::reset`];
/// stream handles are released there and the peer connection handle is
/// handed back to the caller for closing outside the lock.
#[derive(Default)]
pub struct CallSession {
    pub(crate) status: CallStatus,
    pub(crate) call_id: Option<CallId>,
    pub(crate) call_type: CallType,
    pub(crate) direction: Option<CallDirection>,
    pub(crate) peer: Option<PeerUser>,
    pub(crate) local_media: Option<LocalMedia>,
    pub(crate) remote_stream: RemoteStream,
    pub(crate) error: Option<String>,
    pub(crate) pending_offer: Option<PendingOffer>,
    /// Candidates that trickled in before a connection existed.
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) peer_conn: Option<Arc<dyn PeerConnection>>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Apply a status transition, stamping `connected_at` on connect.
    pub(crate) fn apply(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let next = self.status.transition(transition)?;
        self.status = next;
        if next == CallStatus::Connected {
            self.connected_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Populate the identity fields of a fresh call attempt.
    pub(crate) fn start_attempt(
        &mut self,
        call_id: CallId,
        call_type: CallType,
        direction: CallDirection,
        peer: PeerUser,
    ) {
        self.call_id = Some(call_id);
        self.call_type = call_type;
        self.direction = Some(direction);
        self.peer = Some(peer);
        self.error = None;
        self.started_at = Some(Utc::now());
    }

    /// Whether the session still belongs to the given call attempt.
    pub(crate) fn is_attempt(&self, call_id: &CallId) -> bool {
        self.call_id.as_ref() == Some(call_id)
    }

    pub(crate) fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Reset every field to its idle default, releasing the local media
    /// handle and clearing the remote stream. Returns the peer connection
    /// (if any) so the caller can close it outside the session lock.
    pub(crate) fn reset(&mut self, error: Option<String>) -> Option<Arc<dyn PeerConnection>> {
        if let Some(mut media) = self.local_media.take() {
            media.release();
        }
        self.remote_stream.clear();
        self.pending_offer = None;
        self.pending_candidates.clear();
        self.status = CallStatus::Idle;
        self.call_id = None;
        self.call_type = CallType::default();
        self.direction = None;
        self.peer = None;
        self.started_at = None;
        self.connected_at = None;
        self.error = error;
        self.peer_conn.take()
    }

    pub(crate) fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.status,
            call_id: self.call_id.clone(),
            call_type: self.call_type,
            direction: self.direction,
            peer: self.peer.clone(),
            local_tracks: self
                .local_media
                .as_ref()
                .map(|m| m.tracks().to_vec())
                .unwrap_or_default(),
            remote_tracks: self.remote_stream.tracks().to_vec(),
            error: self.error.clone(),
            started_at: self.started_at,
            connected_at: self.connected_at,
        }
    }
}

/// Read-only projection of the call session for UI layers.
///
/// Carries track metadata only, never the owning handles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub call_id: Option<CallId>,
    pub call_type: CallType,
    pub direction: Option<CallDirection>,
    pub peer: Option<PeerUser>,
    pub local_tracks: Vec<MediaTrack>,
    pub remote_tracks: Vec<MediaTrack>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn begin_outgoing(session: &mut CallSession) -> CallId {
        let call_id = CallId::generate();
        session.apply(CallTransition::OutgoingStarted).unwrap();
        session.start_attempt(
            call_id.clone(),
            CallType::Audio,
            CallDirection::Outgoing,
            PeerUser::from_id("user-b"),
        );
        call_id
    }

    /// Flow: Idle → Outgoing → Connected → Idle.
    #[test]
    fn test_outgoing_flow() {
        let mut session = CallSession::default();
        begin_outgoing(&mut session);
        assert_eq!(session.status, CallStatus::Outgoing);
        assert!(session.started_at.is_some());

        session.apply(CallTransition::AnswerReceived).unwrap();
        assert_eq!(session.status, CallStatus::Connected);
        assert!(session.connected_at.is_some());

        session.reset(None);
        assert_eq!(session.status, CallStatus::Idle);
        assert!(session.call_id.is_none());
        assert!(session.connected_at.is_none());
    }

    /// Flow: Idle → Incoming → Connecting → Connected.
    #[test]
    fn test_incoming_flow() {
        let mut session = CallSession::default();
        session.apply(CallTransition::OfferReceived).unwrap();
        assert!(session.status.can_accept());

        session.apply(CallTransition::LocalAccepted).unwrap();
        assert_eq!(session.status, CallStatus::Connecting);

        session.apply(CallTransition::AnswerSent).unwrap();
        assert_eq!(session.status, CallStatus::Connected);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        // Can't accept or answer without a call
        assert!(
            CallStatus::Idle
                .transition(CallTransition::LocalAccepted)
                .is_err()
        );
        assert!(
            CallStatus::Idle
                .transition(CallTransition::AnswerReceived)
                .is_err()
        );

        // A connected call rejects renewed negotiation
        assert!(
            CallStatus::Connected
                .transition(CallTransition::AnswerReceived)
                .is_err()
        );
        assert!(
            CallStatus::Connected
                .transition(CallTransition::OfferReceived)
                .is_err()
        );

        // The callee path can't skip the accept
        assert!(
            CallStatus::Incoming
                .transition(CallTransition::AnswerSent)
                .is_err()
        );
    }

    #[test]
    fn test_reset_releases_media_and_clears_pending() {
        let released = Arc::new(AtomicBool::new(false));
        let hook = Arc::clone(&released);

        let mut session = CallSession::default();
        session.apply(CallTransition::OfferReceived).unwrap();
        session.start_attempt(
            CallId::generate(),
            CallType::Video,
            CallDirection::Incoming,
            PeerUser::from_id("user-a"),
        );
        session.pending_offer = Some(PendingOffer {
            call_id: session.call_id.clone().unwrap(),
            from: "user-a".to_string(),
            call_type: CallType::Video,
            remote_description: SessionDescription::offer("v=0"),
        });
        session.pending_candidates.push(IceCandidate::new("candidate:1"));
        session.local_media = Some(
            LocalMedia::new(
                CallType::Video,
                vec![MediaTrack::new("mic0", TrackKind::Audio)],
            )
            .with_releaser(move || hook.store(true, Ordering::SeqCst)),
        );
        session
            .remote_stream
            .add_track(MediaTrack::new("remote-a", TrackKind::Audio));

        session.reset(Some("it broke".to_string()));

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(session.status, CallStatus::Idle);
        assert!(session.local_media.is_none());
        assert!(session.remote_stream.is_empty());
        assert!(session.pending_offer.is_none());
        assert!(session.pending_candidates.is_empty());
        assert_eq!(session.error.as_deref(), Some("it broke"));
    }

    #[test]
    fn test_fresh_attempt_clears_stale_error() {
        let mut session = CallSession::default();
        session.error = Some("previous failure".to_string());
        begin_outgoing(&mut session);
        assert!(session.error.is_none());
    }

    #[test]
    fn test_snapshot_carries_track_metadata_only() {
        let mut session = CallSession::default();
        begin_outgoing(&mut session);
        session.local_media = Some(LocalMedia::new(
            CallType::Audio,
            vec![MediaTrack::new("mic0", TrackKind::Audio)],
        ));
        session
            .remote_stream
            .add_track(MediaTrack::new("remote-v", TrackKind::Video));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, CallStatus::Outgoing);
        assert_eq!(snapshot.local_tracks.len(), 1);
        assert_eq!(snapshot.remote_tracks.len(), 1);
        assert_eq!(snapshot.peer.unwrap().user_id, "user-b");
    }
}
