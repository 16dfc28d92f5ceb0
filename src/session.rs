//! Call session manager.
//!
//! [`CallManager`] owns the single [`CallSession`], drives every state
//! transition and is the only writer of call state. UI layers observe the
//! session through a watch channel of [`CallSnapshot`]s and never receive
//! the owning handles.
//!
//! Suspension discipline: media acquisition, SDP work and outbound sends
//! all happen outside the session lock. Every resumption re-validates that
//! the session still belongs to the same call attempt, so a hang-up (or a
//! transport failure) racing a half-finished operation releases whatever
//! that operation acquired instead of resurrecting a dead call.

use crate::error::CallError;
use crate::media::MediaAcquirer;
use crate::peer::{PeerConnectionFactory, PeerEvent};
use crate::signaling::{OutboundSignal, SignalingChannel};
use crate::state::{CallSession, CallSnapshot, CallTransition, PendingOffer};
use crate::types::{CallDirection, CallId, CallType, EndReason, PeerUser};
use async_trait::async_trait;
use log::{debug, info, warn};
use scopeguard::ScopeGuard;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};

/// Resolves peer display metadata from a user id.
///
/// Directory lookups live outside the call subsystem; the default resolves
/// nothing and peers are shown by bare id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Option<PeerUser>;
}

/// Directory that knows nobody.
#[derive(Debug, Default)]
pub struct NullDirectory;

#[async_trait]
impl UserDirectory for NullDirectory {
    async fn resolve(&self, _user_id: &str) -> Option<PeerUser> {
        None
    }
}

/// Orchestrates the lifecycle of the single active call.
pub struct CallManager {
    pub(crate) signaling: Arc<dyn SignalingChannel>,
    pub(crate) media: Arc<dyn MediaAcquirer>,
    pub(crate) peers: Arc<dyn PeerConnectionFactory>,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) session: Mutex<CallSession>,
    pub(crate) peer_events: mpsc::Sender<PeerEvent>,
    pub(crate) snapshot_tx: watch::Sender<CallSnapshot>,
}

impl CallManager {
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaAcquirer>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Arc<Self> {
        Self::with_directory(signaling, media, peers, Arc::new(NullDirectory))
    }

    pub fn with_directory(
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaAcquirer>,
        peers: Arc<dyn PeerConnectionFactory>,
        directory: Arc<dyn UserDirectory>,
    ) -> Arc<Self> {
        let (peer_tx, peer_rx) = mpsc::channel(64);
        let (snapshot_tx, _) = watch::channel(CallSnapshot::default());

        let manager = Arc::new(Self {
            signaling,
            media,
            peers,
            directory,
            session: Mutex::new(CallSession::default()),
            peer_events: peer_tx,
            snapshot_tx,
        });
        manager.spawn_peer_event_loop(peer_rx);
        manager
    }

    /// Observe call state changes.
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The latest published call state.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub(crate) fn publish(&self, session: &CallSession) {
        self.snapshot_tx.send_replace(session.snapshot());
    }

    /// Start an outgoing call.
    ///
    /// Returns the id of the new call attempt once the offer is on the
    /// wire, or once the attempt was cancelled by a concurrent hang-up.
    pub async fn start_call(
        &self,
        call_type: CallType,
        target_user_id: &str,
    ) -> Result<CallId, CallError> {
        // Resolve display metadata up front; the lookup is external and
        // must not run under the session lock.
        let peer = self
            .directory
            .resolve(target_user_id)
            .await
            .unwrap_or_else(|| PeerUser::from_id(target_user_id));

        let call_id = {
            let mut session = self.session.lock().await;
            if !session.status.is_idle() {
                warn!(
                    "start_call to {} refused: session is {:?}",
                    target_user_id, session.status
                );
                session.error = Some("another call in progress".to_string());
                self.publish(&session);
                return Err(CallError::CallInProgress);
            }

            // Optimistic update so the UI renders "calling..." before
            // media is ready.
            let call_id = CallId::generate();
            if session.apply(CallTransition::OutgoingStarted).is_err() {
                return Err(CallError::CallInProgress);
            }
            session.start_attempt(call_id.clone(), call_type, CallDirection::Outgoing, peer);
            self.publish(&session);
            call_id
        };
        info!(
            "Starting {:?} call {} to {}",
            call_type, call_id, target_user_id
        );

        // First suspension point: every failure from here on fully unwinds
        // the attempt.
        let media = match self.media.acquire(call_type).await {
            Ok(media) => media,
            Err(e) => {
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };
        let media = scopeguard::guard(media, |mut media| media.release());

        let conn = match self
            .peers
            .create(call_id.clone(), self.peer_events.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };

        if let Err(e) = conn.add_local_tracks(&media).await {
            conn.close().await;
            let err = CallError::from(e);
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        let offer = match conn.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                conn.close().await;
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };
        if let Err(e) = conn.set_local_description(offer.clone()).await {
            conn.close().await;
            let err = CallError::from(e);
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        // Store the handles before the offer goes out so trickled
        // candidates find their session.
        let stale = {
            let mut session = self.session.lock().await;
            if session.is_attempt(&call_id) {
                session.local_media = Some(ScopeGuard::into_inner(media));
                session.peer_conn = Some(Arc::clone(&conn));
                self.publish(&session);
                false
            } else {
                true
            }
        };
        if stale {
            debug!("call {} superseded while acquiring media", call_id);
            conn.close().await;
            return Ok(call_id);
        }

        let outbound = OutboundSignal::Offer {
            to: target_user_id.to_string(),
            call_id: call_id.clone(),
            call_type,
            sdp: offer.sdp,
        };
        if let Err(e) = self.signaling.send(outbound).await {
            let err = CallError::SignalingUnavailable(e.to_string());
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        debug!("offer for call {} sent", call_id);
        Ok(call_id)
    }

    /// Accept the pending incoming call. No-op without a pending offer.
    pub async fn accept_call(&self) -> Result<(), CallError> {
        let offer = {
            let mut session = self.session.lock().await;
            let Some(offer) = session.pending_offer.take() else {
                debug!("accept_call: no pending offer");
                return Ok(());
            };
            // A pending offer only exists while Incoming, so this holds.
            if session.apply(CallTransition::LocalAccepted).is_err() {
                session.pending_offer = Some(offer);
                return Ok(());
            }
            self.publish(&session);
            offer
        };
        let call_id = offer.call_id.clone();
        info!("Accepting call {} from {}", call_id, offer.from);

        // Media was deliberately not acquired while ringing; do it now.
        // The caller is not notified when this fails.
        let media = match self.media.acquire(offer.call_type).await {
            Ok(media) => media,
            Err(e) => {
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };
        let media = scopeguard::guard(media, |mut media| media.release());

        let conn = match self
            .peers
            .create(call_id.clone(), self.peer_events.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };

        if let Err(e) = conn.add_local_tracks(&media).await {
            conn.close().await;
            let err = CallError::from(e);
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }
        if let Err(e) = conn
            .set_remote_description(offer.remote_description.clone())
            .await
        {
            conn.close().await;
            let err = CallError::ConnectionFailed(e.to_string());
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        // Candidates that trickled in while ringing.
        let queued = {
            let mut session = self.session.lock().await;
            if !session.is_attempt(&call_id) {
                drop(session);
                conn.close().await;
                return Ok(());
            }
            session.take_pending_candidates()
        };
        for candidate in queued {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!("queued candidate failed for call {}: {}", call_id, e);
            }
        }

        let answer = match conn.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                conn.close().await;
                let err = CallError::from(e);
                self.reset_attempt(&call_id, Some(err.to_string())).await;
                return Err(err);
            }
        };
        if let Err(e) = conn.set_local_description(answer.clone()).await {
            conn.close().await;
            let err = CallError::from(e);
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        let stale = {
            let mut session = self.session.lock().await;
            if session.is_attempt(&call_id) {
                session.local_media = Some(ScopeGuard::into_inner(media));
                session.peer_conn = Some(Arc::clone(&conn));
                self.publish(&session);
                false
            } else {
                true
            }
        };
        if stale {
            debug!("call {} superseded while accepting", call_id);
            conn.close().await;
            return Ok(());
        }

        let outbound = OutboundSignal::Answer {
            to: offer.from.clone(),
            call_id: call_id.clone(),
            sdp: answer.sdp,
        };
        if let Err(e) = self.signaling.send(outbound).await {
            let err = CallError::SignalingUnavailable(e.to_string());
            self.reset_attempt(&call_id, Some(err.to_string())).await;
            return Err(err);
        }

        // Optimistic: connected once the answer is on the wire. The
        // connectivity observable remains the failure detector.
        {
            let mut session = self.session.lock().await;
            if session.is_attempt(&call_id) && session.apply(CallTransition::AnswerSent).is_ok() {
                self.publish(&session);
            }
        }
        info!("call {} connected (answer sent)", call_id);
        Ok(())
    }

    /// Decline the pending incoming call. Emits exactly one `reject`
    /// carrying the original call id. No-op without a pending offer.
    pub async fn reject_call(&self) {
        let rejected = {
            let mut session = self.session.lock().await;
            let Some(PendingOffer { call_id, from, .. }) = session.pending_offer.take() else {
                debug!("reject_call: no pending offer");
                return;
            };
            session.reset(None);
            self.publish(&session);
            OutboundSignal::Reject { to: from, call_id }
        };

        info!("Rejecting call {}", rejected.call_id());
        if let Err(e) = self.signaling.send(rejected).await {
            warn!("failed to send reject: {}", e);
        }
    }

    /// Hang up the current call, whatever its state. Sends `end` when a
    /// peer is known; always resets to idle.
    pub async fn end_call(&self, reason: EndReason) {
        let (outbound, conn) = {
            let mut session = self.session.lock().await;
            if session.status.is_idle() {
                debug!("end_call: no active call");
                return;
            }
            let outbound = match (&session.call_id, &session.peer) {
                (Some(call_id), Some(peer)) => Some(OutboundSignal::End {
                    to: peer.user_id.clone(),
                    call_id: call_id.clone(),
                    reason: reason.as_str().to_string(),
                }),
                _ => None,
            };
            let conn = session.reset(None);
            self.publish(&session);
            (outbound, conn)
        };

        if let Some(conn) = conn {
            conn.close().await;
        }
        if let Some(outbound) = outbound {
            info!("Ending call {} ({})", outbound.call_id(), reason);
            if let Err(e) = self.signaling.send(outbound).await {
                warn!("failed to send end: {}", e);
            }
        }
    }

    /// Reset the session if it still belongs to the given attempt.
    ///
    /// Stream handles are released inside the lock; the peer connection is
    /// closed after it.
    pub(crate) async fn reset_attempt(&self, call_id: &CallId, error: Option<String>) {
        let conn = {
            let mut session = self.session.lock().await;
            if !session.is_attempt(call_id) {
                debug!("reset for {} skipped: attempt superseded", call_id);
                return;
            }
            let conn = session.reset(error);
            self.publish(&session);
            conn
        };
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}
