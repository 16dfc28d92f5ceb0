//! Inbound event dispatch.
//!
//! Two tagged-union event streams feed the session: [`InboundSignal`]s from
//! the signaling channel and [`PeerEvent`]s from the active peer
//! connection. Both are dispatched through single handler functions owned
//! by the manager; the peer event loop is registered at manager creation
//! and never deregistered mid-process.
//!
//! Inbound `answer`/`ice`/`reject`/`end` messages are checked against the
//! active session's call id, so a stale message from a dead call attempt
//! can never be misapplied to a newer one.

use crate::error::CallError;
use crate::peer::{IceCandidate, PeerEvent};
use crate::session::CallManager;
use crate::signaling::{InboundSignal, OutboundSignal};
use crate::state::{CallStatus, CallTransition, PendingOffer};
use crate::types::{CallDirection, CallId, CallType, PeerUser};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

impl CallManager {
    /// Single entry point for inbound signaling messages.
    pub async fn handle_signal(&self, signal: InboundSignal) {
        match signal {
            InboundSignal::Offer {
                from,
                call_id,
                call_type,
                sdp,
            } => self.handle_incoming_offer(from, call_id, call_type, sdp).await,
            InboundSignal::Answer { call_id, sdp, .. } => self.handle_answer(call_id, sdp).await,
            InboundSignal::Ice {
                call_id, candidate, ..
            } => self.handle_remote_ice(call_id, candidate).await,
            InboundSignal::Reject { call_id, .. } => self.handle_remote_reject(call_id).await,
            InboundSignal::End {
                call_id, reason, ..
            } => self.handle_remote_end(call_id, reason).await,
            InboundSignal::Error { error } => self.handle_signal_error(error).await,
        }
    }

    /// Drive [`Self::handle_signal`] from a channel, e.g. the receiver half
    /// of [`crate::ws::WsSignalingChannel::connect`]. Spawned once per
    /// process; the task ends when the stream does.
    pub fn bind_signals(self: &Arc<Self>, mut signals: mpsc::Receiver<InboundSignal>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                manager.handle_signal(signal).await;
            }
            debug!("inbound signal stream closed");
        });
    }

    pub(crate) fn spawn_peer_event_loop(self: &Arc<Self>, mut events: mpsc::Receiver<PeerEvent>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.handle_peer_event(event).await;
            }
        });
    }

    /// A remote offer arrived. First call wins: any non-idle session makes
    /// this auto-decline, without touching the current session.
    pub(crate) async fn handle_incoming_offer(
        &self,
        from: String,
        call_id: CallId,
        call_type: CallType,
        sdp: String,
    ) {
        let busy_reject = {
            let mut session = self.session.lock().await;
            if !session.status.is_idle() {
                info!(
                    "busy ({:?}): auto-declining call {} from {}",
                    session.status, call_id, from
                );
                Some(OutboundSignal::Reject {
                    to: from.clone(),
                    call_id: call_id.clone(),
                })
            } else {
                if session.apply(CallTransition::OfferReceived).is_err() {
                    return;
                }
                session.start_attempt(
                    call_id.clone(),
                    call_type,
                    CallDirection::Incoming,
                    PeerUser::from_id(&from),
                );
                // Media is deliberately not acquired before the user
                // accepts.
                session.pending_offer = Some(PendingOffer {
                    call_id: call_id.clone(),
                    from: from.clone(),
                    call_type,
                    remote_description: crate::peer::SessionDescription::offer(sdp),
                });
                self.publish(&session);
                info!("Incoming {:?} call {} from {}", call_type, call_id, from);
                None
            }
        };

        if let Some(reject) = busy_reject {
            if let Err(e) = self.signaling.send(reject).await {
                warn!("failed to send busy reject: {}", e);
            }
            return;
        }

        // Resolve display metadata after the optimistic update.
        if let Some(peer) = self.directory.resolve(&from).await {
            let mut session = self.session.lock().await;
            if session.is_attempt(&call_id) {
                session.peer = Some(peer);
                self.publish(&session);
            }
        }
    }

    /// The callee answered our offer.
    pub(crate) async fn handle_answer(&self, call_id: CallId, sdp: String) {
        let conn = {
            let session = self.session.lock().await;
            if !session.is_attempt(&call_id) {
                debug!("answer for unknown call {} dropped", call_id);
                return;
            }
            // Signaling-state guard: only valid while awaiting the answer,
            // so a duplicate answer is a no-op.
            if session.status != CallStatus::Outgoing {
                debug!("answer for call {} ignored in {:?}", call_id, session.status);
                return;
            }
            match session.peer_conn.clone() {
                Some(conn) => conn,
                None => {
                    warn!("answer for call {} before connection exists", call_id);
                    return;
                }
            }
        };

        match conn
            .set_remote_description(crate::peer::SessionDescription::answer(sdp))
            .await
        {
            Ok(()) => {
                let mut session = self.session.lock().await;
                if session.is_attempt(&call_id)
                    && session.apply(CallTransition::AnswerReceived).is_ok()
                {
                    self.publish(&session);
                    info!("call {} connected (answer applied)", call_id);
                }
            }
            Err(e) => {
                let err = CallError::ConnectionFailed(e.to_string());
                self.reset_attempt(&call_id, Some(err.to_string())).await;
            }
        }
    }

    /// A trickled candidate from the peer. Application failures are
    /// non-fatal: recorded, never a teardown.
    pub(crate) async fn handle_remote_ice(&self, call_id: CallId, candidate: IceCandidate) {
        let conn = {
            let mut session = self.session.lock().await;
            if !session.is_attempt(&call_id) {
                debug!("candidate for unknown call {} dropped", call_id);
                return;
            }
            match session.peer_conn.clone() {
                Some(conn) => conn,
                None => {
                    // Ringing: no connection yet. Queue for the accept.
                    session.pending_candidates.push(candidate);
                    return;
                }
            }
        };

        if let Err(e) = conn.add_ice_candidate(candidate).await {
            warn!("failed to apply candidate for call {}: {}", call_id, e);
            let mut session = self.session.lock().await;
            if session.is_attempt(&call_id) {
                session.error = Some(CallError::IceApplyFailed(e.to_string()).to_string());
                self.publish(&session);
            }
        }
    }

    /// The peer declined our outgoing call.
    pub(crate) async fn handle_remote_reject(&self, call_id: CallId) {
        {
            let session = self.session.lock().await;
            if !session.is_attempt(&call_id) || session.status != CallStatus::Outgoing {
                debug!("reject for call {} ignored", call_id);
                return;
            }
        }
        info!("call {} declined by peer", call_id);
        self.reset_attempt(&call_id, Some(CallError::RemoteRejected.to_string()))
            .await;
    }

    /// The peer hung up.
    pub(crate) async fn handle_remote_end(&self, call_id: CallId, reason: String) {
        {
            let session = self.session.lock().await;
            if !session.is_attempt(&call_id) {
                debug!("end for unknown call {} dropped", call_id);
                return;
            }
        }
        info!("call {} ended by peer ({})", call_id, reason);
        self.reset_attempt(&call_id, Some(CallError::RemoteEnded(reason).to_string()))
            .await;
    }

    /// The signaling service reported an error. Fatal for the active call.
    pub(crate) async fn handle_signal_error(&self, error: String) {
        let call_id = {
            let session = self.session.lock().await;
            match &session.call_id {
                Some(call_id) => call_id.clone(),
                None => {
                    warn!("signaling error outside a call: {}", error);
                    return;
                }
            }
        };
        warn!("signaling error during call {}: {}", call_id, error);
        self.reset_attempt(&call_id, Some(CallError::SignalingUnavailable(error).to_string()))
            .await;
    }

    /// Single entry point for events from the active peer connection.
    ///
    /// Events are tagged with their call id, so an adapter that outlives
    /// its call attempt cannot affect a newer session.
    pub(crate) async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate { call_id, candidate } => {
                // Trickle: sent immediately and individually.
                let outbound = {
                    let session = self.session.lock().await;
                    if !session.is_attempt(&call_id) {
                        debug!("local candidate for stale call {} dropped", call_id);
                        return;
                    }
                    match &session.peer {
                        Some(peer) => OutboundSignal::Ice {
                            to: peer.user_id.clone(),
                            call_id,
                            candidate,
                        },
                        None => return,
                    }
                };
                if let Err(e) = self.signaling.send(outbound).await {
                    warn!("failed to trickle candidate: {}", e);
                }
            }
            PeerEvent::RemoteTrack { call_id, track } => {
                let mut session = self.session.lock().await;
                if !session.is_attempt(&call_id) {
                    debug!("remote track for stale call {} dropped", call_id);
                    return;
                }
                debug!("remote {:?} track {} for call {}", track.kind, track.id, call_id);
                session.remote_stream.add_track(track);
                self.publish(&session);
            }
            PeerEvent::Connectivity { call_id, state } => {
                debug!("connectivity for call {}: {}", call_id, state);
                if !state.is_terminal() {
                    return;
                }
                // Authoritative failure detector: covers silent remote
                // hangups and network loss no signaling message reports.
                {
                    let session = self.session.lock().await;
                    if !session.is_attempt(&call_id) {
                        return;
                    }
                }
                info!("call {} lost its transport ({})", call_id, state);
                let err = CallError::ConnectionFailed(state.as_str().to_string());
                self.reset_attempt(&call_id, Some(err.to_string())).await;
            }
        }
    }
}
