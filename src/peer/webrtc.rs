//! WebRTC-backed peer connection adapter.
//!
//! Wraps `webrtc` crate peer connections behind the [`PeerConnection`]
//! seam: SDP negotiation, trickled candidates, remote track events and
//! connectivity observation. Candidates that arrive before the remote
//! description is applied are queued and drained afterwards.

use super::{
    ConnectivityState, IceCandidate, PeerConnection, PeerConnectionFactory, PeerError, PeerEvent,
    SdpKind, SessionDescription,
};
use crate::media::{LocalMedia, MediaTrack, TrackKind};
use crate::types::CallId;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Public STUN servers used when the factory is not configured with any.
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

/// Configuration for [`WebRtcFactory`].
#[derive(Clone)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<RTCIceServer>,
    /// Clock rate advertised on local audio tracks.
    pub audio_clock_rate: u32,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            audio_clock_rate: 48000,
        }
    }
}

/// Builds a fresh WebRTC peer connection per call attempt.
pub struct WebRtcFactory {
    config: WebRtcConfig,
}

impl WebRtcFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

impl Default for WebRtcFactory {
    fn default() -> Self {
        Self::new(WebRtcConfig::default())
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        call_id: CallId,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.config.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| PeerError::Transport(e.to_string()))?,
        );

        let conn = Arc::new(WebRtcPeerConnection {
            call_id,
            pc,
            audio_clock_rate: self.config.audio_clock_rate,
            pending: Mutex::new(CandidateQueue::default()),
        });
        conn.register_handlers(events);

        Ok(conn)
    }
}

#[derive(Default)]
struct CandidateQueue {
    remote_set: bool,
    queued: Vec<IceCandidate>,
}

/// A single WebRTC transport bound to one call attempt.
pub struct WebRtcPeerConnection {
    call_id: CallId,
    pc: Arc<RTCPeerConnection>,
    audio_clock_rate: u32,
    pending: Mutex<CandidateQueue>,
}

impl WebRtcPeerConnection {
    fn register_handlers(&self, events: mpsc::Sender<PeerEvent>) {
        let call_id = self.call_id.clone();
        let tx = events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let call_id = call_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        let _ = tx
                            .send(PeerEvent::LocalCandidate { call_id, candidate })
                            .await;
                    }
                    Err(e) => warn!("failed to serialize local candidate: {e}"),
                }
            })
        }));

        let call_id = self.call_id.clone();
        let tx = events.clone();
        self.pc.on_track(Box::new(move |track, _, _| {
            let call_id = call_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let track = MediaTrack::new(track.id(), kind);
                let _ = tx.send(PeerEvent::RemoteTrack { call_id, track }).await;
            })
        }));

        let call_id = self.call_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("peer connection state for {call_id}: {state:?}");
                let mapped = match state {
                    RTCPeerConnectionState::New => ConnectivityState::New,
                    RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectivityState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectivityState::Failed,
                    RTCPeerConnectionState::Closed => ConnectivityState::Closed,
                    _ => return Box::pin(async {}),
                };
                let call_id = call_id.clone();
                let tx = events.clone();
                Box::pin(async move {
                    let _ = tx
                        .send(PeerEvent::Connectivity {
                            call_id,
                            state: mapped,
                        })
                        .await;
                })
            }));
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_local_tracks(&self, media: &LocalMedia) -> Result<(), PeerError> {
        for track in media.tracks() {
            let capability = match track.kind {
                TrackKind::Audio => RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: self.audio_clock_rate,
                    channels: 2,
                    ..Default::default()
                },
                TrackKind::Video => RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
            };
            let local = Arc::new(TrackLocalStaticRTP::new(
                capability,
                track.id.clone(),
                "peercall".to_string(),
            ));
            self.pc
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = to_rtc(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| PeerError::ApplyDescription(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::ApplyDescription(e.to_string()))?;

        let queued = {
            let mut pending = self.pending.lock().await;
            pending.remote_set = true;
            std::mem::take(&mut pending.queued)
        };
        for candidate in queued {
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!("queued candidate failed for {}: {e}", self.call_id);
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        {
            let mut pending = self.pending.lock().await;
            if !pending.remote_set {
                debug!("queueing candidate for {} until remote description", self.call_id);
                pending.queued.push(candidate);
                return Ok(());
            }
        }
        self.apply_candidate(candidate).await
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("peer connection close for {}: {e}", self.call_id);
        }
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| PeerError::Sdp(e.to_string()))
}
