//! Peer-to-peer call session orchestration.
//!
//! `peercall` coordinates offer/answer negotiation, trickled ICE
//! candidates and local/remote media lifecycle for exactly one concurrent
//! call per client, on top of an external signaling channel and a
//! real-time media transport.
//!
//! # Architecture
//!
//! - [`CallManager`]: owns the single call session, enforces the busy/idle
//!   invariant and drives every transition
//! - [`CallStatus`] & [`CallSnapshot`]: the state machine and its UI-facing
//!   read-only projection
//! - [`OutboundSignal`] / [`InboundSignal`]: typed wire messages (offer,
//!   answer, ice, reject, end, error)
//! - [`SignalingChannel`], [`MediaAcquirer`], [`PeerConnection`]: seams to
//!   the external collaborators
//! - [`ws::WsSignalingChannel`] and [`peer::webrtc::WebRtcFactory`]:
//!   production implementations of those seams
//!
//! # Lifecycle
//!
//! `idle → {outgoing | incoming} → connecting → connected → idle`; idle is
//! re-entered from any state when a call ends, is rejected, fails or is
//! superseded, and every reset releases both stream handles.

mod error;
mod handler;
pub mod media;
pub mod peer;
mod session;
pub mod signaling;
mod state;
mod types;
pub mod ws;


pub use error::CallError;
pub use media::{LocalMedia, MediaAcquirer, MediaError, MediaTrack, RemoteStream, TrackKind};
pub use peer::{
    ConnectivityState, IceCandidate, PeerConnection, PeerConnectionFactory, PeerError, PeerEvent,
    SdpKind, SessionDescription,
};
pub use session::{CallManager, NullDirectory, UserDirectory};
pub use signaling::{InboundSignal, OutboundSignal, SignalingChannel};
pub use state::{CallSnapshot, CallStatus, CallTransition, InvalidTransition, PendingOffer};
pub use types::{CallDirection, CallId, CallType, EndReason, PeerUser};
