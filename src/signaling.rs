//! Signaling message types and the channel seam.
//!
//! Wire messages are JSON objects internally tagged on `type`, matching
//! what the signaling service relays verbatim between clients. Outbound
//! messages are addressed with `to`; the service rewrites delivery so the
//! receiving side sees `from` instead.

use crate::peer::IceCandidate;
use crate::types::{CallId, CallType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Messages sent to the signaling service, addressed to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    #[serde(rename_all = "camelCase")]
    Offer {
        to: String,
        call_id: CallId,
        call_type: CallType,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        to: String,
        call_id: CallId,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Ice {
        to: String,
        call_id: CallId,
        candidate: IceCandidate,
    },
    #[serde(rename_all = "camelCase")]
    Reject { to: String, call_id: CallId },
    #[serde(rename_all = "camelCase")]
    End {
        to: String,
        call_id: CallId,
        reason: String,
    },
}

impl OutboundSignal {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::Offer { call_id, .. }
            | Self::Answer { call_id, .. }
            | Self::Ice { call_id, .. }
            | Self::Reject { call_id, .. }
            | Self::End { call_id, .. } => call_id,
        }
    }
}

/// Messages delivered by the signaling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundSignal {
    #[serde(rename_all = "camelCase")]
    Offer {
        from: String,
        call_id: CallId,
        call_type: CallType,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        from: String,
        call_id: CallId,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Ice {
        from: String,
        call_id: CallId,
        candidate: IceCandidate,
    },
    #[serde(rename_all = "camelCase")]
    Reject { from: String, call_id: CallId },
    #[serde(rename_all = "camelCase")]
    End {
        from: String,
        call_id: CallId,
        reason: String,
    },
    Error { error: String },
}

/// Outbound half of the signaling transport.
///
/// Implementations only provide fire-and-forget delivery; ordering,
/// reconnection and acknowledgement are the transport's concern.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, signal: OutboundSignal) -> Result<(), anyhow::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_shape() {
        let offer = OutboundSignal::Offer {
            to: "user-b".to_string(),
            call_id: CallId::new("AC90CFD09DF712D981142B172706F9F2"),
            call_type: CallType::Video,
            sdp: "v=0".to_string(),
        };

        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["to"], "user-b");
        assert_eq!(value["callId"], "AC90CFD09DF712D981142B172706F9F2");
        assert_eq!(value["callType"], "video");
        assert_eq!(value["sdp"], "v=0");
    }

    #[test]
    fn test_inbound_offer_parses_from_wire() {
        let raw = r#"{
            "type": "offer",
            "from": "user-a",
            "callId": "BC5BD1EDE9BBE601F408EF3795479E93",
            "callType": "audio",
            "sdp": "v=0"
        }"#;

        let signal: InboundSignal = serde_json::from_str(raw).unwrap();
        match signal {
            InboundSignal::Offer {
                from,
                call_id,
                call_type,
                sdp,
            } => {
                assert_eq!(from, "user-a");
                assert_eq!(call_id.as_str(), "BC5BD1EDE9BBE601F408EF3795479E93");
                assert_eq!(call_type, CallType::Audio);
                assert_eq!(sdp, "v=0");
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_error_parses_from_wire() {
        let raw = r#"{"type": "error", "error": "peer offline"}"#;
        let signal: InboundSignal = serde_json::from_str(raw).unwrap();
        assert_eq!(
            signal,
            InboundSignal::Error {
                error: "peer offline".to_string()
            }
        );
    }

    #[test]
    fn test_ice_wire_shape_carries_structured_candidate() {
        let ice = OutboundSignal::Ice {
            to: "user-b".to_string(),
            call_id: CallId::new("AC90CFD09DF712D981142B172706F9F2"),
            candidate: IceCandidate::new(
                "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host",
            )
            .with_sdp_mid("0"),
        };

        let value = serde_json::to_value(&ice).unwrap();
        assert_eq!(value["type"], "ice");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert!(
            value["candidate"]["candidate"]
                .as_str()
                .unwrap()
                .starts_with("candidate:")
        );
    }
}
