//! WebSocket signaling channel.
//!
//! One WebSocket connection carries JSON text frames in both directions:
//! outbound [`OutboundSignal`]s are serialized and written by a dedicated
//! writer task, inbound frames are parsed into [`InboundSignal`]s and
//! forwarded on a channel for [`crate::CallManager::bind_signals`].
//! Delivery and reconnection guarantees stay with the signaling service;
//! when the socket dies the inbound stream simply ends.

use crate::signaling::{InboundSignal, OutboundSignal, SignalingChannel};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub struct WsSignalingChannel {
    outbound: mpsc::Sender<String>,
}

impl WsSignalingChannel {
    /// Connect to the signaling service.
    ///
    /// Returns the channel handle plus the inbound signal stream to hand
    /// to the call manager.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<InboundSignal>), anyhow::Error> {
        debug!("connecting to signaling service at {}", url);
        let (socket, _) = connect_async(url).await?;
        let (mut write, mut read) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<InboundSignal>(64);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    warn!("signaling write failed: {}", e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<InboundSignal>(text.as_str()) {
                            Ok(signal) => {
                                if in_tx.send(signal).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("unparseable signaling frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("signaling socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("signaling socket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((Self { outbound: out_tx }, in_rx))
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn send(&self, signal: OutboundSignal) -> Result<(), anyhow::Error> {
        let frame = serde_json::to_string(&signal)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("signaling connection closed"))
    }
}
