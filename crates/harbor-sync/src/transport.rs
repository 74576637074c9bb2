use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

const CONNECTION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection lost: {0}")]
    Io(String),
}

/// One websocket-style frame, text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }
}

/// An established stream connection. `inbound` yields frames until the
/// peer closes (channel end) or the transport fails (`Err` then end);
/// dropping the struct releases the underlying transport.
pub struct Connection {
    pub inbound: mpsc::Receiver<Result<Frame, TransportError>>,
    pub outbound: mpsc::Sender<Frame>,
}

/// Seam between stream sessions and the actual transport, so tests can
/// script connections without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError>;
}

/// Production connector over tokio-tungstenite. Each connection gets one
/// pump task bridging the socket to the channel pair; the task exits when
/// either side goes away.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError> {
        let (ws, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        let (in_tx, in_rx) = mpsc::channel(CONNECTION_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(CONNECTION_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Ok(Frame::Text(text))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            if in_tx.send(Ok(Frame::Binary(bytes))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("ws_closed_by_peer");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let _ = in_tx.send(Err(TransportError::Io(err.to_string()))).await;
                            break;
                        }
                    },
                    outgoing = out_rx.recv() => match outgoing {
                        Some(Frame::Text(text)) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                let _ = in_tx
                                    .send(Err(TransportError::Io("send failed".to_string())))
                                    .await;
                                break;
                            }
                        }
                        Some(Frame::Binary(bytes)) => {
                            if sink.send(Message::Binary(bytes)).await.is_err() {
                                let _ = in_tx
                                    .send(Err(TransportError::Io("send failed".to_string())))
                                    .await;
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Connection {
            inbound: in_rx,
            outbound: out_tx,
        })
    }
}
