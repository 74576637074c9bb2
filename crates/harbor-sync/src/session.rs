use crate::transport::{Connection, Connector, Frame, TransportError};
use harbor_core::codec::{decode_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
use harbor_core::policy::RetryPolicy;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use url::Url;

const SESSION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created with `enabled = false`, waiting for `enable()`.
    Idle,
    Connecting,
    Open,
    /// Transport failure; a retry is pending.
    Errored,
    /// Terminal. Reached via clean close, user close, or exhausted
    /// retries. A closed session never emits again.
    Closed,
}

/// Decodes transport frames into session messages.
pub trait FrameDecoder<T>: Send + 'static {
    fn decode(&self, frame: Frame) -> Result<T, FrameError>;
}

/// JSON frames decoded into one typed message each.
pub struct JsonFrames<T> {
    max_frame_bytes: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonFrames<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            marker: PhantomData,
        }
    }
}

impl<T> Default for JsonFrames<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned + Send + 'static> FrameDecoder<T> for JsonFrames<T> {
    fn decode(&self, frame: Frame) -> Result<T, FrameError> {
        match frame {
            Frame::Text(text) => decode_frame(text.as_bytes(), self.max_frame_bytes),
            Frame::Binary(bytes) => decode_frame(&bytes, self.max_frame_bytes),
        }
    }
}

/// Raw byte passthrough for terminal feeds.
pub struct RawFrames;

impl FrameDecoder<Vec<u8>> for RawFrames {
    fn decode(&self, frame: Frame) -> Result<Vec<u8>, FrameError> {
        Ok(frame.into_bytes())
    }
}

/// Control handle for one stream session. Dropping the handle closes the
/// session; `close()` is terminal and idempotent. A new `open` call
/// creates a new session.
pub struct SessionHandle {
    close_tx: watch::Sender<bool>,
    enable_tx: watch::Sender<bool>,
    out_tx: mpsc::Sender<Frame>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Starts connecting a session that was opened with `enabled = false`.
    /// No-op on an already-enabled or closed session.
    pub fn enable(&self) {
        let _ = self.enable_tx.send(true);
    }

    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Queues one outbound frame. Frames queued while the session is not
    /// open are dropped by the session task.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.out_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Io("session closed".to_string()))
    }

    /// Clone of the outbound queue, for pumps that outlive a borrow of
    /// the handle.
    pub fn outbound(&self) -> mpsc::Sender<Frame> {
        self.out_tx.clone()
    }
}

pub struct StreamSession;

impl StreamSession {
    /// Opens a persistent subscription to `endpoint`, decoding frames
    /// with `decoder` and reconnecting per `policy`. Messages arrive on
    /// the returned receiver; the receiver ends when the session reaches
    /// `Closed`.
    pub fn open<T, D>(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        decoder: D,
        policy: RetryPolicy,
        enabled: bool,
    ) -> (SessionHandle, mpsc::Receiver<T>)
    where
        T: Send + 'static,
        D: FrameDecoder<T>,
    {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);
        let (enable_tx, enable_rx) = watch::channel(enabled);
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(if enabled {
            SessionState::Connecting
        } else {
            SessionState::Idle
        });

        tokio::spawn(run_session(
            connector, endpoint, decoder, policy, tx, close_rx, enable_rx, out_rx, state_tx,
        ));

        let handle = SessionHandle {
            close_tx,
            enable_tx,
            out_tx,
            state_rx,
        };
        (handle, rx)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session<T, D>(
    connector: Arc<dyn Connector>,
    endpoint: Url,
    decoder: D,
    policy: RetryPolicy,
    tx: mpsc::Sender<T>,
    mut close_rx: watch::Receiver<bool>,
    mut enable_rx: watch::Receiver<bool>,
    mut out_rx: mpsc::Receiver<Frame>,
    state_tx: watch::Sender<SessionState>,
) where
    T: Send + 'static,
    D: FrameDecoder<T>,
{
    if !wait_until_enabled(&mut enable_rx, &mut close_rx).await {
        let _ = state_tx.send(SessionState::Closed);
        return;
    }

    let mut attempt: u32 = 0;
    'session: loop {
        if *close_rx.borrow() {
            break;
        }
        let _ = state_tx.send(SessionState::Connecting);

        match connector.connect(&endpoint).await {
            Ok(mut conn) => {
                attempt = 0;
                let _ = state_tx.send(SessionState::Open);
                loop {
                    tokio::select! {
                        changed = close_rx.changed() => {
                            if changed.is_err() || *close_rx.borrow() {
                                break 'session;
                            }
                        }
                        outgoing = out_rx.recv() => match outgoing {
                            Some(frame) => {
                                if conn.outbound.send(frame).await.is_err() {
                                    warn!("stream_send_failed: {endpoint}");
                                    break;
                                }
                            }
                            // Handle dropped without close(): treat as close.
                            None => break 'session,
                        },
                        inbound = conn.inbound.recv() => match inbound {
                            Some(Ok(frame)) => match decoder.decode(frame) {
                                Ok(message) => {
                                    if tx.send(message).await.is_err() {
                                        // Consumer gone; nothing left to feed.
                                        break 'session;
                                    }
                                }
                                Err(err) => warn!("frame_decode_failed: {endpoint}: {err}"),
                            },
                            Some(Err(err)) => {
                                warn!("stream_transport_error: {endpoint}: {err}");
                                break;
                            }
                            None => {
                                debug!("stream_closed_by_peer: {endpoint}");
                                break 'session;
                            }
                        },
                    }
                }
            }
            Err(err) => {
                warn!("stream_connect_failed: {endpoint}: {err}");
            }
        }

        // Transport failure path: back off, then reconnect.
        attempt += 1;
        if !policy.allows(attempt) {
            warn!("stream_retries_exhausted: {endpoint} after {attempt} attempts");
            break;
        }
        let _ = state_tx.send(SessionState::Errored);
        let delay = policy.delay_for(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
        }
    }

    let _ = state_tx.send(SessionState::Closed);
}

/// Returns false if the session was closed before ever being enabled.
async fn wait_until_enabled(
    enable_rx: &mut watch::Receiver<bool>,
    close_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if *close_rx.borrow() {
            return false;
        }
        if *enable_rx.borrow() {
            return true;
        }
        tokio::select! {
            changed = enable_rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    return false;
                }
            }
        }
    }
}
