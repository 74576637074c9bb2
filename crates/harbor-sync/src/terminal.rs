use crate::session::{RawFrames, SessionHandle, StreamSession};
use crate::transport::{Connector, Frame};
use harbor_core::RetryPolicy;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// Render target for terminal output. Chunks arrive in stream order and
/// may split escape sequences; the surface owns any buffering it needs.
pub trait TerminalSurface: Send + 'static {
    fn render(&mut self, chunk: &[u8]);
}

impl<F> TerminalSurface for F
where
    F: FnMut(&[u8]) + Send + 'static,
{
    fn render(&mut self, chunk: &[u8]) {
        self(chunk)
    }
}

struct ActiveTerminal {
    workload_id: String,
    session: SessionHandle,
    pump: JoinHandle<()>,
}

/// Interactive shell attachment, at most one workload at a time.
/// Attaching while attached detaches the previous terminal first;
/// detaching is idempotent.
pub struct TerminalBridge {
    connector: Arc<dyn Connector>,
    active: Option<ActiveTerminal>,
}

impl TerminalBridge {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            active: None,
        }
    }

    pub fn attached_to(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.workload_id.as_str())
    }

    /// Attaches to `workload_id`'s shell. Output chunks go to `surface`;
    /// operator keystrokes are drained from `input`. An existing
    /// attachment is detached first.
    pub fn attach(
        &mut self,
        workload_id: &str,
        endpoint: Url,
        mut surface: impl TerminalSurface,
        mut input: mpsc::Receiver<Vec<u8>>,
    ) {
        self.detach();
        let (session, mut rx) = StreamSession::open(
            self.connector.clone(),
            endpoint,
            RawFrames,
            RetryPolicy::ephemeral(),
            true,
        );
        let outbound = session.outbound();
        let pump = tokio::spawn(async move {
            let mut input_open = true;
            loop {
                tokio::select! {
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => surface.render(&chunk),
                        None => break,
                    },
                    keys = input.recv(), if input_open => match keys {
                        Some(bytes) => {
                            if outbound.send(Frame::Binary(bytes)).await.is_err() {
                                input_open = false;
                            }
                        }
                        None => input_open = false,
                    },
                }
            }
            debug!("terminal_stream_ended");
        });
        self.active = Some(ActiveTerminal {
            workload_id: workload_id.to_string(),
            session,
            pump,
        });
    }

    pub fn detach(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("terminal_detached: id={}", active.workload_id);
            active.session.close();
            active.pump.abort();
        }
    }
}

impl Drop for TerminalBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
