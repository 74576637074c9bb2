use crate::registry::WorkloadRegistry;
use crate::session::{JsonFrames, SessionHandle, StreamSession};
use crate::transport::Connector;
use harbor_core::{RetryPolicy, StatsSample};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Resource usage stream for one workload. Each sample lands on the
/// registry row as the last seen stats and is published through a watch
/// channel, so a renderer always sees the most recent value without
/// draining a queue. Stopped workloads produce no samples, so the feed
/// starts disabled unless the workload is already running.
pub struct StatsFeed {
    handle: SessionHandle,
    latest_rx: watch::Receiver<Option<StatsSample>>,
    pump: JoinHandle<()>,
}

impl StatsFeed {
    pub fn open(
        connector: Arc<dyn Connector>,
        endpoint: Url,
        registry: WorkloadRegistry,
        workload_id: &str,
        running: bool,
    ) -> Self {
        let (handle, mut rx) = StreamSession::open(
            connector,
            endpoint,
            JsonFrames::<StatsSample>::default(),
            RetryPolicy::ephemeral(),
            running,
        );
        let (latest_tx, latest_rx) = watch::channel(None);
        let workload_id = workload_id.to_string();
        let pump = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                registry.record_stats(&workload_id, sample);
                if latest_tx.send(Some(sample)).is_err() {
                    break;
                }
            }
        });
        Self {
            handle,
            latest_rx,
            pump,
        }
    }

    /// Most recent sample, if any arrived since the feed opened.
    pub fn latest(&self) -> Option<StatsSample> {
        *self.latest_rx.borrow()
    }

    /// Receiver that wakes on every new sample.
    pub fn samples(&self) -> watch::Receiver<Option<StatsSample>> {
        self.latest_rx.clone()
    }

    /// Starts the stream for a feed opened while the workload was
    /// stopped. Once the workload stops again the feed is closed and a
    /// new one opened on the next start.
    pub fn enable(&self) {
        self.handle.enable();
    }

    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Drop for StatsFeed {
    fn drop(&mut self) {
        self.handle.close();
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::transport::{Connection, Connector, Frame, TransportError};
    use async_trait::async_trait;
    use harbor_core::{Workload, WorkloadState};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct ScriptedConnector {
        script: StdMutex<VecDeque<Connection>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _endpoint: &Url) -> Result<Connection, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .ok_or_else(|| TransportError::Connect("script exhausted".to_string()))
        }
    }

    fn scripted(connections: Vec<Connection>) -> Arc<ScriptedConnector> {
        Arc::new(ScriptedConnector {
            script: StdMutex::new(connections.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        })
    }

    fn connection() -> (mpsc::Sender<Result<Frame, TransportError>>, Connection) {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        (
            in_tx,
            Connection {
                inbound: in_rx,
                outbound: out_tx,
            },
        )
    }

    fn endpoint() -> Url {
        Url::parse("ws://localhost/ws/container/abc/stats").expect("endpoint url")
    }

    // Paused clock: sleeping parks this task until every other task is
    // idle, then jumps the clock, so background work settles first.
    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    fn registry_with(id: &str) -> WorkloadRegistry {
        let registry = WorkloadRegistry::new();
        registry.upsert(Workload {
            id: id.to_string(),
            name: id.to_string(),
            image: "nginx:latest".to_string(),
            display_status: String::new(),
            state: WorkloadState::Running,
            stats: None,
        });
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn samples_surface_through_latest_and_the_registry_row() {
        let (in_tx, conn) = connection();
        let connector = scripted(vec![conn]);
        let registry = registry_with("abc");
        let feed = StatsFeed::open(connector, endpoint(), registry.clone(), "abc", true);

        in_tx
            .send(Ok(Frame::Text(
                r#"{"cpuUsagePerc":12.5,"usedMemory":1024,"availableMemory":4096}"#.to_string(),
            )))
            .await
            .expect("send sample");
        let mut samples = feed.samples();
        samples.changed().await.expect("sample arrives");

        let sample = feed.latest().expect("latest sample");
        assert!((sample.cpu_usage_percent - 12.5).abs() < f64::EPSILON);
        assert_eq!(sample.used_memory_bytes, 1024);

        let row = registry.get("abc").expect("row present");
        assert_eq!(row.stats, Some(sample));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_workload_never_dials() {
        let connector = scripted(vec![]);
        let feed = StatsFeed::open(
            connector.clone(),
            endpoint(),
            registry_with("abc"),
            "abc",
            false,
        );

        settle().await;
        assert_eq!(connector.attempts(), 0);
        assert!(feed.latest().is_none());
        assert_eq!(feed.session().state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_after_start_dials_the_stream() {
        let (_in_tx, conn) = connection();
        let connector = scripted(vec![conn]);
        let feed = StatsFeed::open(
            connector.clone(),
            endpoint(),
            registry_with("abc"),
            "abc",
            false,
        );

        settle().await;
        assert_eq!(connector.attempts(), 0);

        feed.enable();
        let mut state = feed.session().state_changes();
        while feed.session().state() != SessionState::Open {
            state.changed().await.expect("state change");
        }
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_the_ephemeral_limit() {
        let connector = scripted(vec![]);
        let feed = StatsFeed::open(
            connector.clone(),
            endpoint(),
            registry_with("abc"),
            "abc",
            true,
        );

        let mut state = feed.session().state_changes();
        while feed.session().state() != SessionState::Closed {
            state.changed().await.expect("state change");
        }
        // Initial dial plus three retries.
        assert_eq!(connector.attempts(), 4);
    }
}
