use crate::session::{JsonFrames, SessionHandle, StreamSession};
use crate::transport::Connector;
use harbor_core::{LogLine, RetryPolicy};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// Retention ceiling applied when the caller does not pick one.
pub const DEFAULT_LOG_CEILING: usize = 1000;

/// One retained log line. `seq` is assigned on append and keeps rising
/// even as old lines are evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub seq: u64,
    pub message: String,
    pub timestamp: String,
}

type LogObserver = Box<dyn Fn(&LogRecord) + Send>;

/// Bounded in-memory retention of streamed log lines, oldest evicted
/// first. Shared between the feed pump and whatever renders the lines.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

struct BufferInner {
    records: VecDeque<LogRecord>,
    ceiling: usize,
    next_seq: u64,
    closed: bool,
    observers: Vec<LogObserver>,
}

impl LogBuffer {
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferInner {
                records: VecDeque::with_capacity(ceiling.min(DEFAULT_LOG_CEILING)),
                ceiling: ceiling.max(1),
                next_seq: 0,
                closed: false,
                observers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Appends under the buffer lock. A closed buffer drops the line, so
    /// a pump racing `close()` can never land a line afterwards.
    pub fn append(&self, line: LogLine) {
        let mut inner = self.lock();
        if inner.closed {
            debug!("log_line_after_close_dropped");
            return;
        }
        inner.next_seq += 1;
        let record = LogRecord {
            seq: inner.next_seq,
            message: line.message,
            timestamp: line.timestamp,
        };
        inner.records.push_back(record.clone());
        while inner.records.len() > inner.ceiling {
            inner.records.pop_front();
        }
        for observer in &inner.observers {
            observer(&record);
        }
    }

    /// Retained lines, oldest first.
    pub fn lines(&self) -> Vec<LogRecord> {
        self.lock().records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Case-insensitive substring match over retained messages. An empty
    /// query matches nothing rather than everything.
    pub fn search(&self, query: &str) -> Vec<LogRecord> {
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.lock()
            .records
            .iter()
            .filter(|record| record.message.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.next_seq = 0;
    }

    /// Empties the buffer and refuses all further appends. Terminal; a
    /// new subscribe cycle gets a new buffer.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.records.clear();
        inner.next_seq = 0;
    }

    pub fn subscribe(&self, observer: impl Fn(&LogRecord) + Send + 'static) {
        self.lock().observers.push(Box::new(observer));
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CEILING)
    }
}

/// A live log stream for one workload, feeding a [`LogBuffer`]. Closing
/// the feed seals the buffer under its own lock, so no late line lands
/// after the close even if the pump task is still winding down.
pub struct LogFeed {
    buffer: LogBuffer,
    handle: SessionHandle,
    pump: JoinHandle<()>,
}

impl LogFeed {
    pub fn open(connector: Arc<dyn Connector>, endpoint: Url, ceiling: usize) -> Self {
        let buffer = LogBuffer::new(ceiling);
        let (handle, mut rx) = StreamSession::open(
            connector,
            endpoint,
            JsonFrames::<LogLine>::default(),
            RetryPolicy::ephemeral(),
            true,
        );
        let pump = tokio::spawn({
            let buffer = buffer.clone();
            async move {
                while let Some(line) = rx.recv().await {
                    buffer.append(line);
                }
            }
        });
        Self {
            buffer,
            handle,
            pump,
        }
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
        self.buffer.close();
    }
}

impl Drop for LogFeed {
    fn drop(&mut self) {
        self.close();
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(message: &str) -> LogLine {
        LogLine {
            message: message.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn append_evicts_oldest_beyond_the_ceiling() {
        let buffer = LogBuffer::new(3);
        for message in ["L1", "L2", "L3", "L4", "L5"] {
            buffer.append(line(message));
        }
        let messages: Vec<_> = buffer.lines().iter().map(|r| r.message.clone()).collect();
        assert_eq!(messages, vec!["L3", "L4", "L5"]);
        // Sequence numbers keep counting across evictions.
        assert_eq!(buffer.lines()[0].seq, 3);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let buffer = LogBuffer::new(10);
        buffer.append(line("Connection Established"));
        buffer.append(line("error: connection refused"));
        buffer.append(line("ready"));

        let hits = buffer.search("CONNECTION");
        assert_eq!(hits.len(), 2);
        assert_eq!(buffer.search("refused").len(), 1);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let buffer = LogBuffer::new(10);
        buffer.append(line("anything"));
        assert!(buffer.search("").is_empty());
    }

    #[test]
    fn clear_empties_and_resets_sequencing() {
        let buffer = LogBuffer::new(10);
        buffer.append(line("one"));
        buffer.append(line("two"));
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.append(line("fresh"));
        assert_eq!(buffer.lines()[0].seq, 1);
    }

    #[test]
    fn closed_buffer_drops_appends() {
        let buffer = LogBuffer::new(10);
        buffer.append(line("kept until close"));
        buffer.close();
        // A pump that lost the race to close() must not land its line.
        buffer.append(line("late"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn observers_see_each_appended_record() {
        let buffer = LogBuffer::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        buffer.subscribe({
            let seen = seen.clone();
            move |record| seen.lock().expect("seen lock").push(record.message.clone())
        });
        buffer.append(line("a"));
        buffer.append(line("b"));
        assert_eq!(*seen.lock().expect("seen lock"), vec!["a", "b"]);
    }

    mod feed {
        use super::*;
        use crate::session::SessionState;
        use crate::transport::{Connection, Connector, Frame, TransportError};
        use async_trait::async_trait;
        use std::collections::VecDeque as StdVecDeque;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex as StdMutex;
        use tokio::sync::mpsc;

        struct ScriptedConnector {
            script: StdMutex<StdVecDeque<Connection>>,
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

        fn endpoint() -> Url {
            Url::parse("ws://localhost/ws/container/abc/logs").expect("endpoint url")
        }

        // Paused clock: sleeping parks this task until every other task
        // is idle, then jumps the clock, so the pump settles first.
        async fn settle() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        #[tokio::test(start_paused = true)]
        async fn streamed_lines_land_in_the_buffer() {
            let (in_tx, in_rx) = mpsc::channel(8);
            let (out_tx, _out_rx) = mpsc::channel(8);
            let connection = Connection {
                inbound: in_rx,
                outbound: out_tx,
            };
            let connector = scripted(vec![connection]);
            let feed = LogFeed::open(connector, endpoint(), 10);

            in_tx
                .send(Ok(Frame::Text(
                    r#"{"timestamp":"t1","message":"hello"}"#.to_string(),
                )))
                .await
                .expect("send frame");
            drop(in_tx);
            settle().await;

            let lines = feed.buffer().lines();
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].message, "hello");
            assert_eq!(lines[0].timestamp, "t1");
        }

        #[tokio::test(start_paused = true)]
        async fn close_clears_the_buffer_and_blocks_late_lines() {
            let (in_tx, in_rx) = mpsc::channel(8);
            let (out_tx, _out_rx) = mpsc::channel(8);
            let connection = Connection {
                inbound: in_rx,
                outbound: out_tx,
            };
            let connector = scripted(vec![connection]);
            let feed = LogFeed::open(connector, endpoint(), 10);

            in_tx
                .send(Ok(Frame::Text(r#"{"message":"early"}"#.to_string())))
                .await
                .expect("send frame");
            settle().await;
            assert_eq!(feed.buffer().len(), 1);

            feed.close();
            assert!(feed.buffer().is_empty());

            // A line already in flight when close hit must not reappear.
            let _ = in_tx
                .send(Ok(Frame::Text(r#"{"message":"late"}"#.to_string())))
                .await;
            drop(in_tx);
            settle().await;
            assert!(feed.buffer().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn feed_gives_up_after_the_retry_limit() {
            let connector = scripted(vec![]);
            let feed = LogFeed::open(connector.clone(), endpoint(), 10);

            let mut state = feed.session().state_changes();
            while feed.session().state() != SessionState::Closed {
                state.changed().await.expect("state change");
            }
            // Initial dial plus three retries; per-workload feeds do not
            // reconnect forever.
            assert_eq!(connector.attempts(), 4);
            assert!(feed.buffer().is_empty());
        }
    }
}
