use crate::engine::{EngineApi, EngineError};
use crate::registry::WorkloadRegistry;
use harbor_core::{EventAction, LifecycleEvent, Workload};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const FETCH_CHANNEL_CAPACITY: usize = 32;

/// Effect of one lifecycle event on the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    /// The event payload is not trusted to carry the full record; fetch
    /// it from the engine and upsert the result.
    Refetch,
    Remove,
    Ignore,
}

/// Table mapping event actions onto registry effects. Start and stop may
/// also have changed the status string and image, hence the refetch;
/// destroyed workloads can no longer be queried, hence the direct remove.
pub fn reconcile_step(action: &EventAction) -> ReconcileStep {
    match action {
        EventAction::Start | EventAction::Stop => ReconcileStep::Refetch,
        EventAction::Destroy => ReconcileStep::Remove,
        EventAction::Other(_) => ReconcileStep::Ignore,
    }
}

/// Consumes the global lifecycle event feed and applies each event to the
/// registry. Point fetches run concurrently; each carries the arrival
/// order of its triggering event so that a slow fetch completing after a
/// newer event for the same workload is discarded instead of clobbering
/// newer state.
pub struct EventReconciler {
    registry: WorkloadRegistry,
    engine: Arc<dyn EngineApi>,
}

struct FetchOutcome {
    workload_id: String,
    event_seq: u64,
    result: Result<Workload, EngineError>,
}

/// Per-id bookkeeping for in-flight point fetches. An id's entry exists
/// only while at least one fetch for it is outstanding, so the tracker
/// stays bounded by concurrency, not by how many ids were ever seen.
#[derive(Default)]
struct FetchTracker {
    windows: HashMap<String, FetchWindow>,
}

struct FetchWindow {
    newest_seq: u64,
    in_flight: u32,
}

impl FetchTracker {
    fn begin(&mut self, id: &str, seq: u64) {
        let window = self.windows.entry(id.to_string()).or_insert(FetchWindow {
            newest_seq: seq,
            in_flight: 0,
        });
        window.newest_seq = seq;
        window.in_flight += 1;
    }

    /// Marks a removal so fetches spawned by older events cannot
    /// resurrect the row. Nothing to record when no fetch is in flight.
    fn note_removal(&mut self, id: &str, seq: u64) {
        if let Some(window) = self.windows.get_mut(id) {
            window.newest_seq = seq;
        }
    }

    /// Settles one fetch, returning true when its result is stale. The
    /// id's entry is dropped once its last outstanding fetch settles.
    fn settle(&mut self, id: &str, seq: u64) -> bool {
        match self.windows.get_mut(id) {
            Some(window) => {
                let stale = window.newest_seq > seq;
                window.in_flight = window.in_flight.saturating_sub(1);
                if window.in_flight == 0 {
                    self.windows.remove(id);
                }
                stale
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows.len()
    }
}

impl EventReconciler {
    pub fn new(registry: WorkloadRegistry, engine: Arc<dyn EngineApi>) -> Self {
        Self { registry, engine }
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        &self.registry
    }

    /// Fetches the full workload list and swaps it into the registry.
    pub async fn load_initial(&self) -> Result<usize, EngineError> {
        let workloads = self.engine.list_workloads().await?;
        let count = workloads.len();
        self.registry.replace_all(workloads);
        Ok(count)
    }

    /// Runs until the event receiver ends, then drains in-flight fetches.
    pub async fn run(&self, mut events: mpsc::Receiver<LifecycleEvent>) {
        let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchOutcome>(FETCH_CHANNEL_CAPACITY);
        let mut next_seq: u64 = 0;
        let mut tracker = FetchTracker::default();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        next_seq += 1;
                        self.apply_event(event, next_seq, &mut tracker, &fetch_tx);
                    }
                    None => break,
                },
                Some(outcome) = fetch_rx.recv() => {
                    self.apply_fetch(outcome, &mut tracker);
                }
            }
        }

        drop(fetch_tx);
        while let Some(outcome) = fetch_rx.recv().await {
            self.apply_fetch(outcome, &mut tracker);
        }
    }

    fn apply_event(
        &self,
        event: LifecycleEvent,
        seq: u64,
        tracker: &mut FetchTracker,
        fetch_tx: &mpsc::Sender<FetchOutcome>,
    ) {
        let workload_id = event.actor.id;
        match reconcile_step(&event.action) {
            ReconcileStep::Refetch => {
                tracker.begin(&workload_id, seq);
                let engine = self.engine.clone();
                let fetch_tx = fetch_tx.clone();
                tokio::spawn(async move {
                    let result = engine.get_workload(&workload_id).await;
                    let _ = fetch_tx
                        .send(FetchOutcome {
                            workload_id,
                            event_seq: seq,
                            result,
                        })
                        .await;
                });
            }
            ReconcileStep::Remove => {
                tracker.note_removal(&workload_id, seq);
                self.registry.remove(&workload_id);
            }
            ReconcileStep::Ignore => {
                debug!("event_ignored: action={} id={workload_id}", event.action);
            }
        }
    }

    fn apply_fetch(&self, outcome: FetchOutcome, tracker: &mut FetchTracker) {
        if tracker.settle(&outcome.workload_id, outcome.event_seq) {
            debug!("stale_fetch_discarded: id={}", outcome.workload_id);
            return;
        }
        match outcome.result {
            Ok(workload) => self.registry.upsert(workload),
            Err(err) => {
                // The workload may have vanished between event and fetch;
                // leave the registry unchanged rather than inserting a
                // partial record.
                warn!("workload_fetch_failed: id={} {err}", outcome.workload_id);
            }
        }
    }
}
