use harbor_core::{StatsSample, Workload};
use std::sync::{Arc, Mutex, MutexGuard};

/// Structured change pushed to registry observers, together with the
/// effect already applied.
#[derive(Debug, Clone)]
pub enum RegistryDelta {
    Upserted(Workload),
    Removed(String),
    Replaced(Vec<Workload>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&RegistryDelta) + Send>;

/// The authoritative client-side table of known workloads, insertion
/// order preserved. Mutated only by the event reconciler and the initial
/// list loader; everything else reads snapshots or observes deltas.
///
/// Observers are notified synchronously while the mutation lock is held,
/// so an observer must not call back into the registry.
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Workload>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Current snapshot in insertion order.
    pub fn list(&self) -> Vec<Workload> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<Workload> {
        self.lock()
            .entries
            .iter()
            .find(|workload| workload.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Replaces the entry with the same id or appends a new one. Never
    /// leaves two entries with the same id. Point fetches carry no
    /// sample, so a replacement without one keeps the last seen stats.
    pub fn upsert(&self, mut workload: Workload) {
        let mut inner = self.lock();
        match inner
            .entries
            .iter()
            .position(|existing| existing.id == workload.id)
        {
            Some(index) => {
                if workload.stats.is_none() {
                    workload.stats = inner.entries[index].stats;
                }
                inner.entries[index] = workload.clone();
            }
            None => inner.entries.push(workload.clone()),
        }
        inner.notify(&RegistryDelta::Upserted(workload));
    }

    /// Stores the latest stat sample on the row. A no-op for unknown
    /// ids; samples only decorate workloads the registry already holds.
    pub fn record_stats(&self, id: &str, sample: StatsSample) {
        let mut inner = self.lock();
        if let Some(index) = inner.entries.iter().position(|workload| workload.id == id) {
            inner.entries[index].stats = Some(sample);
            let updated = inner.entries[index].clone();
            inner.notify(&RegistryDelta::Upserted(updated));
        }
    }

    /// Deletes by id; a no-op (and no notification) when absent, which
    /// makes double-removal via command callback plus destroy event safe.
    pub fn remove(&self, id: &str) {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|workload| workload.id != id);
        if inner.entries.len() != before {
            inner.notify(&RegistryDelta::Removed(id.to_string()));
        }
    }

    /// Swaps in a full snapshot (initial load). Duplicate ids in the
    /// input collapse to the last occurrence, preserving first-seen
    /// order.
    pub fn replace_all(&self, entries: Vec<Workload>) {
        let mut deduped: Vec<Workload> = Vec::with_capacity(entries.len());
        for workload in entries {
            match deduped.iter().position(|existing| existing.id == workload.id) {
                Some(index) => deduped[index] = workload,
                None => deduped.push(workload),
            }
        }
        let mut inner = self.lock();
        inner.entries = deduped.clone();
        inner.notify(&RegistryDelta::Replaced(deduped));
    }

    pub fn subscribe(&self, observer: impl Fn(&RegistryDelta) + Send + 'static) -> ObserverId {
        let mut inner = self.lock();
        inner.next_observer_id += 1;
        let id = ObserverId(inner.next_observer_id);
        inner.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.lock().observers.retain(|(existing, _)| *existing != id);
    }
}

impl Inner {
    fn notify(&self, delta: &RegistryDelta) {
        for (_, observer) in &self.observers {
            observer(delta);
        }
    }
}
