use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod codec;
pub mod policy;

pub use policy::RetryPolicy;

/// Client-side view of one workload. At most one entry per `id` lives in
/// the registry at any time; `state` is the single source of truth for
/// run/stop affordances, `display_status` is informational free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub image: String,
    pub display_status: String,
    pub state: WorkloadState,
    #[serde(default)]
    pub stats: Option<StatsSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl Default for WorkloadState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl WorkloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadState::Created => "created",
            WorkloadState::Running => "running",
            WorkloadState::Exited => "exited",
            WorkloadState::Unknown => "unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, WorkloadState::Running)
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for WorkloadState {
    /// Engine states outside the modeled set (paused, restarting, dead)
    /// bucket into `Unknown` rather than failing.
    fn from(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "created" => WorkloadState::Created,
            "running" => WorkloadState::Running,
            "exited" => WorkloadState::Exited,
            _ => WorkloadState::Unknown,
        }
    }
}

impl Serialize for WorkloadState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkloadState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(WorkloadState::from(raw.as_str()))
    }
}

/// Wire shape of a workload record as the engine reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "State", default)]
    pub state: String,
}

impl From<EngineRecord> for Workload {
    fn from(record: EngineRecord) -> Self {
        let name = record
            .names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let state = WorkloadState::from(record.state.as_str());
        Workload {
            id: record.id,
            name,
            image: record.image,
            display_status: record.status,
            state,
            stats: None,
        }
    }
}

/// One message from the global lifecycle event feed. Arrival order is the
/// only ordering guarantee; timestamps are not assumed reliable across
/// reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleEvent {
    #[serde(rename = "Action")]
    pub action: EventAction,
    #[serde(rename = "Actor")]
    pub actor: EventActor,
}

impl LifecycleEvent {
    pub fn workload_id(&self) -> &str {
        &self.actor.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventActor {
    #[serde(rename = "ID")]
    pub id: String,
}

/// Engine event action. Unknown actions decode into `Other` so a newer
/// engine never breaks the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Start,
    Stop,
    Destroy,
    Other(String),
}

impl EventAction {
    pub fn as_str(&self) -> &str {
        match self {
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Destroy => "destroy",
            EventAction::Other(raw) => raw,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventAction {
    fn from(raw: &str) -> Self {
        match raw {
            "start" => EventAction::Start,
            "stop" => EventAction::Stop,
            "destroy" => EventAction::Destroy,
            other => EventAction::Other(other.to_string()),
        }
    }
}

impl Serialize for EventAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(EventAction::from(raw.as_str()))
    }
}

/// One sample from a per-workload stat feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct StatsSample {
    #[serde(rename = "cpuUsagePerc", default)]
    pub cpu_usage_percent: f64,
    #[serde(rename = "usedMemory", default)]
    pub used_memory_bytes: u64,
    #[serde(rename = "availableMemory", default)]
    pub available_memory_bytes: u64,
}

/// One log line as framed by the engine. The timestamp is source-assigned
/// and used only as a display/de-dup hint, never for reordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Transient in-flight command marker, owned by the lifecycle commander
/// and independent of the registry's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingAction {
    #[default]
    None,
    Starting,
    Stopping,
    Restarting,
    Removing,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::None => "none",
            PendingAction::Starting => "starting",
            PendingAction::Stopping => "stopping",
            PendingAction::Restarting => "restarting",
            PendingAction::Removing => "removing",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PendingAction::None)
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
