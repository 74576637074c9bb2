use crate::engine::{EngineApi, EngineError};
use harbor_core::PendingAction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

type RemovedCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum CommandError {
    /// A command for this workload is still in flight; one busy marker
    /// per id, so concurrent commands are refused rather than silently
    /// sharing it.
    #[error("workload busy: {0} already in flight")]
    Busy(PendingAction),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Issues lifecycle commands against the engine and tracks which
/// workloads have one in flight. The registry is never touched from
/// here; the resulting state change arrives through the event
/// reconciler, so a command merely marks the workload busy until the
/// engine answers.
pub struct LifecycleCommander {
    engine: Arc<dyn EngineApi>,
    pending: Mutex<HashMap<String, PendingAction>>,
    removed: Option<RemovedCallback>,
}

impl LifecycleCommander {
    pub fn new(engine: Arc<dyn EngineApi>) -> Self {
        Self {
            engine,
            pending: Mutex::new(HashMap::new()),
            removed: None,
        }
    }

    /// Registers a callback fired after a remove command settles, success
    /// or failure. A dashboard uses it to dismiss the detail view; the
    /// registry entry itself goes away via the destroy event.
    pub fn on_removed(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.removed = Some(Box::new(callback));
        self
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<String, PendingAction>> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// In-flight marker for `id`, for rendering busy states.
    pub fn pending(&self, id: &str) -> PendingAction {
        self.pending_lock().get(id).copied().unwrap_or_default()
    }

    pub async fn start(&self, id: &str) -> Result<(), CommandError> {
        self.command(id, PendingAction::Starting).await
    }

    pub async fn stop(&self, id: &str) -> Result<(), CommandError> {
        self.command(id, PendingAction::Stopping).await
    }

    pub async fn restart(&self, id: &str) -> Result<(), CommandError> {
        self.command(id, PendingAction::Restarting).await
    }

    pub async fn remove(&self, id: &str) -> Result<(), CommandError> {
        let result = self.command(id, PendingAction::Removing).await;
        // The callback reports a settled remove; a refused command never
        // reached the engine, so nothing settled.
        if !matches!(result, Err(CommandError::Busy(_))) {
            if let Some(removed) = &self.removed {
                removed(id);
            }
        }
        result
    }

    async fn command(&self, id: &str, action: PendingAction) -> Result<(), CommandError> {
        {
            let mut pending = self.pending_lock();
            if let Some(current) = pending.get(id) {
                if !current.is_idle() {
                    warn!("lifecycle_command_refused: {action} id={id}: {current} in flight");
                    return Err(CommandError::Busy(*current));
                }
            }
            pending.insert(id.to_string(), action);
        }
        info!("lifecycle_command: {action} id={id}");
        let result = match action {
            PendingAction::Starting => self.engine.start_workload(id).await,
            PendingAction::Stopping => self.engine.stop_workload(id).await,
            PendingAction::Restarting => self.engine.restart_workload(id).await,
            PendingAction::Removing => self.engine.remove_workload(id).await,
            PendingAction::None => Ok(()),
        };
        self.pending_lock().remove(id);
        if let Err(err) = &result {
            warn!("lifecycle_command_failed: {action} id={id}: {err}");
        }
        Ok(result?)
    }
}
