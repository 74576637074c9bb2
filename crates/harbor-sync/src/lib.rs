//! Real-time synchronization core for a workload dashboard client.
//!
//! The registry holds the authoritative workload table and is mutated
//! only by the event reconciler, which consumes the engine's lifecycle
//! event stream. Per-workload streams (logs, stats, terminal) run as
//! reconnecting sessions over a pluggable transport, and lifecycle
//! commands go out through the commander, which never writes to the
//! registry itself.

pub mod commander;
pub mod engine;
pub mod logs;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod stats;
pub mod terminal;
pub mod transport;

pub use commander::{CommandError, LifecycleCommander};
pub use engine::{EngineApi, EngineEndpoints, EngineError, HttpEngine};
pub use logs::{LogBuffer, LogFeed, LogRecord, DEFAULT_LOG_CEILING};
pub use reconciler::{reconcile_step, EventReconciler, ReconcileStep};
pub use registry::{ObserverId, RegistryDelta, WorkloadRegistry};
pub use session::{JsonFrames, RawFrames, SessionHandle, SessionState, StreamSession};
pub use stats::StatsFeed;
pub use terminal::{TerminalBridge, TerminalSurface};
pub use transport::{Connection, Connector, Frame, TransportError, WsConnector};
