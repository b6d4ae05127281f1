//! Save scheduling and rewind history for an embedded emulation engine.
//!
//! The engine behind this crate keeps its state in a virtual filesystem that
//! tolerates exactly one state operation at a time. Everything here exists to
//! keep that promise while several callers want snapshots at once.
//!
//! # Architecture
//!
//! - [`scheduler`]: single-flight priority queue for every capture request
//! - [`rewind`]: bounded snapshot history and the capture/rewind state machine
//! - [`engine`]: the engine collaborator trait and the per-session wrapper
//! - [`load`]: the restore path shared by slot loading and rewind playback
//! - [`autosave`]: periodic high-priority saves handed to a [`SaveSink`]
//! - [`session`]: facade tying the pieces together for UI code
//! - [`error`]: error types

pub mod autosave;
pub mod config;
pub mod engine;
pub mod error;
pub mod load;
pub mod mock;
pub mod persist;
pub mod request;
pub mod rewind;
pub mod scheduler;
pub mod session;
pub mod snapshot;

pub use autosave::AutoSaver;
pub use config::{AutoSaveConfig, RewindConfig, SchedulerConfig, SessionConfig};
pub use engine::{Engine, EngineError, EngineGuard, EngineSession};
pub use error::SaveError;
pub use persist::{DirectorySink, MemorySink, SaveSink};
pub use request::{Priority, SaveOutcome, SaveTicket};
pub use rewind::{RewindBuffer, RewindController, RewindMode, RewindStatus};
pub use scheduler::{Scheduler, SchedulerStats};
pub use session::{SaveSession, SessionStatus};
pub use snapshot::{LoadPayload, SaveKind, Snapshot, SnapshotBlob};
