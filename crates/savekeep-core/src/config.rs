//! Timing constants and configuration structs.

use std::time::Duration;

/// A queued request is abandoned if it has not been serviced this long after enqueue.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
/// Minimum gap between two engine state operations.
pub const MIN_OP_SPACING: Duration = Duration::from_millis(100);
/// Low-priority enqueues are rejected once this many are already queued.
pub const MAX_PENDING_LOW: usize = 3;
/// Pause between a restore and the explicit resume that follows it.
pub const RESUME_DELAY: Duration = Duration::from_millis(50);

pub const DEFAULT_REWIND_CAPACITY: usize = 60;
pub const CAPTURE_INTERVAL: Duration = Duration::from_millis(500);
pub const REWIND_STEP_INTERVAL: Duration = Duration::from_millis(200);
/// Quiet period after rewinding before capture is re-armed.
pub const REWIND_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for the save [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub request_timeout: Duration,
    pub min_spacing: Duration,
    pub max_pending_low: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            min_spacing: MIN_OP_SPACING,
            max_pending_low: MAX_PENDING_LOW,
        }
    }
}

/// Configuration for the [`RewindController`](crate::RewindController).
#[derive(Debug, Clone)]
pub struct RewindConfig {
    /// When `false`, `start_capture` is ignored and the buffer stays empty.
    pub enabled: bool,
    /// Maximum number of snapshots kept (oldest are evicted first).
    pub capacity: usize,
    pub capture_interval: Duration,
    pub step_interval: Duration,
    pub settle_delay: Duration,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_REWIND_CAPACITY,
            capture_interval: CAPTURE_INTERVAL,
            step_interval: REWIND_STEP_INTERVAL,
            settle_delay: REWIND_SETTLE_DELAY,
        }
    }
}

/// Configuration for periodic auto-saves.
#[derive(Debug, Clone, Default)]
pub struct AutoSaveConfig {
    /// `None` disables auto-save.
    pub interval: Option<Duration>,
}

/// Everything a [`SaveSession`](crate::SaveSession) needs to start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scheduler: SchedulerConfig,
    pub rewind: RewindConfig,
    pub auto_save: AutoSaveConfig,
    /// Delay between restore and resume, for slot loads and rewind steps alike.
    pub resume_delay: Duration,
    /// Take a final high-priority save when the session shuts down.
    pub emergency_save: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            rewind: RewindConfig::default(),
            auto_save: AutoSaveConfig::default(),
            resume_delay: RESUME_DELAY,
            emergency_save: true,
        }
    }
}
