//! Rolling snapshot history and hold-to-rewind playback.
//!
//! - [`buffer`]: fixed-capacity ring of snapshots, oldest first
//! - [`controller`]: the Idle / Capturing / Rewinding state machine

pub mod buffer;
pub mod controller;

pub use buffer::RewindBuffer;
pub use controller::{RewindController, RewindMode, RewindStatus};
