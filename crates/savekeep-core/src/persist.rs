//! Persistence backend seam.
//!
//! Completed saves are handed to a [`SaveSink`] as [`SnapshotBlob`]s. How a
//! sink ships them further (cloud save, file download) is its own business.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::error::SaveError;
use crate::snapshot::SnapshotBlob;

/// Receives the bytes produced by a completed save.
pub trait SaveSink: Send + Sync {
    fn deliver(&self, blob: &SnapshotBlob) -> Result<(), SaveError>;
}

/// Writes each blob to `<dir>/<kind>-<seq>.state`, bytes unchanged.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    next_seq: AtomicU64,
}

impl DirectorySink {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SaveError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SaveSink for DirectorySink {
    fn deliver(&self, blob: &SnapshotBlob) -> Result<(), SaveError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{}-{seq:04}.state", blob.kind()));
        fs::write(&path, blob.data())?;
        info!(path = %path.display(), bytes = blob.len(), kind = %blob.kind(), "save written");
        Ok(())
    }
}

/// Keeps delivered blobs in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    blobs: Mutex<Vec<SnapshotBlob>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blobs(&self) -> Vec<SnapshotBlob> {
        self.blobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl SaveSink for MemorySink {
    fn deliver(&self, blob: &SnapshotBlob) -> Result<(), SaveError> {
        self.blobs.lock().push(blob.clone());
        Ok(())
    }
}
