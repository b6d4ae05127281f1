//! Snapshot payloads.
//!
//! A [`Snapshot`] is the engine's state at one instant as opaque bytes. This
//! crate never inspects or re-encodes those bytes; they are passed through to
//! the persistence backend and back into the engine unchanged.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;

/// Content type attached to every [`SnapshotBlob`].
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

/// Serialized engine state. Cloning shares the underlying buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot(Bytes);

impl Snapshot {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Packages the snapshot for delivery to a persistence backend.
    pub fn to_blob(&self, kind: SaveKind) -> SnapshotBlob {
        SnapshotBlob {
            data: self.0.clone(),
            kind,
            created_at: SystemTime::now(),
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("len", &self.0.len()).finish()
    }
}

impl From<Vec<u8>> for Snapshot {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<Bytes> for Snapshot {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Snapshot {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Why a save was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKind {
    Manual,
    Auto,
    Emergency,
}

impl SaveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveKind::Manual => "manual",
            SaveKind::Auto => "auto",
            SaveKind::Emergency => "emergency",
        }
    }
}

impl fmt::Display for SaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transferable form of a completed save, handed to a [`SaveSink`](crate::SaveSink).
#[derive(Debug, Clone)]
pub struct SnapshotBlob {
    data: Bytes,
    kind: SaveKind,
    created_at: SystemTime,
}

impl SnapshotBlob {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn kind(&self) -> SaveKind {
        self.kind
    }

    pub fn content_type(&self) -> &'static str {
        SNAPSHOT_CONTENT_TYPE
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot(self.data.clone())
    }
}

/// Input accepted by the load path: raw bytes or a blob produced by a save.
#[derive(Debug, Clone)]
pub enum LoadPayload {
    Raw(Bytes),
    Blob(SnapshotBlob),
}

impl LoadPayload {
    /// Converts to the snapshot handed to the engine. Lossless for both forms.
    pub fn into_snapshot(self) -> Snapshot {
        match self {
            LoadPayload::Raw(bytes) => Snapshot(bytes),
            LoadPayload::Blob(blob) => Snapshot(blob.data),
        }
    }
}

impl From<Vec<u8>> for LoadPayload {
    fn from(bytes: Vec<u8>) -> Self {
        LoadPayload::Raw(Bytes::from(bytes))
    }
}

impl From<&[u8]> for LoadPayload {
    fn from(bytes: &[u8]) -> Self {
        LoadPayload::Raw(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for LoadPayload {
    fn from(bytes: Bytes) -> Self {
        LoadPayload::Raw(bytes)
    }
}

impl From<Snapshot> for LoadPayload {
    fn from(snapshot: Snapshot) -> Self {
        LoadPayload::Raw(snapshot.0)
    }
}

impl From<SnapshotBlob> for LoadPayload {
    fn from(blob: SnapshotBlob) -> Self {
        LoadPayload::Blob(blob)
    }
}
