use std::path::PathBuf;

/// Errors that can occur in the shared-memory store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The share token cannot name a backing file.
    #[error("invalid share token {0:?}")]
    InvalidToken(String),

    /// Creating or opening the shared segment failed. Fatal at
    /// construction.
    #[error("failed to attach shared segment at {path}: {source}")]
    Attach {
        path: PathBuf,
        #[source]
        source: shared_memory::ShmemError,
    },

    /// An existing segment under this token does not match this layout.
    #[error("shared segment at {path} is incompatible: {reason}")]
    Incompatible { path: PathBuf, reason: String },

    /// The segment never finished initialization by its creator.
    #[error("segment initialization failed: {0}")]
    Init(String),

    /// Taking the cross-process lock failed.
    #[error("cross-process lock failed: {0}")]
    Lock(String),

    /// The value does not fit a slot.
    #[error("value too large for slot ({len} bytes, max {max})")]
    ValueTooLarge { len: usize, max: usize },

    /// Every slot is occupied.
    #[error("store full ({slots} slots in use)")]
    Full { slots: usize },

    /// The store was already released.
    #[error("store released")]
    Released,

    /// Value serialization or deserialization failed.
    #[error("value codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
