use std::io;
use std::path::PathBuf;

/// Errors surfaced by the vault engine.
///
/// An integrity mismatch is not represented here: a verification that completes
/// reports mismatches through [`crate::verify::VerifyReport`].
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("source read failed at offset {offset}: {source}")]
    SourceRead {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("write of chunk {name} to node {node} failed: {source}")]
    StorageWrite {
        node: String,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("chunk {index} ({node}/{name}) unreadable: {source}")]
    ChunkMissing {
        index: u64,
        node: String,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("chunk {index} references unknown node {node}")]
    UnknownNode { index: u64, node: String },

    #[error("file id already committed: {0}")]
    DuplicateFileId(String),

    #[error("invalid {kind} {value:?}: {reason}")]
    InvalidName { kind: &'static str, value: String, reason: &'static str },

    #[error("quota exceeded: {used} used + {incoming} incoming > {limit} limit")]
    QuotaExceeded { used: u64, incoming: u64, limit: u64 },

    #[error("invalid file record {file_id}: {reason}")]
    InvalidRecord { file_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata store {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("vault lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VaultError {
    /// True when the error means "no such file for this owner".
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }

    pub(crate) fn store(context: impl Into<String>, source: io::Error) -> Self {
        VaultError::Store { context: context.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
