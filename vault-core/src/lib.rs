//! Chunked, content-addressable file vault.
//!
//! Files are split into fixed-size chunks placed round-robin across a node
//! set, committed as a [`manifest::FileRecord`] (per-chunk digests, whole-file
//! digest, Merkle root), and later streamed back or re-verified.

pub mod chunker;
pub mod commit;
pub mod config;
pub mod error;
pub mod manifest;
pub mod merkle;
pub mod node;
pub mod path_safety;
pub mod reconstruct;
pub mod service;
pub mod store;
pub mod usage;
pub mod verify;

pub use error::{Result, VaultError};
pub use manifest::{Chunk, DownloadInfo, FileRecord, FileSummary};
pub use service::{Download, SweepReport, UploadRequest, Vault};
pub use verify::VerifyReport;
