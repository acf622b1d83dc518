use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// One contiguous byte range of a stored file and where it lives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: u64,
    pub node: String,
    pub name: String,
    pub len: u64,
    pub digest: String,
}

/// Durable commitment for one stored file. Immutable once created.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_size: u64,
    pub chunks: Vec<Chunk>,
    pub chunk_hashes: Vec<String>,
    pub file_hash: String,
    /// `None` only for an empty file (no leaves).
    pub merkle_root: Option<String>,
}

/// Public view returned from upload and listing. Carries no placement detail.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub total_chunks: u64,
}

/// What a transport needs before it starts streaming a download body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadInfo {
    pub content_type: String,
    pub file_name: String,
    pub size_bytes: u64,
}

impl DownloadInfo {
    pub fn content_disposition(&self) -> String {
        let escaped = self.file_name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("attachment; filename=\"{}\"", escaped)
    }
}

impl FileRecord {
    pub fn total_chunks(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
            uploaded_at: self.uploaded_at,
            size_bytes: self.size_bytes,
            total_chunks: self.total_chunks(),
        }
    }

    pub fn download_info(&self) -> DownloadInfo {
        let content_type = if self.file_type.is_empty() {
            "application/octet-stream".to_string()
        } else {
            self.file_type.clone()
        };
        let file_name =
            if self.file_name.is_empty() { self.file_id.clone() } else { self.file_name.clone() };
        DownloadInfo { content_type, file_name, size_bytes: self.size_bytes }
    }

    /// Structural checks: manifest and hash list agree, indices are contiguous
    /// and chunk lengths tile `size_bytes`.
    pub fn validate(&self) -> Result<()> {
        let bad = |reason: String| VaultError::InvalidRecord {
            file_id: self.file_id.clone(),
            reason,
        };
        if self.chunks.len() != self.chunk_hashes.len() {
            return Err(bad(format!(
                "{} chunks but {} chunk hashes",
                self.chunks.len(),
                self.chunk_hashes.len()
            )));
        }
        if self.chunk_size == 0 {
            return Err(bad("chunk size is zero".into()));
        }
        let expected_chunks = self.size_bytes.div_ceil(self.chunk_size);
        if self.total_chunks() != expected_chunks {
            return Err(bad(format!(
                "{} bytes at chunk size {} needs {} chunks, record has {}",
                self.size_bytes,
                self.chunk_size,
                expected_chunks,
                self.total_chunks()
            )));
        }
        let mut covered = 0u64;
        for (i, (ch, h)) in self.chunks.iter().zip(&self.chunk_hashes).enumerate() {
            if ch.index != i as u64 {
                return Err(bad(format!("chunk at position {} has index {}", i, ch.index)));
            }
            if ch.digest != *h {
                return Err(bad(format!("chunk {} digest differs from chunk hash list", i)));
            }
            covered += ch.len;
        }
        if covered != self.size_bytes {
            return Err(bad(format!("chunks cover {} of {} bytes", covered, self.size_bytes)));
        }
        if self.chunks.is_empty() != self.merkle_root.is_none() {
            return Err(bad("merkle root presence does not match chunk count".into()));
        }
        Ok(())
    }
}
