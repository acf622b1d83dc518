use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::error::Result;
use crate::manifest::FileRecord;
use crate::merkle;
use crate::node::NodeSet;
use crate::reconstruct::{missing, open_chunk};

/// Outcome of re-deriving a record's commitment from the bytes on its nodes.
/// A mismatch is a normal result, not an error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub file_id: String,
    pub chunks_ok: u64,
    pub chunks_bad: u64,
    /// Per chunk, in index order: recomputed digest equals the stored one.
    pub chunk_matches: Vec<bool>,
    pub merkle_root_matches: bool,
    pub file_hash_matches: bool,
    pub merkle_root_expected: Option<String>,
    pub merkle_root_actual: Option<String>,
    pub file_hash_expected: String,
    pub file_hash_actual: String,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.chunks_bad == 0 && self.merkle_root_matches && self.file_hash_matches
    }
}

/// Re-read every chunk of `record` in index order and compare against its commitment.
///
/// Stored chunk hashes are only used as expectations. An unreadable chunk fails
/// the whole call since no determination can be made.
pub fn verify(record: &FileRecord, nodes: &NodeSet) -> Result<VerifyReport> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut whole = blake3::Hasher::new();
    let mut hashes = Vec::with_capacity(record.chunks.len());
    let mut chunk_matches = Vec::with_capacity(record.chunks.len());
    let mut chunks_ok = 0u64;
    let mut chunks_bad = 0u64;

    for (i, ch) in record.chunks.iter().enumerate() {
        let mut r = open_chunk(nodes, ch)?;
        let mut h = blake3::Hasher::new();
        loop {
            let n = r.read(&mut buf).map_err(|source| missing(ch, source))?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
            whole.update(&buf[..n]);
        }
        let h = h.finalize();
        let ok = record.chunk_hashes.get(i).map(|e| *e == merkle::to_hex(&h)).unwrap_or(false);
        if ok {
            chunks_ok += 1;
        } else {
            chunks_bad += 1;
        }
        chunk_matches.push(ok);
        hashes.push(h);
    }

    let merkle_root_actual = merkle::root(&hashes).map(|h| merkle::to_hex(&h));
    let file_hash_actual = merkle::to_hex(&whole.finalize());
    let report = VerifyReport {
        file_id: record.file_id.clone(),
        chunks_ok,
        chunks_bad,
        chunk_matches,
        merkle_root_matches: merkle_root_actual == record.merkle_root,
        file_hash_matches: file_hash_actual == record.file_hash,
        merkle_root_expected: record.merkle_root.clone(),
        merkle_root_actual,
        file_hash_expected: record.file_hash.clone(),
        file_hash_actual,
    };
    if report.is_intact() {
        info!("verify {}: {} chunks ok", record.file_id, chunks_ok);
    } else {
        warn!(
            "verify {}: chunks bad={} merkle={} file_hash={}",
            record.file_id,
            chunks_bad,
            if report.merkle_root_matches { "OK" } else { "MISMATCH" },
            if report.file_hash_matches { "OK" } else { "MISMATCH" }
        );
    }
    Ok(report)
}
