use log::debug;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::manifest::{Chunk, FileRecord};
use crate::node::{NodeSet, NodeStore};

const COPY_BUF: usize = 64 * 1024;

/// Resolve the node a stored chunk lives on.
pub(crate) fn node_for<'n>(nodes: &'n NodeSet, ch: &Chunk) -> Result<&'n Arc<dyn NodeStore>> {
    nodes
        .get(&ch.node)
        .ok_or_else(|| VaultError::UnknownNode { index: ch.index, node: ch.node.clone() })
}

pub(crate) fn open_chunk(nodes: &NodeSet, ch: &Chunk) -> Result<Box<dyn Read + Send>> {
    node_for(nodes, ch)?.open(&ch.name).map_err(|source| missing(ch, source))
}

pub(crate) fn missing(ch: &Chunk, source: std::io::Error) -> VaultError {
    VaultError::ChunkMissing {
        index: ch.index,
        node: ch.node.clone(),
        name: ch.name.clone(),
        source,
    }
}

/// Stream the chunks of `record` to `out` in stored order.
///
/// Bytes already written to `out` are not retracted when a later chunk fails;
/// the caller sees a truncated stream and the error.
pub fn stream<W: Write + ?Sized>(record: &FileRecord, nodes: &NodeSet, out: &mut W) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUF];
    let mut total = 0u64;
    for ch in &record.chunks {
        let mut r = open_chunk(nodes, ch)?;
        let mut n_chunk = 0u64;
        loop {
            let n = r.read(&mut buf).map_err(|source| missing(ch, source))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            n_chunk += n as u64;
        }
        debug!(
            "streamed chunk {} of {} from {} ({} bytes)",
            ch.index, record.file_id, ch.node, n_chunk
        );
        total += n_chunk;
    }
    out.flush()?;
    Ok(total)
}
