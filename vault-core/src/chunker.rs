use log::{debug, warn};
use rayon::prelude::*;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Result, VaultError};
use crate::manifest::Chunk;
use crate::merkle::{self, Hash};
use crate::node::{chunk_name, NodeSet};

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;
pub const DEFAULT_WRITE_WINDOW: usize = 4;

/// A byte source readable at absolute offsets.
pub trait ByteSource {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: Read + Seek> ByteSource for T {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    /// Chunks persisted concurrently; bounds memory at `write_window * chunk_size`.
    pub write_window: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, write_window: DEFAULT_WRITE_WINDOW }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(VaultError::Config("chunk_size must be > 0".into()));
        }
        if self.write_window == 0 {
            return Err(VaultError::Config("write_window must be > 0".into()));
        }
        Ok(())
    }
}

/// Result of splitting one source.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub chunks: Vec<Chunk>,
    pub digests: Vec<Hash>,
    pub file_digest: Hash,
    pub size_bytes: u64,
}

pub fn total_chunks(total_size: u64, chunk_size: usize) -> u64 {
    total_size.div_ceil(chunk_size as u64)
}

pub struct Chunker<'a> {
    nodes: &'a NodeSet,
    cfg: ChunkerConfig,
}

struct Pending {
    index: u64,
    buf: Vec<u8>,
    digest: Hash,
}

impl<'a> Chunker<'a> {
    pub fn new(nodes: &'a NodeSet, cfg: ChunkerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { nodes, cfg })
    }

    pub fn chunk_size(&self) -> usize {
        self.cfg.chunk_size
    }

    /// Split `source` into chunks, hash each one and persist it on its node.
    ///
    /// On failure every chunk already written by this call is removed (best
    /// effort) and the error is returned; no partial output escapes.
    pub fn split<S: ByteSource + ?Sized>(
        &self,
        source_id: &str,
        source: &mut S,
        total_size: u64,
    ) -> Result<SplitOutput> {
        let mut written: Vec<(u64, String)> = Vec::new();
        match self.split_inner(source_id, source, total_size, &mut written) {
            Ok(out) => Ok(out),
            Err(e) => {
                self.rollback(&written);
                Err(e)
            }
        }
    }

    fn split_inner<S: ByteSource + ?Sized>(
        &self,
        source_id: &str,
        source: &mut S,
        total_size: u64,
        written: &mut Vec<(u64, String)>,
    ) -> Result<SplitOutput> {
        let cs = self.cfg.chunk_size as u64;
        let n = total_chunks(total_size, self.cfg.chunk_size);
        // The declared size is untrusted until the reads succeed.
        let reserve = n.min(1024) as usize;
        let mut chunks = Vec::with_capacity(reserve);
        let mut digests = Vec::with_capacity(reserve);
        let mut whole = blake3::Hasher::new();
        let mut read_total = 0u64;

        let mut next = 0u64;
        while next < n {
            let end = (next + self.cfg.write_window as u64).min(n);
            let mut batch: Vec<Pending> = Vec::with_capacity((end - next) as usize);
            for index in next..end {
                let offset = index * cs;
                let len = (total_size - offset).min(cs) as usize;
                let mut buf = vec![0u8; len];
                source
                    .read_exact_at(offset, &mut buf)
                    .map_err(|source| VaultError::SourceRead { offset, source })?;
                // Hash before anything is persisted.
                let digest = merkle::digest(&buf);
                whole.update(&buf);
                read_total += len as u64;
                batch.push(Pending { index, buf, digest });
            }

            let results: Vec<(u64, String, io::Result<()>)> = batch
                .par_iter()
                .map(|p| {
                    let node = self.nodes.assign(p.index);
                    let name = chunk_name(source_id, p.index);
                    let res = node.write(&name, &p.buf);
                    (p.index, name, res)
                })
                .collect();

            let mut failure = None;
            for (index, name, res) in results {
                match res {
                    Ok(()) => written.push((index, name)),
                    Err(source) if failure.is_none() => {
                        let node = self.nodes.assign(index).id().to_string();
                        failure = Some(VaultError::StorageWrite { node, name, source });
                    }
                    Err(_) => {}
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }

            for p in batch {
                let node = self.nodes.assign(p.index).id().to_string();
                debug!("chunk {} of {} -> {} ({} bytes)", p.index, source_id, node, p.buf.len());
                chunks.push(Chunk {
                    index: p.index,
                    node,
                    name: chunk_name(source_id, p.index),
                    len: p.buf.len() as u64,
                    digest: merkle::to_hex(&p.digest),
                });
                digests.push(p.digest);
            }
            next = end;
        }

        Ok(SplitOutput { chunks, digests, file_digest: whole.finalize(), size_bytes: read_total })
    }

    /// Remove chunks written by a failed or abandoned attempt.
    pub fn rollback(&self, written: &[(u64, String)]) {
        for (index, name) in written {
            let node = self.nodes.assign(*index);
            if let Err(e) = node.remove(name) {
                warn!("rollback: could not remove {}/{}: {}", node.id(), name, e);
            }
        }
    }

    /// Remove the chunks named by a finished split.
    pub fn discard(&self, chunks: &[Chunk]) {
        let written: Vec<(u64, String)> =
            chunks.iter().map(|c| (c.index, c.name.clone())).collect();
        self.rollback(&written);
    }
}
