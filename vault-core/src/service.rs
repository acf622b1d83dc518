//! `Vault`: upload, download, verify and housekeeping over one node set and
//! one metadata store.

use chrono::Utc;
use fs2::FileExt;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use crate::chunker::{ByteSource, Chunker, ChunkerConfig};
use crate::commit;
use crate::config::{VaultConfig, META_DIR};
use crate::error::{Result, VaultError};
use crate::manifest::{DownloadInfo, FileRecord, FileSummary};
use crate::node::NodeSet;
use crate::path_safety::validate_component;
use crate::reconstruct;
use crate::store::{JsonDirStore, MetadataStore};
use crate::usage::{QuotaPolicy, StorageUsage};
use crate::verify::{self, VerifyReport};

const OCTET_STREAM: &str = "application/octet-stream";

/// What the ingestion side knows about an incoming file.
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    /// Caller-chosen id; a UUID v4 is generated when absent.
    pub file_id: Option<String>,
    pub file_name: String,
    /// Declared MIME type; guessed from `file_name` when absent.
    pub file_type: Option<String>,
}

impl UploadRequest {
    pub fn named(file_name: impl Into<String>) -> Self {
        Self { file_name: file_name.into(), ..Default::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.file_id = Some(id.into());
        self
    }

    pub fn with_type(mut self, mime: impl Into<String>) -> Self {
        self.file_type = Some(mime.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: u64,
    pub referenced: u64,
    /// `node/key` of every unreferenced chunk found.
    pub orphans: Vec<String>,
    pub removed: u64,
}

/// Uploads hold `gate` (and the lock file, when set) shared and sweep holds
/// them exclusively, so sweep never sees chunks of an uncommitted upload.
pub struct Vault<S: MetadataStore> {
    nodes: NodeSet,
    store: S,
    chunker: ChunkerConfig,
    quota: QuotaPolicy,
    gate: RwLock<()>,
    lock_path: Option<PathBuf>,
}

impl Vault<JsonDirStore> {
    /// Local-disk vault: `DirNode`s and a `JsonDirStore` under `cfg.root`,
    /// coordinated with other processes through `<root>/.lock`.
    pub fn open(cfg: &VaultConfig) -> Result<Self> {
        cfg.validate()?;
        let nodes = NodeSet::local(&cfg.root, &cfg.nodes)?;
        let store = JsonDirStore::open(cfg.meta_dir())?;
        Ok(Vault::new(nodes, store, cfg.chunker(), cfg.quota())?.with_lock_file(cfg.lock_path()))
    }
}

impl<S: MetadataStore> Vault<S> {
    pub fn new(
        nodes: NodeSet,
        store: S,
        chunker: ChunkerConfig,
        quota: QuotaPolicy,
    ) -> Result<Self> {
        chunker.validate()?;
        Ok(Self { nodes, store, chunker, quota, gate: RwLock::new(()), lock_path: None })
    }

    /// Also take an advisory lock on `path` so vaults in other processes
    /// sharing the same nodes are excluded too.
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// Dropping the returned file releases the lock.
    fn lock_file(&self, exclusive: bool) -> Result<Option<File>> {
        let Some(path) = &self.lock_path else {
            return Ok(None);
        };
        let lock_err = |source| VaultError::Lock { path: path.clone(), source };
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;
        if exclusive {
            FileExt::lock_exclusive(&f).map_err(lock_err)?;
        } else {
            FileExt::lock_shared(&f).map_err(lock_err)?;
        }
        debug!("locked {:?} ({})", path, if exclusive { "exclusive" } else { "shared" });
        Ok(Some(f))
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Chunk `source`, commit its record and return the public summary.
    /// Nothing is committed unless every chunk was persisted.
    pub fn upload<B: ByteSource + ?Sized>(
        &self,
        owner_id: &str,
        req: UploadRequest,
        source: &mut B,
        size: u64,
    ) -> Result<FileSummary> {
        let _gate = self.gate.read();
        let _lock = self.lock_file(false)?;
        let file_id = match req.file_id {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        validate_component("file id", &file_id)?;
        // Chunk keys derive from the id, so a reused id would overwrite committed chunks.
        if self.store.contains(&file_id)? {
            return Err(VaultError::DuplicateFileId(file_id));
        }
        if self.quota.enforce {
            let used = self.store.sum_size_by_owner(owner_id)?;
            self.quota.check(used, size)?;
        }
        let file_type = req
            .file_type
            .filter(|t| !t.is_empty())
            .or_else(|| mime_guess::from_path(&req.file_name).first_raw().map(str::to_string))
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        let chunker = Chunker::new(&self.nodes, self.chunker)?;
        let split = chunker.split(&file_id, source, size)?;
        let commitment = commit::build(&split.digests, &split.file_digest);
        let record = FileRecord {
            file_id: file_id.clone(),
            owner_id: owner_id.to_string(),
            file_name: req.file_name,
            file_type,
            size_bytes: split.size_bytes,
            uploaded_at: Utc::now(),
            chunk_size: chunker.chunk_size() as u64,
            chunk_hashes: split.chunks.iter().map(|c| c.digest.clone()).collect(),
            chunks: split.chunks,
            file_hash: commitment.file_hash,
            merkle_root: commitment.merkle_root,
        };
        let summary = record.summary();
        if let Err(e) = self.store.create(record.clone()) {
            // Lost a race for the id: the chunk keys now belong to the winner.
            if !matches!(e, VaultError::DuplicateFileId(_)) {
                chunker.discard(&record.chunks);
            }
            return Err(e);
        }
        info!(
            "uploaded {} ({} bytes, {} chunks) for {}",
            summary.file_id, summary.size_bytes, summary.total_chunks, owner_id
        );
        Ok(summary)
    }

    /// Upload a local file; the file name defaults to the path's last component.
    pub fn upload_path(
        &self,
        owner_id: &str,
        path: &Path,
        mut req: UploadRequest,
    ) -> Result<FileSummary> {
        let f = File::open(path)
            .map_err(|source| VaultError::SourceRead { offset: 0, source })?;
        let size =
            f.metadata().map_err(|source| VaultError::SourceRead { offset: 0, source })?.len();
        if req.file_name.is_empty() {
            req.file_name =
                path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        }
        let mut src = BufReader::new(f);
        self.upload(owner_id, req, &mut src, size)
    }

    fn record(&self, owner_id: &str, file_id: &str) -> Result<FileRecord> {
        self.store
            .find_by_id_and_owner(file_id, owner_id)?
            .ok_or_else(|| VaultError::NotFound(file_id.to_string()))
    }

    /// Look up a file for download. Headers can be taken from
    /// [`Download::info`] before any body byte is produced.
    pub fn open_download(&self, owner_id: &str, file_id: &str) -> Result<Download<'_>> {
        let record = self.record(owner_id, file_id)?;
        Ok(Download { record, nodes: &self.nodes })
    }

    pub fn verify(&self, owner_id: &str, file_id: &str) -> Result<VerifyReport> {
        let record = self.record(owner_id, file_id)?;
        verify::verify(&record, &self.nodes)
    }

    pub fn list(&self, owner_id: &str) -> Result<Vec<FileSummary>> {
        Ok(self.store.list_by_owner(owner_id)?.iter().map(FileRecord::summary).collect())
    }

    /// The `n` most recent uploads of an owner.
    pub fn recent(&self, owner_id: &str, n: usize) -> Result<Vec<FileSummary>> {
        let mut all = self.list(owner_id)?;
        all.truncate(n);
        Ok(all)
    }

    pub fn usage(&self, owner_id: &str) -> Result<StorageUsage> {
        let used = self.store.sum_size_by_owner(owner_id)?;
        Ok(StorageUsage::new(used, self.quota.limit_bytes))
    }

    /// Find chunks on any node that no committed record references, plus temp
    /// files of interrupted writes, and, unless `dry_run`, remove them.
    ///
    /// Waits for in-flight uploads and blocks new ones while it runs.
    pub fn sweep(&self, dry_run: bool) -> Result<SweepReport> {
        let _gate = self.gate.write();
        let _lock = self.lock_file(true)?;

        let mut live: HashSet<(String, String)> = HashSet::new();
        for r in self.store.list_all()? {
            for c in r.chunks {
                live.insert((c.node, c.name));
            }
        }
        let mut report = SweepReport { referenced: live.len() as u64, ..Default::default() };
        for node in self.nodes.iter() {
            let mut dead = Vec::new();
            for key in node.keys()? {
                report.scanned += 1;
                if !live.contains(&(node.id().to_string(), key.clone())) {
                    dead.push(key);
                }
            }
            dead.extend(node.stale_temps()?);
            for key in dead {
                report.orphans.push(format!("{}/{}", node.id(), key));
                if dry_run {
                    continue;
                }
                match node.remove(&key) {
                    Ok(()) => report.removed += 1,
                    Err(e) => warn!("sweep: could not remove {}/{}: {}", node.id(), key, e),
                }
            }
        }
        for name in self.store.stale_temps()? {
            report.orphans.push(format!("{}/{}", META_DIR, name));
            if dry_run {
                continue;
            }
            match self.store.remove_temp(&name) {
                Ok(()) => report.removed += 1,
                Err(e) => warn!("sweep: could not remove {}/{}: {}", META_DIR, name, e),
            }
        }
        info!(
            "sweep: scanned={} orphans={} removed={}",
            report.scanned,
            report.orphans.len(),
            report.removed
        );
        Ok(report)
    }
}

/// An owner-checked file ready to stream.
pub struct Download<'v> {
    record: FileRecord,
    nodes: &'v NodeSet,
}

impl std::fmt::Debug for Download<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl Download<'_> {
    pub fn info(&self) -> DownloadInfo {
        self.record.download_info()
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Reconstruct the file into `out`. Returns the number of bytes written.
    pub fn stream_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64> {
        reconstruct::stream(&self.record, self.nodes, out)
    }
}
