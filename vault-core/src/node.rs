//! Storage nodes: a capability to write, read and remove keyed chunk blobs.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::path_safety::validate_component;

const CHUNK_EXT: &str = "chunk";
const TMP_EXT: &str = "tmp";

/// Write through `tmp`, then hand it to `commit` (rename or link).
/// `tmp` is removed when any step fails, so no partial file outlives the call.
pub(crate) fn write_via_temp(
    tmp: &Path,
    fill: impl FnOnce(&mut File) -> io::Result<()>,
    commit: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let res = File::create(tmp)
        .and_then(|mut f| {
            fill(&mut f)?;
            f.sync_data()
        })
        .and_then(|()| commit(tmp));
    if res.is_err() {
        let _ = fs::remove_file(tmp);
    }
    res
}

/// Storage key of chunk `index` of `file_id`; unique per (file id, index).
pub fn chunk_name(file_id: &str, index: u64) -> String {
    format!("{}_{}.{}", file_id, index, CHUNK_EXT)
}

/// A logical storage node.
pub trait NodeStore: Send + Sync {
    fn id(&self) -> &str;

    /// Persist `bytes` under `key`, replacing any previous blob.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Open the blob under `key` for streaming reads.
    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>>;

    fn remove(&self, key: &str) -> io::Result<()>;

    /// All chunk keys currently held by this node.
    fn keys(&self) -> io::Result<Vec<String>>;

    /// Temp blobs left by interrupted writes; removable with [`NodeStore::remove`].
    fn stale_temps(&self) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// A node backed by one local directory.
pub struct DirNode {
    id: String,
    dir: PathBuf,
}

impl DirNode {
    pub fn open(id: &str, dir: impl Into<PathBuf>) -> Result<Self> {
        validate_component("node id", id)?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { id: id.to_string(), dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn list(&self, wanted: impl Fn(&str) -> bool) -> io::Result<Vec<String>> {
        let mut out = Vec::new();
        for ent in fs::read_dir(&self.dir)? {
            let ent = ent?;
            if !ent.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                if wanted(name) {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl NodeStore for DirNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        // Readers never see a short chunk: the blob appears by rename.
        let tmp = self.dir.join(format!(".{}.{}", key, TMP_EXT));
        write_via_temp(&tmp, |f| f.write_all(bytes), |t| fs::rename(t, self.path_of(key)))
    }

    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.path_of(key))?))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.path_of(key))
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let ext = format!(".{}", CHUNK_EXT);
        self.list(|n| !n.starts_with('.') && n.ends_with(&ext))
    }

    fn stale_temps(&self) -> io::Result<Vec<String>> {
        let ext = format!(".{}", TMP_EXT);
        self.list(|n| n.starts_with('.') && n.ends_with(&ext))
    }
}

/// In-process node, for tests and embedding.
#[derive(Default)]
pub struct MemNode {
    id: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemNode {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), blobs: RwLock::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl NodeStore for MemNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.blobs.read().get(key) {
            Some(b) => Ok(Box::new(Cursor::new(b.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no blob {}", key))),
        }
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match self.blobs.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no blob {}", key))),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let mut out: Vec<String> = self.blobs.read().keys().cloned().collect();
        out.sort();
        Ok(out)
    }
}

/// Fixed, ordered set of nodes. Chunk `i` goes to `nodes[i % len]`.
#[derive(Clone)]
pub struct NodeSet {
    nodes: Vec<Arc<dyn NodeStore>>,
}

impl NodeSet {
    pub fn new(nodes: Vec<Arc<dyn NodeStore>>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(VaultError::Config("node set is empty".into()));
        }
        for (i, n) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|m| m.id() == n.id()) {
                return Err(VaultError::Config(format!("duplicate node id {}", n.id())));
            }
        }
        Ok(Self { nodes })
    }

    /// One `DirNode` per id, each in `<root>/<id>`.
    pub fn local(root: &Path, ids: &[String]) -> Result<Self> {
        let mut nodes: Vec<Arc<dyn NodeStore>> = Vec::with_capacity(ids.len());
        for id in ids {
            nodes.push(Arc::new(DirNode::open(id, root.join(id))?));
        }
        Self::new(nodes)
    }

    pub fn in_memory(ids: &[&str]) -> Result<Self> {
        Self::new(ids.iter().map(|id| Arc::new(MemNode::new(id)) as Arc<dyn NodeStore>).collect())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn assign(&self, index: u64) -> &Arc<dyn NodeStore> {
        &self.nodes[(index % self.nodes.len() as u64) as usize]
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn NodeStore>> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NodeStore>> {
        self.nodes.iter()
    }
}
