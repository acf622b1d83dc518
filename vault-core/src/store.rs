//! Record stores for committed [`FileRecord`]s.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::manifest::FileRecord;
use crate::node::write_via_temp;
use crate::path_safety::validate_component;

const TMP_SUFFIX: &str = ".json.tmp";

/// Persistence for file records, scoped by owner for every read.
pub trait MetadataStore: Send + Sync {
    /// Commit a new record. Fails if the file id already exists.
    fn create(&self, record: FileRecord) -> Result<()>;

    /// The record for `file_id` if, and only if, `owner_id` owns it.
    fn find_by_id_and_owner(&self, file_id: &str, owner_id: &str) -> Result<Option<FileRecord>>;

    /// Records of one owner, newest upload first.
    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>>;

    fn sum_size_by_owner(&self, owner_id: &str) -> Result<u64> {
        Ok(self.list_by_owner(owner_id)?.iter().map(|r| r.size_bytes).sum())
    }

    /// Every record regardless of owner.
    fn list_all(&self) -> Result<Vec<FileRecord>>;

    /// Whether any owner holds `file_id`.
    fn contains(&self, file_id: &str) -> Result<bool>;

    /// Temp documents left by interrupted commits.
    fn stale_temps(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn remove_temp(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

fn newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        b.uploaded_at.cmp(&a.uploaded_at).then_with(|| a.file_id.cmp(&b.file_id))
    });
}

/// In-memory store for tests and embedding.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, FileRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl MetadataStore for MemoryStore {
    fn create(&self, record: FileRecord) -> Result<()> {
        record.validate()?;
        let mut records = self.records.write();
        if records.contains_key(&record.file_id) {
            return Err(VaultError::DuplicateFileId(record.file_id));
        }
        records.insert(record.file_id.clone(), record);
        Ok(())
    }

    fn find_by_id_and_owner(&self, file_id: &str, owner_id: &str) -> Result<Option<FileRecord>> {
        let records = self.records.read();
        Ok(records.get(file_id).filter(|r| r.owner_id == owner_id).cloned())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let mut out: Vec<FileRecord> =
            self.records.read().values().filter(|r| r.owner_id == owner_id).cloned().collect();
        newest_first(&mut out);
        Ok(out)
    }

    fn list_all(&self) -> Result<Vec<FileRecord>> {
        let mut out: Vec<FileRecord> = self.records.read().values().cloned().collect();
        newest_first(&mut out);
        Ok(out)
    }

    fn contains(&self, file_id: &str) -> Result<bool> {
        Ok(self.records.read().contains_key(file_id))
    }
}

/// One pretty-printed JSON document per record: `<dir>/<file_id>.json`.
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| VaultError::store(format!("create {:?}", dir), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_id))
    }

    fn read_record(path: &Path) -> Result<FileRecord> {
        let f = File::open(path).map_err(|e| VaultError::store(format!("open {:?}", path), e))?;
        Ok(serde_json::from_reader(io::BufReader::new(f))?)
    }

    fn read_all(&self) -> Result<Vec<FileRecord>> {
        let mut out = Vec::new();
        let rd = fs::read_dir(&self.dir)
            .map_err(|e| VaultError::store(format!("scan {:?}", self.dir), e))?;
        for ent in rd {
            let p = ent.map_err(|e| VaultError::store("scan entry", e))?.path();
            let is_record = p.extension().map(|s| s == "json").unwrap_or(false)
                && !p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if is_record {
                out.push(Self::read_record(&p)?);
            }
        }
        Ok(out)
    }
}

impl MetadataStore for JsonDirStore {
    fn create(&self, record: FileRecord) -> Result<()> {
        validate_component("file id", &record.file_id)?;
        record.validate()?;
        let path = self.path_of(&record.file_id);
        let tmp = self.dir.join(format!(".{}{}", record.file_id, TMP_SUFFIX));
        let doc = serde_json::to_string_pretty(&record)?;
        // Linking fails if the id is taken, so the complete document appears atomically
        // and a concurrent create of the same id loses.
        let committed =
            write_via_temp(&tmp, |f| f.write_all(doc.as_bytes()), |t| fs::hard_link(t, &path));
        match committed {
            Ok(()) => {
                let _ = fs::remove_file(&tmp);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(VaultError::DuplicateFileId(record.file_id))
            }
            Err(e) => Err(VaultError::store(format!("commit {:?}", path), e)),
        }
    }

    fn find_by_id_and_owner(&self, file_id: &str, owner_id: &str) -> Result<Option<FileRecord>> {
        if validate_component("file id", file_id).is_err() {
            return Ok(None);
        }
        let path = self.path_of(file_id);
        if !path.exists() {
            return Ok(None);
        }
        let record = Self::read_record(&path)?;
        Ok(Some(record).filter(|r| r.owner_id == owner_id))
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let mut out: Vec<FileRecord> =
            self.read_all()?.into_iter().filter(|r| r.owner_id == owner_id).collect();
        newest_first(&mut out);
        Ok(out)
    }

    fn list_all(&self) -> Result<Vec<FileRecord>> {
        let mut out = self.read_all()?;
        newest_first(&mut out);
        Ok(out)
    }

    fn contains(&self, file_id: &str) -> Result<bool> {
        Ok(validate_component("file id", file_id).is_ok() && self.path_of(file_id).exists())
    }

    fn stale_temps(&self) -> Result<Vec<String>> {
        let rd = fs::read_dir(&self.dir)
            .map_err(|e| VaultError::store(format!("scan {:?}", self.dir), e))?;
        let mut out = Vec::new();
        for ent in rd {
            let ent = ent.map_err(|e| VaultError::store("scan entry", e))?;
            if let Some(name) = ent.file_name().to_str() {
                if is_temp_name(name) {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn remove_temp(&self, name: &str) -> Result<()> {
        if !is_temp_name(name) || name.contains(['/', '\\']) {
            return Err(VaultError::InvalidName {
                kind: "temp document",
                value: name.to_string(),
                reason: "not a temp document",
            });
        }
        let p = self.dir.join(name);
        fs::remove_file(&p).map_err(|e| VaultError::store(format!("remove {:?}", p), e))
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Chunk;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, owner: &str, size: u64, minute: i64) -> FileRecord {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FileRecord {
            file_id: id.into(),
            owner_id: owner.into(),
            file_name: format!("{id}.bin"),
            file_type: "application/octet-stream".into(),
            size_bytes: size,
            uploaded_at: base + Duration::minutes(minute),
            chunk_size: 1024,
            chunks: vec![Chunk {
                index: 0,
                node: "node1".into(),
                name: format!("{id}_0.chunk"),
                len: size,
                digest: "d".into(),
            }],
            chunk_hashes: vec!["d".into()],
            file_hash: "h".into(),
            merkle_root: Some("d".into()),
        }
    }

    fn exercise(store: &dyn MetadataStore) {
        store.create(record("a", "alice", 10, 1)).unwrap();
        store.create(record("b", "alice", 20, 3)).unwrap();
        store.create(record("c", "bob", 5, 2)).unwrap();

        assert!(matches!(
            store.create(record("a", "bob", 1, 9)),
            Err(VaultError::DuplicateFileId(_))
        ));

        assert!(store.find_by_id_and_owner("a", "alice").unwrap().is_some());
        assert!(store.find_by_id_and_owner("a", "bob").unwrap().is_none());
        assert!(store.find_by_id_and_owner("zzz", "alice").unwrap().is_none());

        let ids: Vec<String> =
            store.list_by_owner("alice").unwrap().into_iter().map(|r| r.file_id).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(store.sum_size_by_owner("alice").unwrap(), 30);
        assert_eq!(store.sum_size_by_owner("nobody").unwrap(), 0);
        assert_eq!(store.list_all().unwrap().len(), 3);
        assert!(store.contains("c").unwrap());
        assert!(!store.contains("d").unwrap());
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn json_dir_store_contract() {
        let td = tempfile::tempdir().unwrap();
        let store = JsonDirStore::open(td.path().join("meta")).unwrap();
        exercise(&store);
        // Survives reopening.
        let again = JsonDirStore::open(td.path().join("meta")).unwrap();
        assert_eq!(again.list_by_owner("bob").unwrap().len(), 1);
    }

    #[test]
    fn json_dir_store_reports_stale_temps() {
        let td = tempfile::tempdir().unwrap();
        let store = JsonDirStore::open(td.path()).unwrap();
        store.create(record("a", "alice", 10, 1)).unwrap();
        assert!(store.stale_temps().unwrap().is_empty());

        fs::write(td.path().join(".b.json.tmp"), b"{\"half").unwrap();
        assert_eq!(store.stale_temps().unwrap(), [".b.json.tmp"]);
        assert_eq!(store.list_all().unwrap().len(), 1);
        assert!(store.remove_temp("a.json").is_err());
        store.remove_temp(".b.json.tmp").unwrap();
        assert!(store.stale_temps().unwrap().is_empty());
    }

    #[test]
    fn rejects_inconsistent_record() {
        let mut r = record("x", "alice", 10, 0);
        r.chunk_hashes.clear();
        assert!(matches!(MemoryStore::new().create(r), Err(VaultError::InvalidRecord { .. })));
    }
}
