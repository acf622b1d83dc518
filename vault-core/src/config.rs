use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::chunker::{ChunkerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_WRITE_WINDOW};
use crate::error::{Result, VaultError};
use crate::path_safety::validate_component;
use crate::usage::{QuotaPolicy, DEFAULT_QUOTA_BYTES};

pub const CONFIG_FILE: &str = "vault.json";
pub const META_DIR: &str = "meta";
/// Shared by uploads, held exclusively by sweep.
pub const LOCK_FILE: &str = ".lock";

fn default_root() -> PathBuf {
    PathBuf::from(".vault")
}

fn default_nodes() -> Vec<String> {
    vec!["node1".into(), "node2".into(), "node3".into()]
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_write_window() -> usize {
    DEFAULT_WRITE_WINDOW
}

fn default_quota() -> u64 {
    DEFAULT_QUOTA_BYTES
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VaultConfig {
    /// Data directory: node directories and `meta/` live under it.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_write_window")]
    pub write_window: usize,
    #[serde(default = "default_quota")]
    pub quota_bytes: u64,
    #[serde(default)]
    pub enforce_quota: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            nodes: default_nodes(),
            chunk_size: default_chunk_size(),
            write_window: default_write_window(),
            quota_bytes: default_quota(),
            enforce_quota: false,
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path)
            .map_err(|e| VaultError::Config(format!("open {}: {}", path.display(), e)))?;
        let cfg: VaultConfig = serde_json::from_reader(f)
            .map_err(|e| VaultError::Config(format!("parse {}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunker().validate()?;
        if self.nodes.is_empty() {
            return Err(VaultError::Config("at least one node is required".into()));
        }
        for (i, n) in self.nodes.iter().enumerate() {
            validate_component("node id", n)?;
            if n == META_DIR {
                return Err(VaultError::Config(format!("node id {:?} is reserved", n)));
            }
            if self.nodes[..i].contains(n) {
                return Err(VaultError::Config(format!("duplicate node id {:?}", n)));
            }
        }
        Ok(())
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig { chunk_size: self.chunk_size, write_window: self.write_window }
    }

    pub fn quota(&self) -> QuotaPolicy {
        QuotaPolicy { limit_bytes: self.quota_bytes, enforce: self.enforce_quota }
    }
}
