use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

pub const DEFAULT_QUOTA_BYTES: u64 = 5 * GB;

/// Per-owner storage limit. Enforcement is opt-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub limit_bytes: u64,
    pub enforce: bool,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self { limit_bytes: DEFAULT_QUOTA_BYTES, enforce: false }
    }
}

impl QuotaPolicy {
    pub fn check(&self, used: u64, incoming: u64) -> Result<()> {
        if self.enforce && used.saturating_add(incoming) > self.limit_bytes {
            return Err(VaultError::QuotaExceeded { used, incoming, limit: self.limit_bytes });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub used_label: String,
    pub limit_label: String,
    pub percent: u32,
}

impl StorageUsage {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        let used_label = if used_bytes < GB {
            format!("{} MB", two_places(used_bytes as f64 / MB as f64))
        } else {
            format!("{} GB", two_places(used_bytes as f64 / GB as f64))
        };
        let limit_label = format!("{} GB", two_places(limit_bytes as f64 / GB as f64));
        let percent = if limit_bytes == 0 {
            100
        } else {
            ((used_bytes as f64 / limit_bytes as f64) * 100.0).round().min(100.0) as u32
        };
        Self { used_bytes, limit_bytes, used_label, limit_label, percent }
    }
}

/// Two decimals, with a trailing ".00" dropped.
fn two_places(v: f64) -> String {
    let s = format!("{:.2}", v);
    match s.strip_suffix(".00") {
        Some(whole) => whole.to_string(),
        None => s,
    }
}
