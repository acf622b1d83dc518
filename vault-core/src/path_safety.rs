use crate::error::{Result, VaultError};

/// Ensure `value` can be used as a single path component under a node or
/// metadata directory: non-empty, no separators, no `.`/`..`, no NUL and no
/// leading dot (which would hide it from sweeps and collide with temp files).
pub fn validate_component(kind: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        Some("empty")
    } else if value == "." || value == ".." {
        Some("parent traversal not allowed")
    } else if value.starts_with('.') {
        Some("leading dot not allowed")
    } else if value.contains('/') || value.contains('\\') {
        Some("path separators not allowed")
    } else if value.contains('\0') {
        Some("NUL not allowed")
    } else if value.len() > 200 {
        Some("too long")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(VaultError::InvalidName { kind, value: value.to_string(), reason }),
        None => Ok(()),
    }
}
