pub use blake3::Hash;

/// Digest of a single buffer.
pub fn digest(bytes: &[u8]) -> Hash {
    blake3::hash(bytes)
}

/// Compute a binary Merkle root over BLAKE3 leaf hashes.
/// Duplicates the last node when the layer is odd. Returns `None` for no leaves.
pub fn root(hashes: &[Hash]) -> Option<Hash> {
    if hashes.is_empty() {
        return None;
    }
    let mut layer: Vec<[u8; 32]> = hashes.iter().map(|h| *h.as_bytes()).collect();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let a = pair[0];
            let b = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut cat = [0u8; 64];
            cat[..32].copy_from_slice(&a);
            cat[32..].copy_from_slice(&b);
            next.push(*blake3::hash(&cat).as_bytes());
        }
        layer = next;
    }
    Some(Hash::from(layer[0]))
}

pub fn to_hex(h: &Hash) -> String {
    h.to_hex().to_string()
}

/// Parse a stored 64-char hex digest.
pub fn from_hex(s: &str) -> Option<Hash> {
    Hash::from_hex(s).ok()
}
