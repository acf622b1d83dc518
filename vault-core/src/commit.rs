use crate::merkle::{self, Hash};

/// Merkle root and whole-file digest, hex encoded as stored in a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commitment {
    pub merkle_root: Option<String>,
    pub file_hash: String,
}

/// Combine ordered chunk digests and the whole-file digest. No I/O.
pub fn build(chunk_digests: &[Hash], file_digest: &Hash) -> Commitment {
    Commitment {
        merkle_root: merkle::root(chunk_digests).map(|h| merkle::to_hex(&h)),
        file_hash: merkle::to_hex(file_digest),
    }
}
