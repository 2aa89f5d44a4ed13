//! Canonical content hashing for cache keys
//!
//! Both caches key on a SHA-256 digest of the meaning-bearing fields of a
//! request. Hashing is insensitive to incidental whitespace/casing and to the
//! order callers list fields in, and an absent optional field hashes the same
//! as an empty one, so callers pass `""` for missing optionals rather than
//! omitting the field.

use sha2::{Digest, Sha256};

/// Compute the canonical content hash for a set of named fields.
///
/// Fields are sorted by name, values trimmed and lowercased, and each name
/// and value fed to the hasher length-prefixed, so no value can imitate the
/// serialized form of a neighboring field. Only fields that affect the
/// cached output belong here; bookkeeping values (timestamps, request ids)
/// must never be passed in.
pub fn content_hash(fields: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(&str, String)> = fields
        .iter()
        .map(|(name, value)| (*name, normalize(value)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (name, value) in &pairs {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Content hash of a single source image URL, used as the Asset Store key.
pub fn image_content_hash(url: &str) -> String {
    content_hash(&[("image_url", url)])
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
