//! CN-004: BLAKE3 hashing for logical ids and document fingerprints.

const SHORT_DIGEST_LEN: usize = 8;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// First 8 upper-case hex digits of the BLAKE3 digest of `s`.
pub fn short_digest(s: &str) -> String {
    let hex = blake3::hash(s.as_bytes()).to_hex();
    hex[..SHORT_DIGEST_LEN].to_ascii_uppercase()
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
