//! SHA-256 hex hashing of client-supplied idempotency keys.

use sha2::{Digest, Sha256};

/// Hashes a raw `Idempotency-Key` header value into the fixed-width hex hash
/// stored (and uniquely indexed) on the lead row. Returns `None` for an
/// empty key, matching "absent" semantics end to end.
pub fn hash_idempotency_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_hashes_to_none() {
        assert_eq!(hash_idempotency_key(""), None);
        assert_eq!(hash_idempotency_key("   "), None);
    }

    #[test]
    fn hash_is_stable_hex_lowercase() {
        let a = hash_idempotency_key("same-key").unwrap();
        let b = hash_idempotency_key("same-key").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn different_keys_hash_differently() {
        let a = hash_idempotency_key("key-a").unwrap();
        let b = hash_idempotency_key("key-b").unwrap();
        assert_ne!(a, b);
    }
}
