use std::hash::Hasher;

use siphasher::sip::SipHasher13;

/// Process-independent 64-bit hash of `key`.
///
/// SipHash-1-3 with fixed zero keys, so every coordinator and worker
/// computes the same value for the same input.
pub fn stable_hash(key: &str) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(key.as_bytes());
    hasher.finish()
}

/// Rendezvous weight of `member_id` for `resource_id`.
///
/// A separator byte that cannot appear in UTF-8 keeps ("ab", "c") and
/// ("a", "bc") from colliding.
pub fn rendezvous_weight(resource_id: &str, member_id: &str) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(resource_id.as_bytes());
    hasher.write_u8(0xff);
    hasher.write(member_id.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic() {
        for key in ["", "collection-1", "ab2b2e8f-3c1c-4a5e-8e3a-6f1f0d9c0b11"] {
            assert_eq!(stable_hash(key), stable_hash(key));
        }
        assert_ne!(stable_hash("a"), stable_hash("b"));
    }

    #[test]
    fn rendezvous_weight_separates_fields() {
        assert_ne!(rendezvous_weight("ab", "c"), rendezvous_weight("a", "bc"));
        assert_eq!(
            rendezvous_weight("r1", "worker-0"),
            rendezvous_weight("r1", "worker-0")
        );
    }
}
