//! Key-to-slot mapping.
//!
//! Redis Cluster hashes keys with CRC16/XMODEM modulo 16384. When a key
//! contains a non-empty hash tag (`{...}`), only the tag bytes are hashed, so
//! related keys can be pinned to one slot.

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in a Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

// CRC16/XMODEM: poly 0x1021, init 0x0000, no reflection, no xor-out.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a key, honouring hash tags.
///
/// # Example
///
/// ```
/// use shardis::slot_for;
///
/// assert_eq!(slot_for(b"foo"), 12182);
/// assert_eq!(slot_for(b"{user1000}.following"), slot_for(b"{user1000}.followers"));
/// ```
pub fn slot_for(key: &[u8]) -> u16 {
    CRC16.checksum(extract_hash_tag(key)) % SLOT_COUNT
}

/// Returns the hash tag of a key, or the whole key when no valid tag exists.
///
/// The tag is the content between the first `{` and the next `}`; an empty
/// tag (`{}`) does not count.
pub(crate) fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_reference_vector() {
        // XMODEM check value from the CRC catalogue; also the vector the
        // Redis Cluster spec documents.
        assert_eq!(CRC16.checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn known_slots() {
        // Values verifiable with CLUSTER KEYSLOT on any Redis server.
        assert_eq!(slot_for(b"foo"), 12182);
        assert_eq!(slot_for(b""), 0);
    }

    #[test]
    fn slot_is_in_range() {
        for i in 0..1000 {
            let key = format!("key{i}");
            assert!(slot_for(key.as_bytes()) < SLOT_COUNT);
        }
    }

    #[test]
    fn hash_tag_pins_related_keys() {
        assert_eq!(
            slot_for(b"{user1000}.following"),
            slot_for(b"{user1000}.followers")
        );
        assert_eq!(slot_for(b"{user1000}.following"), slot_for(b"user1000"));
    }

    #[test]
    fn tag_extraction() {
        assert_eq!(extract_hash_tag(b"foo{bar}baz"), b"bar");
        assert_eq!(extract_hash_tag(b"{user1000}.x"), b"user1000");
        assert_eq!(extract_hash_tag(b"foo{bar}{baz}"), b"bar");
    }

    #[test]
    fn tag_extraction_degenerate_cases() {
        // Empty tags and unmatched braces fall back to the whole key.
        assert_eq!(extract_hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"foo}bar"), b"foo}bar");
        assert_eq!(extract_hash_tag(b"{}"), b"{}");
        assert_eq!(extract_hash_tag(b"plain"), b"plain");
    }

    #[test]
    fn keys_spread_across_slots() {
        let slots: std::collections::HashSet<u16> =
            (0..100).map(|i| slot_for(format!("key{i}").as_bytes())).collect();
        assert!(slots.len() >= 50);
    }
}
