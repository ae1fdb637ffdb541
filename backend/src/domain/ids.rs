//! Identifier and hashing primitives.
//!
//! Event rows use time-sortable UUIDv7 identifiers so index order follows
//! insertion order; everything client-facing (tracking ids, job ids, message
//! tokens) uses opaque alphanumeric identifiers instead.

use rand::{distr::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of tracking and job identifiers.
pub const OPAQUE_ID_LEN: usize = 24;

/// 1×1 transparent GIF served by the open-tracking pixel (42 bytes).
pub const TRANSPARENT_GIF: [u8; 42] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // GIF89a
    0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, // 1×1, global colour table
    0x00, 0x00, 0x00, 0xff, 0xff, 0xff, // black, white
    0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // transparency extension
    0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x01, 0x44, 0x00, // image data
    0x3b, // trailer
];

/// Time-sortable identifier for event rows.
pub fn event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Random opaque identifier of the given length.
pub fn opaque_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random opaque identifier for tracking rows and queue jobs.
pub fn tracking_id() -> String {
    opaque_id(OPAQUE_ID_LEN)
}

/// Lowercase hex SHA-256 of a raw API key.
pub fn api_key_hash(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn event_ids_sort_by_creation() {
        let first = event_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = event_id();
        assert!(first < second, "v7 ids must sort by time: {first} {second}");
    }

    #[rstest]
    #[case(24)]
    #[case(8)]
    fn opaque_ids_are_alphanumeric(#[case] len: usize) {
        let id = opaque_id(len);
        assert_eq!(id.len(), len);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn opaque_ids_do_not_collide_trivially() {
        assert_ne!(tracking_id(), tracking_id());
    }

    #[test]
    fn key_hash_is_stable_sha256_hex() {
        // printf 'test-key' | sha256sum
        assert_eq!(
            api_key_hash("test-key"),
            "62af8704764faf8ea82fc61ce9c4c3908b6cb97d463a634e9e587d7c885db0ef"
        );
        assert_eq!(api_key_hash("test-key").len(), 64);
    }

    #[test]
    fn pixel_is_a_gif() {
        assert_eq!(&TRANSPARENT_GIF[..6], b"GIF89a");
        assert_eq!(TRANSPARENT_GIF.len(), 42);
        assert_eq!(*TRANSPARENT_GIF.last().expect("non-empty"), 0x3b);
    }
}
