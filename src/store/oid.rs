use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);
static PROCESS_PREFIX: OnceLock<u16> = OnceLock::new();

fn process_prefix() -> u16 {
    *PROCESS_PREFIX.get_or_init(|| rand::rng().random())
}

/// Generates a 24-hex-character opaque identifier whose first 4 bytes are
/// the big-endian creation time in seconds, so identifiers sort
/// lexicographically in (approximately) time order. The remaining 8 bytes
/// are a 2-byte process-lifetime random prefix followed by a 6-byte
/// monotone counter, so identifiers minted within the same process and
/// second still compare in insertion order.
pub fn generate() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x0000_ffff_ffff_ffff;
    let prefix = process_prefix();

    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&secs.to_be_bytes());
    bytes[4..6].copy_from_slice(&prefix.to_be_bytes());
    bytes[6..12].copy_from_slice(&counter.to_be_bytes()[2..8]);

    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_24_hex_chars() {
        let oid = generate();
        assert_eq!(oid.len(), 24);
        assert!(oid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sorts_in_insertion_order_within_a_second() {
        let ids: Vec<String> = (0..50).map(|_| generate()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
