//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use fanout_abi::Word;
use fanout_core::{Core, CoreConfig, SubscriptionKey};

/// Schema tag used across the suites.
pub const CHATTER: u64 = 0x93c2_0128_30d6_8d3c;

pub fn new_core() -> Arc<Core> {
    Core::new(CoreConfig::default()).unwrap()
}

pub fn key(topic: &str, msg_type: u64) -> SubscriptionKey {
    SubscriptionKey::new(topic, msg_type)
}

/// Frames `bytes` into `words` as a length-prefixed little-endian packing:
/// word 0 is the byte count, subsequent words carry the payload.
pub fn pack_bytes(words: &mut [Word], bytes: &[u8]) {
    assert!(words.len() > bytes.len() / 8 + 1, "segment too small");

    words[0] = bytes.len() as Word;
    for (i, chunk) in bytes.chunks(8).enumerate() {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        words[i + 1] = Word::from_le_bytes(buf);
    }
}

/// Inverse of [`pack_bytes`].
pub fn unpack_bytes(words: &[Word]) -> Vec<u8> {
    let len = words[0] as usize;
    let mut bytes = Vec::with_capacity(len);

    for word in &words[1..] {
        bytes.extend_from_slice(&word.to_le_bytes());
        if bytes.len() >= len {
            break;
        }
    }

    bytes.truncate(len);
    bytes
}
