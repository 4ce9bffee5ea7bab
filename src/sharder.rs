//! Sharder implementation.
use std::io::Cursor;

/// Seed shared by every SDK so that bucketing is reproducible across implementations.
pub const HASH_SEED: u32 = 1;

/// Maps a bucketing key to one of `total_shards` slots.
pub trait Sharder {
    /// Slot for `input`, in `[0, total_shards)`.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default sharder: MurmurHash3 (x86, 32 bit, seed 1) scaled to the slot count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Sharder;

impl Sharder for Murmur3Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = murmur3_hash(input.as_ref());
        // Scale rather than take a remainder: `floor(hash / 2^32 * total_shards)`.
        ((hash as u64) * total_shards) >> 32
    }
}

/// MurmurHash3 x86_32 with [`HASH_SEED`].
pub(crate) fn murmur3_hash(input: &[u8]) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(input), HASH_SEED)
        .expect("reading from an in-memory buffer should not fail")
}
