//! Shared hashing for the hash-mod strategy family.

use xxhash_rust::xxh3::xxh3_64;

/// Maps an id to a shard instance in `[0, shard_count)`.
pub fn shard_for_id(id: u64, shard_count: u32) -> u32 {
    shard_for_bytes(&id.to_le_bytes(), shard_count)
}

/// Maps arbitrary key bytes to a shard instance in `[0, shard_count)`.
pub fn shard_for_bytes(key: &[u8], shard_count: u32) -> u32 {
    (xxh3_64(key) % u64::from(shard_count)) as u32
}
