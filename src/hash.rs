//! The non-cryptographic hash function is out of scope for this crate's
//! design: any stable, well-distributed `bytes -> u32` function suffices,
//! and none of the containers here depend on its internals beyond that
//! contract. This is a 32-bit FNV-1a, chosen because it is small, has no
//! setup cost, and is trivially reproducible across runs (needed since the
//! flat map and cuckoo map re-derive cell indices from the same hash during
//! resize).

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes an arbitrary byte slice to a 32-bit digest.
#[inline]
pub fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let mut h = FNV_OFFSET_BASIS ^ seed;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Hashes a 64-bit key's little-endian byte representation, as used by the
/// flat map and the cuckoo map.
#[inline]
pub fn hash_u64(key: u64, seed: u32) -> u32 {
    hash_bytes(&key.to_le_bytes(), seed)
}
