//! Path-to-stream assignment.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Maps a path to a stream index in `[0, buckets)`.
///
/// Must be pure and deterministic: the same path always lands on the same
/// stream for the lifetime of the process.
pub trait PathHasher<P>: Send + Sync {
    fn hash(&self, path: &P, buckets: usize) -> usize;
}

/// Default hasher: a 64-bit avalanche mixer over the standard hasher,
/// reduced to `[0, buckets)` with the high-multiply trick.
///
/// The mixer keeps the distribution near-uniform even when paths share a
/// low-order prefix (sequential table ids, spans of one keyspace).
#[derive(Clone, Copy, Debug, Default)]
pub struct MixPathHasher;

impl<P: Hash> PathHasher<P> for MixPathHasher {
    fn hash(&self, path: &P, buckets: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let mixed = mix64(hasher.finish());
        ((mixed as u128 * buckets as u128) >> 64) as usize
    }
}

/// splitmix64 finalizer.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let hasher = MixPathHasher;
        for path in 0u64..100 {
            assert_eq!(
                PathHasher::hash(&hasher, &path, 8),
                PathHasher::hash(&hasher, &path, 8)
            );
        }
    }

    #[test]
    fn hash_stays_in_range() {
        let hasher = MixPathHasher;
        for buckets in 1usize..17 {
            for path in 0u64..1000 {
                assert!(PathHasher::hash(&hasher, &path, buckets) < buckets);
            }
        }
    }

    #[test]
    fn sequential_paths_spread_under_shared_prefix() {
        let hasher = MixPathHasher;
        let buckets = 8usize;
        let mut counts = vec![0usize; buckets];
        // Table ids allocated sequentially share almost all their bits.
        for path in 1_000_000u64..1_001_000 {
            counts[PathHasher::hash(&hasher, &path, buckets)] += 1;
        }
        let expected = 1000 / buckets;
        for (bucket, &count) in counts.iter().enumerate() {
            assert!(
                count > expected / 2 && count < expected * 2,
                "bucket {bucket} got {count} of ~{expected}"
            );
        }
    }
}
