use rand::prelude::*;
use rayon::prelude::*;
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Seed for the permutation table. Never re-randomized: signatures from
/// different runs must stay comparable against a persisted index.
pub const PERMUTATION_SEED: u64 = 0x6d69_6e68_6173_6821;

const FINGERPRINT_PROBE: &str = "minhash scheme probe";

/// Fixed-length MinHash sketch of a record's shingle set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinHash {
    pub hash_values: Vec<u32>,
}

impl MinHash {
    /// Sentinel for content with no shingles.
    pub fn blank(num_perm: usize) -> Self {
        MinHash {
            hash_values: vec![u32::MAX; num_perm],
        }
    }

    pub fn len(&self) -> usize {
        self.hash_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash_values.is_empty()
    }

    /// True when the signature came from an empty shingle set.
    pub fn is_blank(&self) -> bool {
        self.hash_values.iter().all(|&v| v == u32::MAX)
    }

    /// Fraction of positions where both signatures agree.
    pub fn jaccard_similarity(&self, other: &MinHash) -> f64 {
        if self.hash_values.is_empty() || self.len() != other.len() {
            return 0.0;
        }
        let equal_count = self
            .hash_values
            .iter()
            .zip(&other.hash_values)
            .filter(|&(&a, &b)| a == b)
            .count();
        equal_count as f64 / self.len() as f64
    }
}

/// Shingle/MinHash generator. Immutable after construction, so one instance
/// is shared read-only by every signature worker.
#[derive(Clone, Debug)]
pub struct MinHasher {
    permutations: Vec<(u64, u64)>,
    shingle_size: usize,
}

impl MinHasher {
    pub fn new(num_perm: usize, shingle_size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PERMUTATION_SEED);
        // odd multipliers keep each permutation a bijection on u64
        let permutations = (0..num_perm)
            .map(|_| (rng.gen::<u64>() | 1, rng.gen::<u64>()))
            .collect();
        MinHasher {
            permutations,
            shingle_size,
        }
    }

    pub fn num_perm(&self) -> usize {
        self.permutations.len()
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Identifies the hashing scheme (seed table, shingle size and shingle
    /// hash function). Signatures are only comparable under equal fingerprints.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_usize(self.shingle_size);
        for &(a, b) in &self.permutations {
            hasher.write_u64(a);
            hasher.write_u64(b);
        }
        hasher.write_u64(calculate_hash(FINGERPRINT_PROBE.as_bytes()));
        hasher.finish()
    }

    /// Signature over the character `shingle_size`-grams of `content`.
    pub fn signature(&self, content: &str) -> MinHash {
        self.signature_from_hashes(self.shingle_hashes(content))
    }

    /// Signature over pre-hashed set members.
    pub fn signature_from_hashes<I>(&self, items: I) -> MinHash
    where
        I: IntoIterator<Item = u64>,
    {
        let mut hash_values = vec![u32::MAX; self.num_perm()];
        for item_hash in items {
            for (i, &(a, b)) in self.permutations.iter().enumerate() {
                let hash = permute_hash(item_hash, a, b);
                hash_values[i] = hash_values[i].min(hash);
            }
        }
        MinHash { hash_values }
    }

    /// Signatures for a batch, computed on the current rayon pool.
    pub fn signatures<S>(&self, texts: &[S]) -> Vec<MinHash>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| self.signature(text.as_ref()))
            .collect()
    }

    /// Hashes of the distinct shingles; empty when the content is shorter
    /// than one shingle.
    pub fn shingle_hashes(&self, content: &str) -> FxHashSet<u64> {
        let bounds: Vec<usize> = content
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(content.len()))
            .collect();
        let char_count = bounds.len() - 1;
        if char_count < self.shingle_size {
            return FxHashSet::default();
        }
        let bytes = content.as_bytes();
        (0..=char_count - self.shingle_size)
            .map(|i| calculate_hash(&bytes[bounds[i]..bounds[i + self.shingle_size]]))
            .collect()
    }
}

#[inline]
fn calculate_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

#[inline]
fn permute_hash(hash: u64, a: u64, b: u64) -> u32 {
    ((a.wrapping_mul(hash).wrapping_add(b)) >> 32) as u32
}
