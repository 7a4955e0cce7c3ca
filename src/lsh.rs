use crate::error::{DedupError, Result};
use crate::minhash::MinHash;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Version tag of the serialized index snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Largest signature length accepted when the banding is derived from a
/// threshold; the band search grows with `num_perm * ln(num_perm)`.
pub const MAX_NUM_PERM: usize = 1024;

const INTEGRATION_STEPS: usize = 1000;

/// Locality-Sensitive Hashing over MinHash signatures.
///
/// Signatures are split into `num_bands` contiguous bands of `band_size`
/// rows; two signatures are candidates iff at least one band agrees exactly.
/// Keys are unique per index. Not synchronized; see [`SharedLsh`].
#[derive(Clone, Debug)]
pub struct MinHashLSH {
    threshold: f64,
    num_perm: usize,
    num_bands: usize,
    band_size: usize,
    /// Also require estimated similarity >= threshold against a candidate.
    verify: bool,
    /// Full signatures by key, used to rebuild the bands and to verify candidates
    minhash_map: FxHashMap<String, MinHash>,
    /// One table per band, keyed by the exact band values
    hash_tables: Vec<FxHashMap<Vec<u32>, Vec<String>>>,
}

impl MinHashLSH {
    /// Creates an empty index, deriving the banding from `threshold`.
    ///
    /// ## Arguments
    ///
    /// * `threshold` - Jaccard similarity cutoff in (0, 1].
    /// * `num_perm` - Signature length of every inserted or queried MinHash.
    /// * `verify` - Filter band candidates by estimated similarity. Banding is
    /// then tuned for recall since verification removes the false positives.
    pub fn new(threshold: f64, num_perm: usize, verify: bool) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(DedupError::invalid_config(format!(
                "threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if num_perm == 0 || num_perm > MAX_NUM_PERM {
            return Err(DedupError::invalid_config(format!(
                "num_perm must be in 1..={}, got {}",
                MAX_NUM_PERM, num_perm
            )));
        }
        let (fp_weight, fn_weight) = if verify { (0.1, 0.9) } else { (0.5, 0.5) };
        let (num_bands, band_size) = optimal_param(threshold, num_perm, fp_weight, fn_weight);
        Self::with_bands(threshold, num_perm, num_bands, band_size, verify)
    }

    /// Creates an empty index with an explicit band split.
    pub fn with_bands(
        threshold: f64,
        num_perm: usize,
        num_bands: usize,
        band_size: usize,
        verify: bool,
    ) -> Result<Self> {
        if num_bands == 0 || band_size == 0 || num_bands * band_size > num_perm {
            return Err(DedupError::invalid_config(format!(
                "{} bands of {} rows do not fit {} permutations",
                num_bands, band_size, num_perm
            )));
        }
        Ok(MinHashLSH {
            threshold,
            num_perm,
            num_bands,
            band_size,
            verify,
            minhash_map: FxHashMap::default(),
            hash_tables: vec![FxHashMap::default(); num_bands],
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_perm(&self) -> usize {
        self.num_perm
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn band_size(&self) -> usize {
        self.band_size
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn len(&self) -> usize {
        self.minhash_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minhash_map.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.minhash_map.contains_key(key)
    }

    /// Inserts `minhash` under `key`. Blank signatures are stored but never
    /// bucketed, so they cannot match anything.
    pub fn insert(&mut self, key: String, minhash: MinHash) -> Result<()> {
        self.check_len(&minhash)?;
        if self.minhash_map.contains_key(&key) {
            return Err(DedupError::duplicate_key(key));
        }
        if !minhash.is_blank() {
            for (i, table) in self.hash_tables.iter_mut().enumerate() {
                let start = i * self.band_size;
                let end = start + self.band_size;
                table
                    .entry(minhash.hash_values[start..end].to_vec())
                    .or_insert_with(Vec::new)
                    .push(key.clone());
            }
        }
        self.minhash_map.insert(key, minhash);
        Ok(())
    }

    /// True iff some inserted signature is a candidate for `minhash` (and,
    /// when verifying, is estimated at least `threshold` similar).
    pub fn query(&self, minhash: &MinHash) -> bool {
        if minhash.len() != self.num_perm || minhash.is_blank() {
            return false;
        }
        if !self.verify {
            return self
                .hash_tables
                .iter()
                .enumerate()
                .any(|(i, table)| table.contains_key(self.band(minhash, i)));
        }
        self.hash_tables
            .iter()
            .enumerate()
            .filter_map(|(i, table)| table.get(self.band(minhash, i)))
            .flatten()
            .any(|id| self.minhash_map[id].jaccard_similarity(minhash) >= self.threshold)
    }

    /// Query the LSH for (potentially) similar items.
    ///
    /// ## Arguments
    ///
    /// * `minhash` - The MinHash to query for.
    /// * `threshold` - threshold (inclusive) for estimated jaccard similarity to apply to query result (optional).
    ///
    pub fn candidates(&self, minhash: &MinHash, threshold: Option<f64>) -> Vec<&str> {
        if minhash.len() != self.num_perm || minhash.is_blank() {
            return Vec::new();
        }
        let candidates: FxHashSet<&str> = self
            .hash_tables
            .iter()
            .enumerate()
            .filter_map(|(i, table)| table.get(self.band(minhash, i)))
            .flatten()
            .map(String::as_str)
            .collect();
        let mut ids: Vec<&str> = match threshold {
            Some(threshold) => candidates
                .into_iter()
                .filter(|&id| self.minhash_map[id].jaccard_similarity(minhash) >= threshold)
                .collect(),
            None => candidates.into_iter().collect(),
        };
        ids.sort_unstable();
        ids
    }

    /// Encodes the index as a versioned JSON snapshot. Only the signatures are
    /// stored; band tables are recomputed on load.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<SnapshotEntry> = self
            .minhash_map
            .iter()
            .map(|(key, minhash)| SnapshotEntry {
                key: key.clone(),
                hash_values: minhash.hash_values.clone(),
            })
            .collect();
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            threshold: self.threshold,
            num_perm: self.num_perm,
            bands: self.num_bands,
            rows: self.band_size,
            verify: self.verify,
            entries,
        };
        serde_json::to_vec(&snapshot).map_err(DedupError::io)
    }

    /// Inverse of [`MinHashLSH::serialize`]. Any malformed input is a
    /// corrupt checkpoint.
    pub fn deserialize(blob: &[u8]) -> Result<Self> {
        let snapshot: IndexSnapshot = serde_json::from_slice(blob)
            .map_err(|err| DedupError::corrupt_checkpoint(format!("unreadable index: {}", err)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DedupError::corrupt_checkpoint(format!(
                "unsupported index version {}",
                snapshot.version
            )));
        }
        let mut lsh = Self::with_bands(
            snapshot.threshold,
            snapshot.num_perm,
            snapshot.bands,
            snapshot.rows,
            snapshot.verify,
        )
        .map_err(|err| DedupError::corrupt_checkpoint(err.msg))?;
        for SnapshotEntry { key, hash_values } in snapshot.entries {
            lsh.insert(key, MinHash { hash_values })
                .map_err(|err| DedupError::corrupt_checkpoint(err.msg))?;
        }
        Ok(lsh)
    }

    fn band<'m>(&self, minhash: &'m MinHash, i: usize) -> &'m [u32] {
        let start = i * self.band_size;
        &minhash.hash_values[start..start + self.band_size]
    }

    fn check_len(&self, minhash: &MinHash) -> Result<()> {
        if minhash.len() != self.num_perm {
            return Err(DedupError::invalid_config(format!(
                "signature has {} values, index expects {}",
                minhash.len(),
                self.num_perm
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexSnapshot {
    version: u32,
    threshold: f64,
    num_perm: usize,
    bands: usize,
    rows: usize,
    verify: bool,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry {
    key: String,
    hash_values: Vec<u32>,
}

/// Internally-locked index for callers that share one index between
/// several streams.
#[derive(Clone, Debug)]
pub struct SharedLsh {
    inner: Arc<Mutex<MinHashLSH>>,
}

impl SharedLsh {
    pub fn new(lsh: MinHashLSH) -> Self {
        SharedLsh {
            inner: Arc::new(Mutex::new(lsh)),
        }
    }

    /// Atomically queries and, when no match exists, inserts. Returns true
    /// when `minhash` was a duplicate.
    pub fn query_or_insert(&self, key: String, minhash: MinHash) -> Result<bool> {
        let mut lsh = self.lock()?;
        if lsh.query(&minhash) {
            return Ok(true);
        }
        lsh.insert(key, minhash)?;
        Ok(false)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.lock()?.serialize()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MinHashLSH>> {
        self.inner
            .lock()
            .map_err(|_| DedupError::io("index lock poisoned"))
    }
}

/// Probability that two items of similarity `s` share at least one band.
pub fn candidate_probability(s: f64, num_bands: usize, band_size: usize) -> f64 {
    1.0 - (1.0 - s.powi(band_size as i32)).powi(num_bands as i32)
}

/// Picks `(bands, rows)` with `bands * rows <= num_perm` minimizing the
/// weighted area of false positives below and false negatives above
/// `threshold` on the candidate S-curve.
pub fn optimal_param(
    threshold: f64,
    num_perm: usize,
    fp_weight: f64,
    fn_weight: f64,
) -> (usize, usize) {
    let mut best = (f64::INFINITY, 1, 1);
    for b in 1..=num_perm {
        for r in 1..=num_perm / b {
            let fp = integrate(|s| candidate_probability(s, b, r), 0.0, threshold);
            let fn_ = integrate(|s| 1.0 - candidate_probability(s, b, r), threshold, 1.0);
            let error = fp * fp_weight + fn_ * fn_weight;
            if error < best.0 {
                best = (error, b, r);
            }
        }
    }
    (best.1, best.2)
}

fn integrate<F: Fn(f64) -> f64>(f: F, a: f64, b: f64) -> f64 {
    if b <= a {
        return 0.0;
    }
    let step = (b - a) / INTEGRATION_STEPS as f64;
    (0..INTEGRATION_STEPS)
        .map(|i| f(a + (i as f64 + 0.5) * step))
        .sum::<f64>()
        * step
}
