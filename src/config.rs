use crate::error::{DedupError, Result};
use crate::lsh::MAX_NUM_PERM;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// One record per line.
    #[default]
    Lines,
    /// Headed CSV with `id` and `text` columns, one record per row.
    Csv,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupConfig {
    /// Jaccard similarity cutoff in (0, 1].
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Signature length.
    #[serde(default = "default_num_perm")]
    pub num_perm: usize,
    /// Character n-gram size.
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,
    /// Records per parallel signature batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Signature workers; 0 lets rayon decide.
    #[serde(default)]
    pub threads: usize,
    /// Require estimated similarity >= threshold on top of a band match.
    #[serde(default)]
    pub verify_candidates: bool,
    /// Honor an existing checkpoint.
    #[serde(default)]
    pub resume: bool,
    /// Chunk file suffix used when enumerating an input directory.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub input_format: InputFormat,
}

fn default_threshold() -> f64 {
    0.8
}
fn default_num_perm() -> usize {
    128
}
fn default_shingle_size() -> usize {
    5
}
fn default_batch_size() -> usize {
    1024
}
fn default_extension() -> String {
    ".dedup".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            num_perm: default_num_perm(),
            shingle_size: default_shingle_size(),
            batch_size: default_batch_size(),
            threads: 0,
            verify_candidates: false,
            resume: false,
            extension: default_extension(),
            input_format: InputFormat::default(),
        }
    }
}

impl DedupConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            DedupError::invalid_config(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config: DedupConfig = toml::from_str(&content).map_err(|err| {
            DedupError::invalid_config(format!("failed to parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(DedupError::invalid_config(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.num_perm == 0 || self.num_perm > MAX_NUM_PERM {
            return Err(DedupError::invalid_config(format!(
                "numPerm must be in 1..={}, got {}",
                MAX_NUM_PERM, self.num_perm
            )));
        }
        if self.shingle_size == 0 {
            return Err(DedupError::invalid_config("shingleSize must be >= 1"));
        }
        if self.batch_size == 0 {
            return Err(DedupError::invalid_config("batchSize must be positive"));
        }
        Ok(())
    }

    /// Bounded worker pool for signature computation.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("minhash-{}", i))
            .build()
            .map_err(DedupError::invalid_config)
    }
}
