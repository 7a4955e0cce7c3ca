//! Crash-safe persistence of a streaming run's progress.
//!
//! A checkpoint is two files next to the output:
//!
//! - `<output>.ckpt.json`: metadata (cursor, unit count, committed output
//!   length, hashing scheme, name and SHA-256 of the index blob)
//! - `<output>.ckpt.<unit>.lsh`: the serialized index as of that unit
//!
//! The metadata file is the commit point. A save writes the new blob under
//! a fresh name first and only then atomically replaces the metadata, so a
//! crash at any step leaves the previous metadata pointing at its own,
//! still present, blob. Blobs not referenced by the metadata are leftovers
//! of an interrupted save and are removed on the next save or clear.

use crate::error::{DedupError, Result};
use crate::lsh::MinHashLSH;
use crate::minhash::MinHasher;
use crate::util::{parent_dir, remove_if_exists, sha256_hex, sync_dir, write_atomic};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Where a run stands after its last committed unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub last_processed_unit: usize,
    pub total_units: usize,
    /// Output length once that unit was flushed and synced.
    pub output_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMeta {
    pub version: u32,
    pub last_processed_unit: usize,
    pub total_units: usize,
    pub output_bytes: u64,
    pub shingle_size: usize,
    pub scheme_fingerprint: String,
    pub index_file: String,
    pub index_sha256: String,
}

impl CheckpointMeta {
    pub fn progress(&self) -> Progress {
        Progress {
            last_processed_unit: self.last_processed_unit,
            total_units: self.total_units,
            output_bytes: self.output_bytes,
        }
    }
}

#[derive(Debug)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub lsh: MinHashLSH,
}

pub struct CheckpointManager {
    dir: PathBuf,
    /// File name of the output; every artifact name starts with it.
    base: String,
    shingle_size: usize,
    fingerprint: String,
}

impl CheckpointManager {
    pub fn new(output: &Path, hasher: &MinHasher) -> Result<Self> {
        let base = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DedupError::invalid_config(format!("output path {} has no file name", output.display()))
            })?;
        Ok(CheckpointManager {
            dir: parent_dir(output).to_path_buf(),
            base,
            shingle_size: hasher.shingle_size(),
            fingerprint: format!("{:016x}", hasher.fingerprint()),
        })
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(format!("{}.ckpt.json", self.base))
    }

    pub fn index_path(&self, unit: usize) -> PathBuf {
        self.dir.join(self.index_file_name(unit))
    }

    pub fn exists(&self) -> bool {
        self.meta_path().is_file()
    }

    /// Persists `lsh` as the state after `progress.last_processed_unit`.
    /// The output must already be flushed and synced up to `output_bytes`.
    pub fn save(&self, progress: Progress, lsh: &MinHashLSH) -> Result<()> {
        let blob = lsh.serialize()?;
        let index_file = self.index_file_name(progress.last_processed_unit);
        write_atomic(&self.dir.join(&index_file), &blob)?;
        let meta = CheckpointMeta {
            version: CHECKPOINT_VERSION,
            last_processed_unit: progress.last_processed_unit,
            total_units: progress.total_units,
            output_bytes: progress.output_bytes,
            shingle_size: self.shingle_size,
            scheme_fingerprint: self.fingerprint.clone(),
            index_sha256: sha256_hex(&blob),
            index_file,
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(DedupError::io)?;
        write_atomic(&self.meta_path(), &json)?;
        self.remove_index_files(Some(&meta.index_file))?;
        debug!(
            unit = progress.last_processed_unit,
            entries = lsh.len(),
            bytes = blob.len(),
            "checkpoint committed"
        );
        Ok(())
    }

    /// Loads the committed checkpoint, if any, for a run over `total_units`
    /// units. Anything unreadable or inconsistent is `CorruptCheckpoint`.
    pub fn load(&self, total_units: usize) -> Result<Option<Checkpoint>> {
        let meta_path = self.meta_path();
        let bytes = match fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(DedupError::io(err)),
        };
        let meta: CheckpointMeta = serde_json::from_slice(&bytes).map_err(|err| {
            DedupError::corrupt_checkpoint(format!("{}: {}", meta_path.display(), err))
        })?;
        self.validate(&meta, total_units)?;
        let index_path = self.dir.join(&meta.index_file);
        let blob = fs::read(&index_path).map_err(|err| {
            DedupError::corrupt_checkpoint(format!("{}: {}", index_path.display(), err))
        })?;
        if sha256_hex(&blob) != meta.index_sha256 {
            return Err(DedupError::corrupt_checkpoint(format!(
                "{} does not match its recorded digest",
                index_path.display()
            )));
        }
        let lsh = MinHashLSH::deserialize(&blob)?;
        Ok(Some(Checkpoint { meta, lsh }))
    }

    /// Removes the metadata (which retires the checkpoint) and then every blob.
    pub fn clear(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Ok(());
        }
        remove_if_exists(&self.meta_path())?;
        self.remove_index_files(None)?;
        sync_dir(&self.dir)
    }

    fn validate(&self, meta: &CheckpointMeta, total_units: usize) -> Result<()> {
        if meta.version != CHECKPOINT_VERSION {
            return Err(DedupError::corrupt_checkpoint(format!(
                "unsupported checkpoint version {}",
                meta.version
            )));
        }
        if meta.last_processed_unit > meta.total_units {
            return Err(DedupError::corrupt_checkpoint(format!(
                "cursor {} exceeds {} units",
                meta.last_processed_unit, meta.total_units
            )));
        }
        if meta.total_units != total_units {
            return Err(DedupError::corrupt_checkpoint(format!(
                "checkpoint covers {} units but input has {}",
                meta.total_units, total_units
            )));
        }
        if meta.shingle_size != self.shingle_size || meta.scheme_fingerprint != self.fingerprint {
            return Err(DedupError::corrupt_checkpoint(
                "checkpoint was written with a different hashing scheme",
            ));
        }
        if !self.is_index_file(&meta.index_file) {
            return Err(DedupError::corrupt_checkpoint(format!(
                "unexpected index file name '{}'",
                meta.index_file
            )));
        }
        Ok(())
    }

    fn index_file_name(&self, unit: usize) -> String {
        format!("{}.ckpt.{}.lsh", self.base, unit)
    }

    fn is_index_file(&self, name: &str) -> bool {
        name.strip_prefix(&format!("{}.ckpt.", self.base))
            .and_then(|rest| rest.strip_suffix(".lsh"))
            .map_or(false, |unit| !unit.is_empty() && unit.bytes().all(|b| b.is_ascii_digit()))
    }

    fn remove_index_files(&self, keep: Option<&str>) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(DedupError::io(err)),
        };
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if self.is_index_file(&name)
                && Some(name.as_str()) != keep
                && remove_if_exists(&self.dir.join(&name))?
            {
                debug!(file = %name, "removed stale index snapshot");
            }
        }
        Ok(())
    }
}
