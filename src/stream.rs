use crate::checkpoint::{Checkpoint, CheckpointManager, Progress};
use crate::config::DedupConfig;
use crate::dedup::Deduplicator;
use crate::dto::{ChunkReport, DedupStats, RunSummary};
use crate::error::{DedupError, Result};
use crate::lsh::MinHashLSH;
use crate::source::{list_chunks, open_chunk};
use crate::util::parent_dir;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

///
/// Incremental deduplication of a directory of chunk files into one output
/// file, checkpointing after every chunk.
///
/// Per chunk the output is flushed and fsynced before the checkpoint is
/// written, and the checkpoint records the committed output length. On
/// resume the output is cut back to that length, so output written for a
/// chunk that never committed is discarded and that chunk is redone.
///
/// A failed chunk leaves the index and output ahead of the checkpoint, so
/// after any error the instance refuses further work; reopen with `resume`
/// to continue from the last commit.
///
pub struct StreamDedup {
    config: DedupConfig,
    dedup: Deduplicator,
    checkpoints: CheckpointManager,
    chunks: Vec<PathBuf>,
    output_path: PathBuf,
    output: BufWriter<File>,
    output_bytes: u64,
    lsh: MinHashLSH,
    /// Number of chunks committed so far, counting earlier sessions.
    cursor: usize,
    resumed_from: Option<usize>,
    processed: usize,
    stats: DedupStats,
    failure: Option<DedupError>,
}

impl StreamDedup {
    pub fn open(input_dir: &Path, output: &Path, config: DedupConfig) -> Result<Self> {
        let dedup = Deduplicator::new(&config)?;
        fs::create_dir_all(parent_dir(output)).map_err(|err| {
            DedupError::io(format!("unable to create {}: {}", parent_dir(output).display(), err))
        })?;
        let chunks = list_chunks(input_dir, &config.extension)?;
        let checkpoints = CheckpointManager::new(output, dedup.hasher())?;
        let checkpoint = if config.resume {
            checkpoints.load(chunks.len())?
        } else {
            None
        };

        let (lsh, cursor, output_bytes) = match checkpoint {
            Some(Checkpoint { meta, lsh }) => {
                check_index_params(&lsh, &config)?;
                info!(
                    unit = meta.last_processed_unit + 1,
                    total = chunks.len(),
                    entries = lsh.len(),
                    "resuming from checkpoint"
                );
                (lsh, meta.last_processed_unit, Some(meta.output_bytes))
            }
            None => {
                if checkpoints.exists() {
                    warn!(path = %checkpoints.meta_path().display(), "discarding previous checkpoint");
                }
                checkpoints.clear()?;
                (dedup.new_index(&config)?, 0, None)
            }
        };
        let (output_file, output_bytes) = open_output(output, output_bytes)?;

        Ok(StreamDedup {
            config,
            dedup,
            checkpoints,
            chunks,
            output_path: output.to_path_buf(),
            output: BufWriter::new(output_file),
            output_bytes,
            lsh,
            resumed_from: if cursor > 0 { Some(cursor) } else { None },
            cursor,
            processed: 0,
            stats: DedupStats::default(),
            failure: None,
        })
    }

    pub fn total_units(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks committed so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn index(&self) -> &MinHashLSH {
        &self.lsh
    }

    /// Processes and commits the next chunk; `None` once every chunk is done.
    /// Once a call has failed, every later call returns that error.
    pub fn next_chunk(&mut self) -> Result<Option<ChunkReport>> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let result = self.process_next();
        if let Err(err) = &result {
            warn!(unit = self.cursor + 1, error = %err, "chunk failed, reopen with resume to continue");
            self.failure = Some(err.clone());
        }
        result
    }

    fn process_next(&mut self) -> Result<Option<ChunkReport>> {
        let Some(path) = self.chunks.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let unit = self.cursor + 1;
        let total_units = self.chunks.len();
        let start = Instant::now();
        info!(unit, total = total_units, path = %path.display(), "processing chunk");

        let records = open_chunk(&path, unit, self.config.input_format)?;
        let output = &mut self.output;
        let output_bytes = &mut self.output_bytes;
        let stats = self.dedup.run(records, &mut self.lsh, |record| {
            output.write_all(record.content.as_bytes())?;
            output.write_all(b"\n")?;
            *output_bytes += record.content.len() as u64 + 1;
            Ok(())
        })?;

        // output must be durable before the checkpoint claims it
        self.output.flush()?;
        self.output.get_ref().sync_all()?;
        self.checkpoints.save(
            Progress {
                last_processed_unit: unit,
                total_units,
                output_bytes: self.output_bytes,
            },
            &self.lsh,
        )?;
        self.cursor = unit;
        self.processed += 1;
        self.stats += stats;

        info!(
            unit,
            total = total_units,
            kept = stats.kept,
            dropped = stats.dropped,
            errors = stats.errors,
            secs = start.elapsed().as_secs_f64(),
            "finished chunk, checkpoint updated"
        );
        Ok(Some(ChunkReport {
            unit,
            total_units,
            path: path.display().to_string(),
            stats,
        }))
    }

    /// Processes every remaining chunk, then removes the checkpoint.
    pub fn run(mut self) -> Result<RunSummary> {
        let start = Instant::now();
        while self.next_chunk()?.is_some() {}
        self.output.flush()?;
        self.checkpoints.clear()?;
        info!(
            output = %self.output_path.display(),
            kept = self.stats.kept,
            dropped = self.stats.dropped,
            secs = start.elapsed().as_secs_f64(),
            "all chunks done"
        );
        Ok(RunSummary {
            output: self.output_path.display().to_string(),
            total_units: self.chunks.len(),
            resumed_from: self.resumed_from,
            processed_units: self.processed,
            index_size: self.lsh.len(),
            stats: self.stats,
        })
    }
}

fn check_index_params(lsh: &MinHashLSH, config: &DedupConfig) -> Result<()> {
    if lsh.num_perm() != config.num_perm
        || lsh.threshold() != config.threshold
        || lsh.verify() != config.verify_candidates
    {
        return Err(DedupError::corrupt_checkpoint(format!(
            "checkpoint index uses threshold {} / {} permutations / verify {}, run is configured for {} / {} / {}",
            lsh.threshold(),
            lsh.num_perm(),
            lsh.verify(),
            config.threshold,
            config.num_perm,
            config.verify_candidates
        )));
    }
    Ok(())
}

/// Opens the output for appending. With a committed length, anything past it
/// is output of an unfinished chunk and is cut off; without one the output
/// starts empty.
fn open_output(path: &Path, committed: Option<u64>) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| DedupError::io(format!("unable to open {}: {}", path.display(), err)))?;
    let committed = committed.unwrap_or(0);
    let len = file.metadata()?.len();
    if len < committed {
        return Err(DedupError::corrupt_checkpoint(format!(
            "{} holds {} bytes but {} were committed",
            path.display(),
            len,
            committed
        )));
    }
    if len > committed {
        if committed > 0 {
            warn!(
                path = %path.display(),
                discarded = len - committed,
                "truncating uncommitted output"
            );
        }
        file.set_len(committed)?;
        file.sync_all()?;
    }
    Ok((file, committed))
}
