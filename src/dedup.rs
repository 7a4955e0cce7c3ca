use crate::config::DedupConfig;
use crate::dto::{DedupStats, TextRecord};
use crate::error::Result;
use crate::lsh::MinHashLSH;
use crate::minhash::{MinHash, MinHasher};
use crate::source::LineSource;
use rayon::ThreadPool;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

///
/// Drives records through signature computation and the keep/drop decision.
///
/// Signatures for a batch are computed in parallel on a bounded pool; the
/// query/insert decisions then run strictly in input order on the calling
/// thread, so the survivor of any group of near duplicates is always the
/// earliest record.
///
pub struct Deduplicator {
    hasher: MinHasher,
    pool: ThreadPool,
    batch_size: usize,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Deduplicator {
            hasher: MinHasher::new(config.num_perm, config.shingle_size),
            pool: config.thread_pool()?,
            batch_size: config.batch_size,
        })
    }

    pub fn hasher(&self) -> &MinHasher {
        &self.hasher
    }

    /// Fresh index matching this deduplicator's signature length.
    pub fn new_index(&self, config: &DedupConfig) -> Result<MinHashLSH> {
        MinHashLSH::new(config.threshold, self.hasher.num_perm(), config.verify_candidates)
    }

    ///
    /// Deduplicates `records` against `lsh`, emitting every survivor in input order.
    ///
    /// ## Arguments
    ///
    /// * `records` - Record source. Recoverable (decode) errors are counted and skipped,
    /// any other error aborts the run.
    /// * `lsh` - Index holding everything accepted so far; survivors are inserted.
    /// * `emit` - Receives each survivor; a failure aborts the run.
    ///
    pub fn run<I, F>(&self, records: I, lsh: &mut MinHashLSH, mut emit: F) -> Result<DedupStats>
    where
        I: IntoIterator<Item = Result<TextRecord>>,
        F: FnMut(TextRecord) -> Result<()>,
    {
        let mut stats = DedupStats::default();
        let mut batch: Vec<TextRecord> = Vec::with_capacity(self.batch_size);
        for record in records {
            match record {
                Ok(record) => batch.push(record),
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "skipping unreadable record");
                    stats.total += 1;
                    stats.errors += 1;
                }
                Err(err) => return Err(err),
            }
            if batch.len() >= self.batch_size {
                stats += self.decide_batch(&mut batch, lsh, &mut emit)?;
            }
        }
        if !batch.is_empty() {
            stats += self.decide_batch(&mut batch, lsh, &mut emit)?;
        }
        Ok(stats)
    }

    fn decide_batch<F>(
        &self,
        batch: &mut Vec<TextRecord>,
        lsh: &mut MinHashLSH,
        emit: &mut F,
    ) -> Result<DedupStats>
    where
        F: FnMut(TextRecord) -> Result<()>,
    {
        let start = Instant::now();
        let signatures: Vec<MinHash> = {
            let contents: Vec<&str> = batch.iter().map(|r| r.content.as_str()).collect();
            self.pool.install(|| self.hasher.signatures(&contents))
        };
        let mut stats = DedupStats::default();
        for (record, minhash) in batch.drain(..).zip(signatures) {
            stats.total += 1;
            if lsh.query(&minhash) {
                trace!(record = %record.label(), origin = %record.origin.display(), "near duplicate dropped");
                stats.dropped += 1;
                continue;
            }
            lsh.insert(record.id.key(), minhash)?;
            emit(record)?;
            stats.kept += 1;
        }
        debug!(
            records = stats.total,
            kept = stats.kept,
            secs = start.elapsed().as_secs_f64(),
            "batch decided"
        );
        Ok(stats)
    }
}

/// One-shot deduplication of a single line stream. Lines are trimmed and
/// blank lines skipped; survivors are written one per line.
pub fn dedup_lines<R, W>(reader: R, writer: &mut W, origin: &Path, config: &DedupConfig) -> Result<DedupStats>
where
    R: BufRead,
    W: Write,
{
    let start = Instant::now();
    let dedup = Deduplicator::new(config)?;
    let mut lsh = dedup.new_index(config)?;
    let records = LineSource::new(reader, 1, Arc::from(origin)).trimmed();
    let stats = dedup.run(records, &mut lsh, |record| {
        writeln!(writer, "{}", record.content)?;
        Ok(())
    })?;
    writer.flush()?;
    info!(
        total = stats.total,
        kept = stats.kept,
        dropped = stats.dropped,
        errors = stats.errors,
        bands = lsh.num_bands(),
        rows = lsh.band_size(),
        secs = start.elapsed().as_secs_f64(),
        "dedup completed"
    );
    Ok(stats)
}
