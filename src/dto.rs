use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::Arc;

/// Position of a record within a run: 1-based chunk, 0-based raw line/row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub chunk: usize,
    pub line: usize,
}

impl RecordId {
    /// Index key used when the record survives and its signature is inserted.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.chunk, self.line)
    }
}

#[derive(Clone, Debug)]
pub struct TextRecord {
    pub id: RecordId,
    pub content: String,
    pub origin: Arc<Path>,
    /// Identifier carried by the input itself (the CSV `id` column).
    pub source_id: Option<String>,
}

impl TextRecord {
    /// The input's own identifier when it has one, else the run key.
    pub fn label(&self) -> String {
        match &self.source_id {
            Some(id) => id.clone(),
            None => self.id.key(),
        }
    }
}

/// Row shape accepted from CSV chunk files.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CsvRow {
    pub id: String,
    pub text: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub total: u64,
    pub kept: u64,
    pub dropped: u64,
    pub errors: u64,
}

impl AddAssign for DedupStats {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.kept += other.kept;
        self.dropped += other.dropped;
        self.errors += other.errors;
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    pub unit: usize,
    pub total_units: usize,
    pub path: String,
    pub stats: DedupStats,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub output: String,
    pub total_units: usize,
    /// Chunk the run resumed after, if a checkpoint was honored.
    pub resumed_from: Option<usize>,
    pub processed_units: usize,
    pub index_size: usize,
    pub stats: DedupStats,
}
