//! Near-duplicate removal for text corpora with MinHash and LSH.
//!
//! Records are shingled into character n-grams, sketched into fixed-length
//! MinHash signatures and checked against a banded LSH index; a record is
//! kept only when no earlier record is a candidate match. A directory of
//! chunk files can be processed incrementally with crash-safe checkpoints
//! between chunks.
//!
//! ```no_run
//! use corpus_dedup::config::DedupConfig;
//! use corpus_dedup::stream::StreamDedup;
//! use std::path::Path;
//!
//! let config = DedupConfig { resume: true, ..Default::default() };
//! let summary = StreamDedup::open(Path::new("chunks"), Path::new("dedup.txt"), config)?
//!     .run()?;
//! println!("kept {} of {}", summary.stats.kept, summary.stats.total);
//! # Ok::<(), corpus_dedup::error::DedupError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod dto;
pub mod error;
pub mod lsh;
pub mod minhash;
pub mod report;
pub mod source;
pub mod stream;
pub mod util;
