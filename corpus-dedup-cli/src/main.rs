//! # corpus-dedup
//!
//! Near-duplicate removal for line-oriented text corpora.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus-dedup dedup -i <file or -> -o <file>` | One pass over a single input |
//! | `corpus-dedup stream -i <dir> -o <file> [--resume]` | Chunked run with checkpoints |
//!
//! Logs go to stderr (`RUST_LOG` overrides the `info` default); a JSON report
//! `{statusCode, body}` goes to stdout and the process exits with `statusCode`.

mod util;

use clap::{Args, Parser, Subcommand, ValueEnum};
use corpus_dedup::config::{DedupConfig, InputFormat};
use corpus_dedup::dedup::dedup_lines;
use corpus_dedup::error::{DedupError, Result};
use corpus_dedup::report::{make_report, ReportPayload, STATUS_OK};
use corpus_dedup::stream::StreamDedup;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// MinHash/LSH near-duplicate removal for pretraining corpora.
#[derive(Parser)]
#[command(name = "corpus-dedup", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deduplicate a single file (or stdin) in one pass
    Dedup(DedupArgs),
    /// Deduplicate a directory of chunk files, checkpointing after each chunk
    Stream(StreamArgs),
}

#[derive(Args)]
struct DedupArgs {
    /// Input file path or '-' for stdin
    #[arg(short, long)]
    input: String,
    /// Path to write deduplicated output
    #[arg(short, long)]
    output: PathBuf,
    #[command(flatten)]
    tunables: Tunables,
}

#[derive(Args)]
struct StreamArgs {
    /// Directory with chunk files
    #[arg(short, long)]
    input: PathBuf,
    /// Path to write deduplicated output
    #[arg(short, long)]
    output: PathBuf,
    /// Chunk file suffix
    #[arg(long)]
    ext: Option<String>,
    /// Chunk file format
    #[arg(long, value_enum)]
    format: Option<Format>,
    /// Resume from the last checkpoint
    #[arg(long)]
    resume: bool,
    #[command(flatten)]
    tunables: Tunables,
}

#[derive(Args)]
struct Tunables {
    /// TOML file with defaults; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// MinHash similarity threshold (0.0-1.0]
    #[arg(short, long)]
    threshold: Option<f64>,
    /// Number of MinHash permutations
    #[arg(short = 'n', long = "num-perm")]
    num_perm: Option<usize>,
    /// Shingle size (in characters)
    #[arg(short = 'k', long = "shingle-size")]
    shingle_size: Option<usize>,
    /// Number of signature worker threads
    #[arg(short = 'p', long = "processes")]
    threads: Option<usize>,
    /// Records per parallel signature batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Confirm band candidates by estimated similarity
    #[arg(long)]
    verify: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Lines,
    Csv,
}

impl Tunables {
    fn resolve(&self) -> Result<DedupConfig> {
        let mut config = match &self.config {
            Some(path) => DedupConfig::from_toml_file(path)?,
            None => DedupConfig::default(),
        };
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(num_perm) = self.num_perm {
            config.num_perm = num_perm;
        }
        if let Some(shingle_size) = self.shingle_size {
            config.shingle_size = shingle_size;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        config.verify_candidates |= self.verify;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Dedup(args) => dedup(args),
        Command::Stream(args) => stream(args),
    };
    let payload = make_report(result);
    let mut stdout = std::io::stdout().lock();
    match write_report(&mut stdout, &payload) {
        Ok(()) => ExitCode::from(payload.status_code),
        Err(err) => {
            eprintln!("unable to write report: {}", err);
            if payload.status_code == STATUS_OK {
                ExitCode::from(err.kind.code())
            } else {
                ExitCode::from(payload.status_code)
            }
        }
    }
}

fn write_report<W: Write>(out: &mut W, payload: &ReportPayload) -> Result<()> {
    let json = serde_json::to_string_pretty(payload).map_err(DedupError::io)?;
    writeln!(out, "{}", json)?;
    out.flush()?;
    Ok(())
}

fn dedup(args: DedupArgs) -> Result<Value> {
    let config = args.tunables.resolve()?;
    config.validate()?;
    let start = Instant::now();
    let reader = util::open_input(&args.input)?;
    let mut writer = util::create_output(&args.output)?;
    let stats = dedup_lines(reader, &mut writer, Path::new(&args.input), &config)?;
    writer.get_ref().sync_all()?;
    info!(
        "{} -> {} lines in {:.4} secs",
        stats.total,
        stats.kept,
        start.elapsed().as_secs_f64()
    );
    Ok(json!({
        "input": args.input,
        "output": args.output.display().to_string(),
        "stats": stats,
    }))
}

fn stream(args: StreamArgs) -> Result<Value> {
    let mut config = args.tunables.resolve()?;
    if let Some(ext) = args.ext {
        config.extension = ext;
    }
    if let Some(format) = args.format {
        config.input_format = match format {
            Format::Lines => InputFormat::Lines,
            Format::Csv => InputFormat::Csv,
        };
    }
    config.resume |= args.resume;
    let summary = StreamDedup::open(&args.input, &args.output, config)?.run()?;
    serde_json::to_value(summary).map_err(DedupError::io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn short_flags_override_defaults() {
        let cli = parse(&[
            "corpus-dedup", "dedup", "-i", "-", "-o", "out.txt", "-t", "0.5", "-n", "64", "-k",
            "3", "-p", "2",
        ]);
        let Command::Dedup(args) = cli.command else {
            panic!("expected dedup command");
        };
        let config = args.tunables.resolve().unwrap();
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.num_perm, 64);
        assert_eq!(config.shingle_size, 3);
        assert_eq!(config.threads, 2);
        assert!(!config.verify_candidates);
    }

    #[test]
    fn stream_flags_reach_the_config() {
        let cli = parse(&[
            "corpus-dedup", "stream", "-i", "chunks", "-o", "out.txt", "--resume", "--verify",
            "--format", "csv", "--ext", ".csv",
        ]);
        let Command::Stream(args) = cli.command else {
            panic!("expected stream command");
        };
        assert!(args.resume);
        assert!(matches!(args.format, Some(Format::Csv)));
        assert_eq!(args.ext.as_deref(), Some(".csv"));
        assert!(args.tunables.resolve().unwrap().verify_candidates);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn report_is_written_as_json() {
        let mut out = Vec::new();
        write_report(&mut out, &make_report(Ok(json!({ "kept": 3 })))).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["statusCode"], 0);
        assert_eq!(value["body"]["kept"], 3);
    }

    #[test]
    fn failed_report_write_is_an_io_error() {
        let err = write_report(&mut BrokenPipe, &make_report(Ok(json!({})))).unwrap_err();
        assert_eq!(err.kind, corpus_dedup::error::ErrorKind::Io);
    }

    #[test]
    fn dedup_subcommand_requires_paths() {
        assert!(Cli::try_parse_from(["corpus-dedup", "dedup", "-i", "in.txt"]).is_err());
    }
}
