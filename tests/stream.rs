use corpus_dedup::checkpoint::CheckpointManager;
use corpus_dedup::config::{DedupConfig, InputFormat};
use corpus_dedup::error::ErrorKind;
use corpus_dedup::minhash::MinHasher;
use corpus_dedup::stream::StreamDedup;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CHUNKS: [&str; 3] = [
    "the cat sat on the mat\n\
     a completely unrelated sentence about astronomy\n\
     the cat sat on the mat\n\
     \n\
     rivers carry sediment from the mountains to the sea\n",
    "rivers carry sediment from the mountains to the sea\n\
     compilers translate source code into machine instructions\n\
     a completely unrelated sentence about astronomy\n\
     bread rises because yeast produces carbon dioxide\n",
    "compilers translate source code into machine instructions\n\
     the violin has four strings tuned in perfect fifths\n\
     bread rises because yeast produces carbon dioxide\n\
     the cat sat on the mat\n\
     glaciers move slowly under their own weight\n",
];

const EXPECTED: &str = "the cat sat on the mat\n\
    a completely unrelated sentence about astronomy\n\
    rivers carry sediment from the mountains to the sea\n\
    compilers translate source code into machine instructions\n\
    bread rises because yeast produces carbon dioxide\n\
    the violin has four strings tuned in perfect fifths\n\
    glaciers move slowly under their own weight\n";

struct Fixture {
    _dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("chunks");
    fs::create_dir(&input).unwrap();
    for (i, chunk) in CHUNKS.iter().enumerate() {
        fs::write(input.join(format!("part-{:03}.dedup", i)), chunk).unwrap();
    }
    fs::write(input.join("README.txt"), "not a chunk\n").unwrap();
    let output = dir.path().join("out").join("dedup.txt");
    Fixture {
        input,
        output,
        _dir: dir,
    }
}

fn config(resume: bool) -> DedupConfig {
    DedupConfig {
        threshold: 0.8,
        resume,
        ..Default::default()
    }
}

fn checkpoint_artifacts(output: &Path) -> Vec<String> {
    let name = output.file_name().unwrap().to_string_lossy().into_owned();
    fs::read_dir(output.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(&format!("{}.ckpt.", name)))
        .collect()
}

fn manager(output: &Path) -> CheckpointManager {
    CheckpointManager::new(output, &MinHasher::new(128, 5)).unwrap()
}

#[test]
fn uninterrupted_run_keeps_first_occurrences_in_order() {
    let fx = fixture();
    let summary = StreamDedup::open(&fx.input, &fx.output, config(false))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
    assert_eq!(summary.total_units, 3);
    assert_eq!(summary.processed_units, 3);
    assert_eq!(summary.resumed_from, None);
    assert_eq!(summary.stats.total, 13);
    assert_eq!(summary.stats.kept, 7);
    assert_eq!(summary.stats.dropped, 6);
    assert_eq!(summary.index_size, 7);
    assert!(checkpoint_artifacts(&fx.output).is_empty());
}

#[test]
fn resume_after_first_chunk_processes_only_the_rest() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    let report = first.next_chunk().unwrap().unwrap();
    assert_eq!(report.unit, 1);
    assert_eq!(report.stats.kept, 3);
    drop(first);
    assert_eq!(checkpoint_artifacts(&fx.output).len(), 2);

    let resumed = StreamDedup::open(&fx.input, &fx.output, config(true)).unwrap();
    assert_eq!(resumed.cursor(), 1);
    assert_eq!(resumed.index().len(), 3);
    let summary = resumed.run().unwrap();
    assert_eq!(summary.resumed_from, Some(1));
    assert_eq!(summary.processed_units, 2);
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
    assert!(checkpoint_artifacts(&fx.output).is_empty());
}

#[test]
fn crash_after_every_chunk_matches_uninterrupted_output() {
    let fx = fixture();
    let mut units = Vec::new();
    loop {
        let mut run = StreamDedup::open(&fx.input, &fx.output, config(true)).unwrap();
        match run.next_chunk().unwrap() {
            Some(report) => units.push(report.unit),
            None => {
                run.run().unwrap();
                break;
            }
        }
    }
    assert_eq!(units, vec![1, 2, 3]);
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
    assert!(checkpoint_artifacts(&fx.output).is_empty());
}

#[test]
fn partial_output_of_an_unfinished_chunk_is_discarded() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);
    // crash while chunk 2 was being written
    let mut out = fs::OpenOptions::new().append(true).open(&fx.output).unwrap();
    out.write_all(b"rivers carry sediment from the mo").unwrap();
    drop(out);

    StreamDedup::open(&fx.input, &fx.output, config(true))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
}

#[test]
fn resume_without_checkpoint_starts_fresh() {
    let fx = fixture();
    fs::create_dir_all(fx.output.parent().unwrap()).unwrap();
    fs::write(&fx.output, "stale output from an older run\n").unwrap();
    let summary = StreamDedup::open(&fx.input, &fx.output, config(true))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.resumed_from, None);
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
}

#[test]
fn without_resume_an_existing_checkpoint_is_discarded() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);

    let restarted = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    assert_eq!(restarted.cursor(), 0);
    assert!(restarted.index().is_empty());
    let summary = restarted.run().unwrap();
    assert_eq!(summary.processed_units, 3);
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
}

#[test]
fn corrupt_checkpoint_aborts_and_leaves_output_alone() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);
    let before = fs::read(&fx.output).unwrap();
    fs::write(manager(&fx.output).meta_path(), b"{\"version\":1,").unwrap();

    let err = StreamDedup::open(&fx.input, &fx.output, config(true))
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::CorruptCheckpoint);
    assert_eq!(fs::read(&fx.output).unwrap(), before);
}

#[test]
fn changed_chunk_set_is_rejected_on_resume() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);
    fs::write(fx.input.join("part-999.dedup"), "late arrival\n").unwrap();

    let err = StreamDedup::open(&fx.input, &fx.output, config(true))
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::CorruptCheckpoint);
}

#[test]
fn changed_threshold_is_rejected_on_resume() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);

    let err = StreamDedup::open(
        &fx.input,
        &fx.output,
        DedupConfig {
            threshold: 0.6,
            ..config(true)
        },
    )
    .err()
    .unwrap();
    assert_eq!(err.kind, ErrorKind::CorruptCheckpoint);
}

#[test]
fn truncated_output_is_rejected_on_resume() {
    let fx = fixture();
    let mut first = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    first.next_chunk().unwrap();
    drop(first);
    fs::write(&fx.output, "the cat").unwrap();

    let err = StreamDedup::open(&fx.input, &fx.output, config(true))
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::CorruptCheckpoint);
}

#[test]
fn undecodable_lines_are_counted_and_skipped() {
    let fx = fixture();
    let mut bytes = b"a line before the bad one\n".to_vec();
    bytes.extend_from_slice(&[0xc3, 0x28, b'\n']);
    bytes.extend_from_slice(b"a line after the bad one\n");
    fs::write(fx.input.join("part-003.dedup"), bytes).unwrap();

    let summary = StreamDedup::open(&fx.input, &fx.output, config(false))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.errors, 1);
    let output = fs::read_to_string(&fx.output).unwrap();
    assert!(output.starts_with(EXPECTED));
    assert!(output.ends_with("a line after the bad one\n"));
}

#[test]
fn csv_chunks_are_supported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("csv");
    fs::create_dir(&input).unwrap();
    fs::write(
        input.join("a.csv"),
        "id,text\n1,the cat sat on the mat\n2,glaciers move slowly under their own weight\n",
    )
    .unwrap();
    fs::write(
        input.join("b.csv"),
        "id,text\n3,the cat sat on the mat\n4,\"bread rises, because of yeast\"\n",
    )
    .unwrap();
    let output = dir.path().join("dedup.txt");
    let config = DedupConfig {
        extension: ".csv".to_string(),
        input_format: InputFormat::Csv,
        ..Default::default()
    };
    let summary = StreamDedup::open(&input, &output, config).unwrap().run().unwrap();
    assert_eq!(summary.stats.kept, 3);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "the cat sat on the mat\n\
         glaciers move slowly under their own weight\n\
         bread rises, because of yeast\n"
    );
}

#[test]
fn empty_input_directory_produces_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dedup.txt");
    let summary = StreamDedup::open(dir.path(), &output, config(false))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.total_units, 0);
    assert_eq!(fs::read_to_string(&output).unwrap(), "");
}

#[test]
fn missing_output_directory_is_created() {
    for resume in [false, true] {
        let fx = fixture();
        let output = fx.input.parent().unwrap().join("fresh").join("nested").join("out.txt");
        let summary = StreamDedup::open(&fx.input, &output, config(resume))
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(summary.resumed_from, None);
        assert_eq!(fs::read_to_string(&output).unwrap(), EXPECTED);
    }
}

#[test]
fn failed_chunk_blocks_the_run_until_reopened_with_resume() {
    let fx = fixture();
    let second = fx.input.join("part-001.dedup");
    let mut run = StreamDedup::open(&fx.input, &fx.output, config(false)).unwrap();
    run.next_chunk().unwrap();
    fs::remove_file(&second).unwrap();
    assert_eq!(run.next_chunk().unwrap_err().kind, ErrorKind::Io);

    // the chunk is back, but this instance stays failed
    fs::write(&second, CHUNKS[1]).unwrap();
    assert_eq!(run.next_chunk().unwrap_err().kind, ErrorKind::Io);
    assert_eq!(run.cursor(), 1);
    assert_eq!(run.run().unwrap_err().kind, ErrorKind::Io);

    let summary = StreamDedup::open(&fx.input, &fx.output, config(true))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.resumed_from, Some(1));
    assert_eq!(fs::read_to_string(&fx.output).unwrap(), EXPECTED);
}

#[cfg(unix)]
#[test]
fn symlinked_chunks_are_processed() {
    let fx = fixture();
    let shards = tempfile::tempdir().unwrap();
    let target = shards.path().join("shard-a.txt");
    fs::write(&target, "text living in a linked shard\n").unwrap();
    std::os::unix::fs::symlink(&target, fx.input.join("part-003.dedup")).unwrap();

    let summary = StreamDedup::open(&fx.input, &fx.output, config(false))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.total_units, 4);
    assert_eq!(
        fs::read_to_string(&fx.output).unwrap(),
        format!("{}text living in a linked shard\n", EXPECTED)
    );
}
