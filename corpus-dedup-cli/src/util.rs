use corpus_dedup::error::{DedupError, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::Path;

/// Input stream for one-shot mode; `-` reads stdin.
pub fn open_input(input: &str) -> Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(input)
        .map_err(|err| DedupError::io(format!("unable to open {}: {}", input, err)))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .map_err(|err| DedupError::io(format!("unable to create {}: {}", path.display(), err)))?;
    Ok(BufWriter::new(file))
}
