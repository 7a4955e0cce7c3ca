use crate::config::InputFormat;
use crate::dto::{CsvRow, RecordId, TextRecord};
use crate::error::{DedupError, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type RecordSource = Box<dyn Iterator<Item = Result<TextRecord>>>;

/// Chunk files in `dir` whose name ends with `extension`, sorted by name.
/// Symlinks are followed. The listing is taken once and treated as fixed for
/// the whole run.
pub fn list_chunks(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|err| DedupError::io(format!("unable to list {}: {}", dir.display(), err)))?;
    let mut chunks = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_name().to_string_lossy().ends_with(extension) {
            continue;
        }
        let metadata = fs::metadata(&path)
            .map_err(|err| DedupError::io(format!("unable to stat {}: {}", path.display(), err)))?;
        if metadata.is_file() {
            chunks.push(path);
        }
    }
    chunks.sort();
    Ok(chunks)
}

/// Opens one chunk file as a record source.
pub fn open_chunk(path: &Path, chunk: usize, format: InputFormat) -> Result<RecordSource> {
    let file = File::open(path)
        .map_err(|err| DedupError::io(format!("unable to open {}: {}", path.display(), err)))?;
    let reader = BufReader::new(file);
    let origin: Arc<Path> = Arc::from(path);
    let source: RecordSource = match format {
        InputFormat::Lines => Box::new(LineSource::new(reader, chunk, origin)),
        InputFormat::Csv => Box::new(CsvSource::new(reader, chunk, origin)?),
    };
    Ok(source)
}

/// One record per line. Lines that are not valid UTF-8 come out as
/// recoverable decode errors; blank lines are skipped but still counted
/// for record ids.
pub struct LineSource<R> {
    reader: R,
    chunk: usize,
    line: usize,
    origin: Arc<Path>,
    trim: bool,
    buf: Vec<u8>,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R, chunk: usize, origin: Arc<Path>) -> Self {
        LineSource {
            reader,
            chunk,
            line: 0,
            origin,
            trim: false,
            buf: Vec::new(),
        }
    }

    /// Strip surrounding whitespace instead of only the line terminator.
    pub fn trimmed(mut self) -> Self {
        self.trim = true;
        self
    }
}

impl<R: BufRead> Iterator for LineSource<R> {
    type Item = Result<TextRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(DedupError::io(err))),
            }
            let id = RecordId {
                chunk: self.chunk,
                line: self.line,
            };
            self.line += 1;
            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
            }
            let content = match String::from_utf8(std::mem::take(&mut self.buf)) {
                Ok(content) => content,
                Err(err) => {
                    return Some(Err(DedupError::decode(format!(
                        "{}:{}: {}",
                        self.origin.display(),
                        id.line + 1,
                        err
                    ))))
                }
            };
            let content = if self.trim {
                content.trim().to_string()
            } else {
                content
            };
            if content.is_empty() {
                continue;
            }
            return Some(Ok(TextRecord {
                id,
                content,
                origin: self.origin.clone(),
                source_id: None,
            }));
        }
    }
}

/// Headed CSV with `id` and `text` columns, one record per row.
pub struct CsvSource<R> {
    records: csv::StringRecordsIntoIter<R>,
    headers: csv::StringRecord,
    chunk: usize,
    row: usize,
    origin: Arc<Path>,
}

impl<R: Read> CsvSource<R> {
    pub fn new(reader: R, chunk: usize, origin: Arc<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| DedupError::io(format!("{}: {}", origin.display(), err)))?
            .clone();
        if !headers.iter().any(|h| h == "id") || !headers.iter().any(|h| h == "text") {
            return Err(DedupError::invalid_config(format!(
                "{}: file must contain columns 'id' and 'text'",
                origin.display()
            )));
        }
        Ok(CsvSource {
            records: reader.into_records(),
            headers,
            chunk,
            row: 0,
            origin,
        })
    }
}

impl<R: Read> Iterator for CsvSource<R> {
    type Item = Result<TextRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self.records.next()?;
            let id = RecordId {
                chunk: self.chunk,
                line: self.row,
            };
            self.row += 1;
            let row: CsvRow = match result.and_then(|rec| rec.deserialize(Some(&self.headers))) {
                Ok(row) => row,
                Err(err) if err.is_io_error() => return Some(Err(DedupError::io(err))),
                Err(err) => {
                    return Some(Err(DedupError::decode(format!(
                        "{} row {}: {}",
                        self.origin.display(),
                        id.line + 1,
                        err
                    ))))
                }
            };
            if row.text.is_empty() {
                continue;
            }
            return Some(Ok(TextRecord {
                id,
                content: row.text,
                origin: self.origin.clone(),
                source_id: Some(row.id),
            }));
        }
    }
}
