//! The append-only log file behind [`TextLogStorage`](super::TextLogStorage).
//!
//! One JSON-encoded [`Record`] per line. The file only grows through
//! [`LogFile::append`]; every other change goes through
//! [`LogFile::replace`], which writes a sibling temporary file and renames it
//! over the log so readers see either the old or the new content in full.

use snip_core::{Record, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub(crate) fn encode(record: &Record) -> Result<String, StorageError> {
    serde_json::to_string(record)
        .map_err(|e| StorageError::InvalidData(format!("failed to encode record: {e}")))
}

/// Decodes one log line. `line` is 1-based and only used for reporting.
pub(crate) fn decode(raw: &str, line: usize) -> Result<Record, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corruption {
        line,
        reason: e.to_string(),
    })
}

#[derive(Debug)]
pub(crate) struct LogFile {
    path: PathBuf,
}

impl LogFile {
    /// Opens the log at `path`, creating it (and its parent directory) when
    /// missing and truncating it when `truncate` is set.
    pub fn open(path: impl Into<PathBuf>, truncate: bool) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new()
            .create(true)
            .append(!truncate)
            .write(true)
            .truncate(truncate)
            .open(&path)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Decodes every record in file order.
    ///
    /// A malformed line aborts the read with [`StorageError::Corruption`].
    /// A missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<Record>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(decode(&line, index + 1)?);
        }
        Ok(records)
    }

    /// Appends `records` with a single buffered write.
    pub fn append(&self, records: &[Record]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let buffer = render(records)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buffer.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Atomically replaces the whole log with `records`.
    pub fn replace(&self, records: &[Record]) -> Result<(), StorageError> {
        let buffer = render(records)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(buffer.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::from(e.error))?;
        Ok(())
    }

    pub fn truncate(&self) -> Result<(), StorageError> {
        File::create(&self.path)?;
        Ok(())
    }
}

fn render(records: &[Record]) -> Result<String, StorageError> {
    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&encode(record)?);
        buffer.push('\n');
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> LogFile {
        LogFile::open(dir.path().join("links.log"), false).unwrap()
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogFile::open(dir.path().join("nested/deeper/links.log"), false).unwrap();
        assert!(log.exists());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&[Record::new("https://a.example", "a1", 1)]).unwrap();
        log.append(&[
            Record::new("https://b.example", "b1", 1),
            Record::new("https://c.example", "c1", 2),
        ])
        .unwrap();

        let ids: Vec<_> = log
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.url_id)
            .collect();
        assert_eq!(ids, ["a1", "b1", "c1"]);
    }

    #[test]
    fn replace_swaps_content() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&[Record::new("https://a.example", "a1", 1)]).unwrap();

        log.replace(&[Record::new("https://z.example", "z1", 9)]).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url_id, "z1");
        // no temporary files are left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn malformed_line_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&[Record::new("https://a.example", "a1", 1)]).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();

        let err = log.read_all().unwrap_err();
        assert!(matches!(err, StorageError::Corruption { line: 2, .. }));
    }

    #[test]
    fn open_with_truncate_empties_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.log");
        LogFile::open(&path, false)
            .unwrap()
            .append(&[Record::new("https://a.example", "a1", 1)])
            .unwrap();

        let log = LogFile::open(&path, true).unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }
}
