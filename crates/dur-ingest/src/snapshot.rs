//! Raw snapshot files
//!
//! A snapshot is the collected upstream records saved as one pretty-printed
//! UTF-8 JSON array. [`SnapshotWriter`] appends records as pages arrive so the
//! full dataset never has to sit in memory; its output is byte-identical to
//! `serde_json::to_string_pretty` of the whole array.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::RawRecord;

const INDENT: &str = "  ";

fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Incremental JSON array writer
pub struct SnapshotWriter {
    path: PathBuf,
    out: BufWriter<File>,
    count: usize,
}

impl SnapshotWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        create_parent_dirs(&path)?;
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(b"[")?;
        Ok(Self {
            path,
            out,
            count: 0,
        })
    }

    pub fn append<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<()> {
        let pretty = serde_json::to_string_pretty(record)?;
        let separator: &[u8] = if self.count == 0 { b"\n" } else { b",\n" };
        self.out.write_all(separator)?;
        for (i, line) in pretty.lines().enumerate() {
            if i > 0 {
                self.out.write_all(b"\n")?;
            }
            self.out.write_all(INDENT.as_bytes())?;
            self.out.write_all(line.as_bytes())?;
        }
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Close the array and flush; returns the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        let closing: &[u8] = if self.count == 0 { b"]" } else { b"\n]" };
        self.out.write_all(closing)?;
        self.out.flush()?;
        info!(path = %self.path.display(), records = self.count, "Snapshot saved");
        Ok(self.count)
    }
}

/// Write a complete record set in one go
pub fn write_snapshot<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    let mut writer = SnapshotWriter::create(path)?;
    for record in records {
        writer.append(record)?;
    }
    writer.finish()
}

/// Read a raw snapshot written by [`SnapshotWriter`]
pub fn read_snapshot(path: &Path) -> Result<Vec<RawRecord>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn records() -> Vec<RawRecord> {
        vec![
            json!({"INGR_KOR_NAME": "아세클로페낙", "DEL_YN": "정상", "N": 1}),
            json!({"ingr_code": "D000893", "nested": {"a": [1, 2]}}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
    }

    #[test]
    fn test_output_matches_pretty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw/mixture_raw.json");

        let written = write_snapshot(&path, &records()).unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, serde_json::to_string_pretty(&records()).unwrap());
        assert!(content.contains("아세클로페낙"));
        assert_eq!(read_snapshot(&path).unwrap(), records());
    }

    #[test]
    fn test_empty_snapshot_is_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");

        let writer = SnapshotWriter::create(&path).unwrap();
        assert!(writer.is_empty());
        assert_eq!(writer.finish().unwrap(), 0);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[]");
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, json!([]));
    }
}
