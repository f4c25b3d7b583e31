//! Append-only CSV dataset of labeled samples.

use crate::cancel::CancelToken;
use crate::capture::CaptureRecord;
use crate::collector::types::CHANNEL_COUNT;
use crate::error::AgentError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Name of the label column.
pub const LABEL_COLUMN: &str = "Output";

/// Dataset header: `Channel_1..Channel_8,Output`.
pub fn header() -> Vec<String> {
    (1..=CHANNEL_COUNT)
        .map(|i| format!("Channel_{i}"))
        .chain(std::iter::once(LABEL_COLUMN.to_string()))
        .collect()
}

/// A dataset file on disk.
///
/// Clones share one write lock, so resets and appends from any clone are
/// serialized.
#[derive(Debug, Clone)]
pub struct Dataset {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Dataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, AgentError> {
        self.write_lock
            .lock()
            .map_err(|_| AgentError::SinkWriteFailure("dataset write lock poisoned".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Truncate the file and write the header. Starts a new collection cycle.
    pub fn reset(&self) -> Result<(), AgentError> {
        let _guard = self.lock()?;
        self.write_header()
    }

    fn write_header(&self) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(sink_error)?;
        }
        let mut writer = csv::Writer::from_path(&self.path).map_err(sink_error)?;
        writer.write_record(header()).map_err(sink_error)?;
        writer.flush().map_err(sink_error)?;
        tracing::info!(path = %self.path.display(), "dataset reset");
        Ok(())
    }

    /// Append rows without touching the header. A missing file is created
    /// with a header first.
    pub fn append(&self, records: &[CaptureRecord]) -> Result<usize, AgentError> {
        let _guard = self.lock()?;
        self.append_rows(records)
    }

    /// Like [`append`](Self::append), but writes nothing once `cancel` has
    /// fired. The check and the write happen under the write lock, so a
    /// terminated attempt cannot write after its cancellation is observed.
    pub fn append_unless_cancelled(
        &self,
        records: &[CaptureRecord],
        cancel: &CancelToken,
    ) -> Result<usize, AgentError> {
        let _guard = self.lock()?;
        if cancel.is_cancelled() {
            return Err(AgentError::Worker(
                "capture attempt cancelled before its records were written".to_string(),
            ));
        }
        self.append_rows(records)
    }

    fn append_rows(&self, records: &[CaptureRecord]) -> Result<usize, AgentError> {
        if !self.exists() {
            self.write_header()?;
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(sink_error)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        for record in records {
            let row = record
                .sample
                .channels
                .iter()
                .map(|v| v.to_string())
                .chain(std::iter::once(record.label.to_string()));
            writer.write_record(row).map_err(sink_error)?;
        }
        writer.flush().map_err(sink_error)?;

        tracing::debug!(rows = records.len(), path = %self.path.display(), "dataset rows appended");
        Ok(records.len())
    }

    /// Read back every row as `(channels, label)`.
    pub fn rows(&self) -> Result<Vec<([u16; CHANNEL_COUNT], usize)>, AgentError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(sink_error)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(sink_error)?;
            if record.len() != CHANNEL_COUNT + 1 {
                return Err(AgentError::SinkWriteFailure(format!(
                    "row has {} columns, expected {}",
                    record.len(),
                    CHANNEL_COUNT + 1
                )));
            }
            let mut channels = [0u16; CHANNEL_COUNT];
            for (slot, field) in channels.iter_mut().zip(record.iter()) {
                *slot = field.parse().map_err(sink_error)?;
            }
            let label = record[CHANNEL_COUNT].parse().map_err(sink_error)?;
            rows.push((channels, label));
        }
        Ok(rows)
    }

    /// Number of data rows, 0 if the file does not exist.
    pub fn row_count(&self) -> Result<usize, AgentError> {
        if !self.exists() {
            return Ok(0);
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(sink_error)?;
        let mut count = 0;
        for record in reader.records() {
            record.map_err(sink_error)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn headers(&self) -> Result<Vec<String>, AgentError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(sink_error)?;
        let headers = reader.headers().map_err(sink_error)?;
        Ok(headers.iter().map(str::to_string).collect())
    }
}

fn sink_error(e: impl std::fmt::Display) -> AgentError {
    AgentError::SinkWriteFailure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Sample;

    fn records(label: usize, n: usize) -> Vec<CaptureRecord> {
        (0..n)
            .map(|i| CaptureRecord {
                sample: Sample::splat(i as u16),
                label,
            })
            .collect()
    }

    #[test]
    fn test_header_layout() {
        let header = header();
        assert_eq!(header.len(), 9);
        assert_eq!(header[0], "Channel_1");
        assert_eq!(header[7], "Channel_8");
        assert_eq!(header[8], "Output");
    }

    #[test]
    fn test_reset_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("data.csv"));

        dataset.reset().unwrap();
        assert_eq!(dataset.row_count().unwrap(), 0);

        dataset.append(&records(0, 3)).unwrap();
        dataset.append(&records(1, 2)).unwrap();

        assert_eq!(dataset.headers().unwrap(), header());
        let rows = dataset.rows().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[2], ([2; CHANNEL_COUNT], 0));
        assert_eq!(rows[4].1, 1);
    }

    #[test]
    fn test_reset_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("data.csv"));

        dataset.append(&records(2, 10)).unwrap();
        assert_eq!(dataset.row_count().unwrap(), 10);

        dataset.reset().unwrap();
        assert_eq!(dataset.row_count().unwrap(), 0);
        assert_eq!(dataset.headers().unwrap(), header());
    }

    #[test]
    fn test_append_creates_missing_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("nested").join("data.csv"));
        assert!(!dataset.exists());

        dataset.append(&records(3, 1)).unwrap();
        let content = std::fs::read_to_string(dataset.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(header().join(",").as_str()));
        assert_eq!(lines.next(), Some("0,0,0,0,0,0,0,0,3"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_cancelled_append_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("data.csv"));
        let cancel = CancelToken::new();

        assert_eq!(dataset.append_unless_cancelled(&records(1, 4), &cancel).unwrap(), 4);
        cancel.cancel();
        assert!(matches!(
            dataset.clone().append_unless_cancelled(&records(1, 4), &cancel),
            Err(AgentError::Worker(_))
        ));
        assert_eq!(dataset.row_count().unwrap(), 4);
    }

    #[test]
    fn test_missing_file_has_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(dir.path().join("absent.csv"));
        assert_eq!(dataset.row_count().unwrap(), 0);
    }
}
