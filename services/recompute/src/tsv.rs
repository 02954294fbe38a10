//! Streaming reader for header-keyed TSV files.
//!
//! Reads one line at a time off any buffered byte stream, so a large daily
//! file is never held in memory. The first line is the header; every later
//! line becomes a record keyed by column name. Rows shorter than the header
//! leave their trailing columns absent; present-but-empty values stay
//! present and are interpreted by the caller.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Error)]
pub enum TsvError {
    /// Read failure or invalid UTF-8 in the byte stream.
    #[error("tsv read failed: {0}")]
    Read(#[from] std::io::Error),

    /// The stream ended before a header line.
    #[error("tsv stream has no header line")]
    MissingHeader,
}

/// One record, keyed by the file's header columns.
#[derive(Debug, Clone)]
pub struct TsvRecord {
    columns: Arc<HashMap<String, usize>>,
    values: Vec<String>,
}

impl TsvRecord {
    /// Value of the named column, or `None` when the row does not carry it.
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = *self.columns.get(column)?;
        self.values.get(index).map(String::as_str)
    }

    /// Value of the named column, treating an empty string as unset.
    pub fn get_non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|value| !value.is_empty())
    }
}

/// Lazy record sequence over a buffered byte stream.
pub struct TsvReader<R> {
    reader: R,
    columns: Arc<HashMap<String, usize>>,
    line: String,
}

impl<R: AsyncBufRead + Unpin> TsvReader<R> {
    /// Consume the header line and prepare to yield records.
    pub async fn new(mut reader: R) -> Result<Self, TsvError> {
        let mut line = String::new();
        let header = loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(TsvError::MissingHeader);
            }
            let trimmed = trim_line_ending(&line);
            if !trimmed.is_empty() {
                break trimmed;
            }
        };

        let columns: HashMap<String, usize> = header
            .split('\t')
            .enumerate()
            .map(|(index, name)| (name.to_string(), index))
            .collect();

        Ok(Self {
            reader,
            columns: Arc::new(columns),
            line: String::new(),
        })
    }

    /// Next record, or `None` at end of stream. Empty lines are skipped.
    pub async fn next_record(&mut self) -> Result<Option<TsvRecord>, TsvError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let row = trim_line_ending(&self.line);
            if row.is_empty() {
                continue;
            }
            let values = row.split('\t').map(str::to_string).collect();
            return Ok(Some(TsvRecord {
                columns: Arc::clone(&self.columns),
                values,
            }));
        }
    }
}

fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches('\n').trim_end_matches('\r')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn reader(input: &str) -> TsvReader<Cursor<Vec<u8>>> {
        TsvReader::new(Cursor::new(input.as_bytes().to_vec()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_records_are_keyed_by_header() {
        let mut tsv = reader("time\tepisodeId\n2024-03-05T10:01:00.000Z\tE1\n").await;
        let record = tsv.next_record().await.unwrap().unwrap();
        assert_eq!(record.get("time"), Some("2024-03-05T10:01:00.000Z"));
        assert_eq!(record.get("episodeId"), Some("E1"));
        assert_eq!(record.get("botType"), None);
        assert!(tsv.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_rows_leave_columns_absent() {
        let mut tsv = reader("time\tepisodeId\taudienceId\n2024-03-05T10:01:00.000Z\tE1\n").await;
        let record = tsv.next_record().await.unwrap().unwrap();
        assert_eq!(record.get("episodeId"), Some("E1"));
        assert_eq!(record.get("audienceId"), None);
    }

    #[tokio::test]
    async fn test_empty_values_are_present_but_unset() {
        let mut tsv = reader("time\tepisodeId\taudienceId\nT\t\tabc\n").await;
        let record = tsv.next_record().await.unwrap().unwrap();
        assert_eq!(record.get("episodeId"), Some(""));
        assert_eq!(record.get_non_empty("episodeId"), None);
        assert_eq!(record.get_non_empty("audienceId"), Some("abc"));
    }

    #[tokio::test]
    async fn test_trailing_empty_lines_are_skipped() {
        let mut tsv = reader("time\nT1\n\n\n").await;
        assert!(tsv.next_record().await.unwrap().is_some());
        assert!(tsv.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let mut tsv = reader("time\tepisodeId\r\nT1\tE1\r\n").await;
        let record = tsv.next_record().await.unwrap().unwrap();
        assert_eq!(record.get("episodeId"), Some("E1"));
    }

    #[tokio::test]
    async fn test_empty_stream_has_no_header() {
        let result = TsvReader::new(Cursor::new(Vec::new())).await;
        assert!(matches!(result, Err(TsvError::MissingHeader)));
    }
}
