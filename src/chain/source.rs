//! Transaction feed contract and the NDJSON implementations

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use super::RawTransaction;
use crate::error::{Error, Result};

/// A stream of parsed transactions for the normalizer.
///
/// `None` means the source is exhausted (EOF on a file, or a closed feed
/// that will not reconnect). Per-item errors are recoverable: the caller
/// drops the item and keeps reading.
#[async_trait]
pub trait TransactionSource: Send {
    async fn next_transaction(&mut self) -> Option<Result<RawTransaction>>;
}

/// Newline-delimited JSON source: one `RawTransaction` per line.
///
/// Used for file-based live feeds (an external decoder process writing to a
/// pipe) and in tests.
pub struct NdjsonSource<R> {
    reader: R,
    line: String,
    lines_read: u64,
}

impl NdjsonSource<BufReader<File>> {
    pub async fn open(path: &str) -> Result<Self> {
        let file = File::open(path)
            .await
            .map_err(|e| Error::FeedConnection(format!("open {}: {}", path, e)))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl NdjsonSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            lines_read: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TransactionSource for NdjsonSource<R> {
    async fn next_transaction(&mut self) -> Option<Result<RawTransaction>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {
                    self.lines_read += 1;
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(trimmed).map_err(|e| {
                        warn!(line = self.lines_read, error = %e, "Undecodable feed line");
                        Error::FeedDecode(format!("line {}: {}", self.lines_read, e))
                    }));
                }
                Err(e) => return Some(Err(Error::Io(e.to_string()))),
            }
        }
    }
}
