//! Frame sources

use detection::RawFrame;
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{info, warn};

use crate::MonitorError;

/// Supplier of processed frames, one per cycle
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<RawFrame>, MonitorError>> + Send;
}

/// Replays frames stored as one JSON object per line.
///
/// Blank lines are skipped; malformed lines are logged and skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<BufReader<R>>,
    line_no: usize,
    skipped: usize,
}

impl JsonLinesSource<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        info!("Replaying frames from {}", path.display());
        Ok(Self::new(file))
    }
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Malformed lines skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: AsyncRead + Unpin + Send> FrameSource for JsonLinesSource<R> {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, MonitorError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawFrame>(line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed frame on line {}: {}", self.line_no, e);
                }
            }
        }
        Ok(None)
    }
}
