//! Captured process output: the rolling diagnostic tail and the per-component log file.

use log::warn;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Number of output chunks kept for failure diagnostics.
pub const OUTPUT_TAIL_CHUNKS: usize = 10;

/// Last few chunks written by a process.
#[derive(Debug, Clone)]
pub struct OutputTail {
    chunks: VecDeque<String>,
    capacity: usize,
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::with_capacity(OUTPUT_TAIL_CHUNKS)
    }
}

impl OutputTail {
    /// Tail keeping at most `capacity` chunks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a chunk, evicting the oldest one when full.
    pub fn push(&mut self, chunk: impl Into<String>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk.into());
    }

    /// Chunks concatenated in arrival order.
    pub fn render(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    /// Whether nothing was captured yet.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Append-mode log file of one component. A sink without a path discards output.
pub(crate) struct LogSink {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl LogSink {
    pub(crate) fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub(crate) async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(file),
        })
    }

    pub(crate) async fn write(&mut self, chunk: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let result = match file.write_all(chunk.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // Logging is best effort; the process keeps running
            if let Some(path) = &self.path {
                warn!("Cannot write log file {}: {}", path.display(), e);
            }
            self.file = None;
        }
    }
}
