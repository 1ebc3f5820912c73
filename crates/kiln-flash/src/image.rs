//! Image writers: where staged firmware bytes land.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Sink for staged image bytes. The concrete persistent writer is an
/// external concern; this is the narrow interface the state machine
/// drives.
pub trait ImageWriter {
    /// Opens the staging destination for the given blob path.
    fn open(&mut self, path: &str) -> bool;

    /// Closes the staging destination. Idempotent.
    fn close(&mut self);

    /// Writes `data` at a byte offset into the staged image.
    fn write(&mut self, offset: u32, data: &[u8]) -> bool;

    /// Size in bytes of the image staged so far.
    fn size(&mut self) -> u32;
}

/// Stages image bytes into a file.
///
/// Opening truncates any previous staging content; hosts may write at
/// scattered offsets, so every write seeks first.
#[derive(Debug)]
pub struct FileWriter {
    filename: PathBuf,
    file: Option<File>,
}

impl FileWriter {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            file: None,
        }
    }
}

impl ImageWriter for FileWriter {
    fn open(&mut self, path: &str) -> bool {
        // A second open without a close means a session leaked somewhere.
        if self.file.is_some() {
            tracing::warn!(path, "staging file already open");
            return false;
        }
        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.filename)
        {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(err) => {
                tracing::error!(
                    file = %self.filename.display(),
                    error = %err,
                    "opening staging file failed"
                );
                false
            }
        }
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        if file.seek(SeekFrom::Start(u64::from(offset))).is_err() {
            return false;
        }
        file.write_all(data).is_ok()
    }

    fn size(&mut self) -> u32 {
        stat_size(&self.filename)
    }
}

fn stat_size(path: &Path) -> u32 {
    fs::metadata(path).map(|meta| meta.len() as u32).unwrap_or(0)
}
