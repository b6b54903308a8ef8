//! Output files are written to a temporary sibling and only moved into place
//! once a run completes, so a failed or cancelled run never leaves a truncated
//! file at the target path.

use crate::error::{AppError, Result};
use log;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct OutputSink {
    target: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl OutputSink {
    /// Creates the temporary file next to `target`, creating parent directories as needed.
    pub fn create(target: &Path) -> Result<Self> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| AppError::FileWrite {
            path: parent.clone(),
            source: e,
        })?;
        let temp = tempfile::Builder::new()
            .prefix(".ctxpack-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| AppError::FileWrite {
                path: target.to_path_buf(),
                source: e,
            })?;
        log::debug!(
            "Writing {} via temporary file {}",
            target.display(),
            temp.path().display()
        );
        Ok(Self {
            target: target.to_path_buf(),
            writer: BufWriter::new(temp),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    /// Paths a walker must never visit while this sink is open.
    pub fn guarded_paths(&self) -> Vec<PathBuf> {
        let target = match (self.target.parent(), self.target.file_name()) {
            (Some(parent), Some(name)) => fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| self.target.clone()),
            _ => self.target.clone(),
        };
        vec![self.temp_path().to_path_buf(), target]
    }

    /// Flushes and atomically renames the temporary file onto the target.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        let temp = self.writer.into_inner().map_err(|e| AppError::FileWrite {
            path: target.clone(),
            source: e.into_error(),
        })?;
        temp.as_file().sync_all().map_err(|e| AppError::FileWrite {
            path: target.clone(),
            source: e,
        })?;
        temp.persist(&target).map_err(|e| AppError::FileWrite {
            path: target.clone(),
            source: e.error,
        })?;
        log::info!("Wrote {}", target.display());
        Ok(())
    }

    /// Drops the temporary file, leaving any existing target untouched.
    pub fn discard(self) {
        log::debug!("Discarding partial output for {}", self.target.display());
        // NamedTempFile removes itself on drop.
        drop(self.writer);
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
