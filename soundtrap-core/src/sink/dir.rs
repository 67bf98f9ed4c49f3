//! Stores each encoded segment as a file in a directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use super::{EncodedSegment, TransportSink};
use crate::error::{Result, SoundtrapError};

#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `segment-20260101T120000.250Z-7.wav`
    pub fn file_name(encoded: &EncodedSegment, at: DateTime<Utc>) -> String {
        format!(
            "segment-{}-{}.{}",
            at.format("%Y%m%dT%H%M%S%.3fZ"),
            encoded.segment_id,
            encoded.extension
        )
    }
}

impl TransportSink for DirectorySink {
    fn send(&mut self, encoded: &EncodedSegment) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            SoundtrapError::Transport(format!("{}: {e}", self.dir.display()))
        })?;
        let path = self.dir.join(Self::file_name(encoded, Utc::now()));
        fs::write(&path, &encoded.bytes)
            .map_err(|e| SoundtrapError::Transport(format!("{}: {e}", path.display())))?;
        info!(
            segment_id = encoded.segment_id,
            path = %path.display(),
            bytes = encoded.bytes.len(),
            "segment written"
        );
        Ok(())
    }
}
