//! The [`Segment`] data type and its actual-duration measurement.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tracing::warn;

use crate::error::{RewindError, Result};
use crate::metadata::{self, SegmentMetadata};

/// A downloaded (full or partial) media segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub sequence: i64,
    pub metadata: SegmentMetadata,
    pub local_path: Option<PathBuf>,
    pub is_partial: bool,
}

impl Segment {
    /// Builds a `Segment` from a file already on disk.
    #[tracing::instrument(level = "trace")]
    pub fn from_file(path: &Path) -> Result<Segment> {
        let content = fs::read(path).map_err(|e| RewindError::io(e, path))?;
        let metadata = metadata::parse(&content)?;
        Ok(Segment {
            sequence: metadata.sequence_number,
            metadata,
            local_path: Some(path.to_path_buf()),
            is_partial: false,
        })
    }

    /// Builds a `Segment` from an in-memory (possibly partial) byte buffer.
    pub fn from_bytes(content: &[u8]) -> Result<Segment> {
        let metadata = metadata::parse(content)?;
        Ok(Segment {
            sequence: metadata.sequence_number,
            metadata,
            local_path: None,
            is_partial: true,
        })
    }

    /// The wall-clock instant at which ingestion of this segment began.
    pub fn ingestion_start_date(&self) -> DateTime<Utc> {
        seconds_to_datetime(self.metadata.ingestion_walltime)
    }

    /// The wall-clock instant at which ingestion of this segment ended,
    /// computed from the *actual* (not nominal) duration.
    pub fn ingestion_end_date(&self) -> Result<DateTime<Utc>> {
        let actual = self.actual_duration()?;
        Ok(self.ingestion_start_date() + chrono::Duration::microseconds((actual * 1e6) as i64))
    }

    /// Measures the actual duration of a fully downloaded segment by probing
    /// its container with `ffprobe`, falling back to the nominal
    /// `target_duration` if the probe cannot determine it (e.g. truncated
    /// partial segments).
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn actual_duration(&self) -> Result<f64> {
        let path = self.local_path.as_ref().ok_or_else(|| {
            RewindError::Protocol("cannot measure duration of a segment with no local file".into())
        })?;
        match ffprobe::ffprobe(path) {
            Ok(info) => {
                if let Some(d) = info.format.duration.as_ref().and_then(|d| d.parse::<f64>().ok()) {
                    Ok(d)
                } else {
                    warn!("ffprobe returned no duration for {}, falling back to nominal", path.display());
                    Ok(self.metadata.target_duration)
                }
            }
            Err(e) => {
                warn!("ffprobe failed on {}: {e}, falling back to nominal duration", path.display());
                Ok(self.metadata.target_duration)
            }
        }
    }
}

pub(crate) fn seconds_to_datetime(secs: f64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, ((secs.fract()) * 1e9) as u32)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
}
