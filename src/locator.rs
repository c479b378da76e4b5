//! SequenceLocator: given a reference segment and a target wall-clock
//! timestamp, finds the sequence number whose media covers it.
//!
//! The algorithm is ballistic estimate → signed jump → linear sweep → gap
//! check, in that order; see the module-level steps below for the exact
//! arithmetic at each stage.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{RewindError, Result};
use crate::metadata::{self, SegmentMetadata, PARTIAL_SEGMENT_SIZE_BYTES};
use crate::segment::Segment;
use crate::session::StreamSession;
use crate::store::{FetchOptions, SegmentStore};
use crate::url::extract_parameter_from_url;

/// A (sequence, metadata) pair kept as the locator's working candidate.
struct Candidate {
    sequence: i64,
    metadata: SegmentMetadata,
}

/// Finds sequences by wall-clock timestamp against one representation's base
/// URL.
pub struct SequenceLocator<'a> {
    session: &'a StreamSession,
    store: &'a SegmentStore,
    base_url: &'a str,
    segment_duration: f64,
    probe_size: u64,
    reference: Candidate,
}

impl<'a> SequenceLocator<'a> {
    /// Builds a locator, using `reference_sequence` as the starting
    /// candidate, or fetching the upstream head cursor if none is given.
    pub async fn new(
        session: &'a StreamSession,
        store: &'a SegmentStore,
        base_url: &'a str,
        reference_sequence: Option<i64>,
    ) -> Result<SequenceLocator<'a>> {
        let segment_duration: f64 = extract_parameter_from_url("dur", base_url)?
            .parse()
            .map_err(|_| RewindError::Protocol("non-numeric dur parameter in base URL".to_string()))?;

        let probe_size = PARTIAL_SEGMENT_SIZE_BYTES;
        let reference_sequence = match reference_sequence {
            Some(s) => s,
            None => session.request_reference_sequence(base_url).await?,
        };
        let reference = fetch_metadata(session, store, base_url, reference_sequence, probe_size)
            .await
            .map_err(|e| RewindError::SequenceLocating(Box::new(e)))?;

        Ok(SequenceLocator {
            session,
            store,
            base_url,
            segment_duration,
            probe_size,
            reference: Candidate { sequence: reference_sequence, metadata: reference },
        })
    }

    /// Overrides the header-prefix size requested for metadata-only fetches,
    /// typically from `RewindConfig::partial_segment_probe_size`. Must stay
    /// at or above the documented 2000-byte minimum to parse correctly.
    pub fn with_probe_size(mut self, probe_size: u64) -> SequenceLocator<'a> {
        self.probe_size = probe_size;
        self
    }

    /// Finds the sequence whose media contains `desired_time`.
    ///
    /// `end` selects which side of a gap the result clamps to: `false`
    /// (resolving an interval start) advances past the gap, `true`
    /// (resolving an interval end) stays before it.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn find(&self, desired_time: DateTime<Utc>, end: bool) -> Result<i64> {
        let t = timestamp_secs(desired_time);

        // Step 1 — ballistic estimate.
        let delta = (self.reference.metadata.ingestion_walltime - t) / self.segment_duration;
        let estimated_sequence = self.reference.sequence - delta.ceil() as i64;
        debug!(estimated_sequence, "segment initially estimated");

        self.refine_sequence(estimated_sequence, t, end)
            .await
            .map_err(|e| RewindError::SequenceLocating(Box::new(e)))
    }

    async fn fetch_candidate(&self, sequence: i64) -> Result<Candidate> {
        let metadata = fetch_metadata(self.session, self.store, self.base_url, sequence, self.probe_size).await?;
        Ok(Candidate { sequence, metadata })
    }

    async fn refine_sequence(&self, initial_sequence: i64, desired_time: f64, end: bool) -> Result<i64> {
        let mut candidate = self.fetch_candidate(initial_sequence).await?;
        let initial_diff = desired_time - candidate.metadata.ingestion_walltime;
        if initial_diff == 0.0 {
            return Ok(candidate.sequence);
        }

        // Step 2 — refine by signed jump.
        let jump_length = (initial_diff / self.segment_duration).floor() as i64;
        candidate = self.fetch_candidate(candidate.sequence + jump_length).await?;
        let mut current_diff = desired_time - candidate.metadata.ingestion_walltime;
        debug!(sequence = candidate.sequence, current_diff, "made jump to segment");
        if current_diff == 0.0 {
            return Ok(candidate.sequence);
        }

        let direction: i64 = if current_diff.is_sign_positive() { 1 } else { -1 };

        // Step 3 — linear sweep until the sign of the difference flips.
        let mut have_same_sign = true;
        while have_same_sign && current_diff != 0.0 {
            candidate = self.fetch_candidate(candidate.sequence + direction).await?;
            current_diff = desired_time - candidate.metadata.ingestion_walltime;
            let current_direction: i64 = if current_diff.is_sign_positive() { 1 } else { -1 };
            have_same_sign = current_direction == direction;
        }

        if current_diff == 0.0 {
            return Ok(candidate.sequence);
        }

        if direction == 1 {
            candidate = self.fetch_candidate(candidate.sequence - 1).await?;
        }
        let candidate_diff = desired_time - candidate.metadata.ingestion_walltime;

        // Step 4 — gap check: download the full candidate and compare its
        // actual duration against the remaining time difference.
        let path = self
            .store
            .fetch(self.session, candidate.sequence, self.base_url, FetchOptions::default())
            .await
            .map_err(|e| RewindError::SegmentDownload { sequence: candidate.sequence, reason: e.to_string() })?;
        let full_segment = Segment::from_file(&path)?;
        let candidate_duration = full_segment.actual_duration()?;

        debug!(candidate_diff, candidate_duration, "checked gap at candidate");

        if candidate_duration < candidate_diff {
            debug!("input time falls into a gap");
            if !end {
                candidate.sequence += 1;
            }
        }

        Ok(candidate.sequence)
    }
}

async fn fetch_metadata(
    session: &StreamSession,
    store: &SegmentStore,
    base_url: &str,
    sequence: i64,
    probe_size: u64,
) -> Result<SegmentMetadata> {
    let buf = store
        .fetch_to_buffer(session, sequence, base_url, FetchOptions { size: Some(probe_size), force: true })
        .await
        .map_err(|e| RewindError::SegmentDownload { sequence, reason: e.to_string() })?;
    metadata::parse(&buf)
}

fn timestamp_secs(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_secs_round_trips_through_seconds_to_datetime() {
        let dt = crate::segment::seconds_to_datetime(1679329555.339525);
        let back = timestamp_secs(dt);
        assert!((back - 1679329555.339525).abs() < 1e-6);
    }
}
