//! IntervalResolver: normalizes a heterogeneous pair of endpoint
//! specifications into a concrete `[start, end]` sequence range, delegating
//! temporal lookups to [`SequenceLocator`].

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::{RewindError, Result};
use crate::locator::SequenceLocator;
use crate::segment::Segment;
use crate::session::StreamSession;
use crate::store::{FetchOptions, SegmentStore};
use crate::url::extract_parameter_from_url;

/// The documented DVR window used to resolve the `earliest` keyword.
pub const DVR_WINDOW: ChronoDuration = ChronoDuration::days(7);

/// One endpoint of a rewind interval, in any of the forms a caller may
/// supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointInStream {
    AbsoluteSequence(i64),
    AbsoluteDate(DateTime<Utc>),
    /// Non-negative count of segments from the other (already-resolved)
    /// endpoint.
    RelativeSequence(i64),
    /// Non-negative duration in seconds from the other endpoint's segment.
    RelativeDuration(f64),
    /// Valid only as `end`: `head_sequence - 1`.
    Now,
    /// Valid only as `start`: `head_sequence - floor(DVR_WINDOW / duration)`.
    Earliest,
    /// Valid only as `end`, in preview mode: no fixed end. Cannot be passed
    /// to [`IntervalResolver::resolve`]; use
    /// [`IntervalResolver::resolve_open_start`] instead.
    Open,
}

impl PointInStream {
    fn is_relative(&self) -> bool {
        matches!(self, PointInStream::RelativeSequence(_) | PointInStream::RelativeDuration(_))
    }
}

/// A resolved, concrete sequence range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindInterval {
    pub start: i64,
    pub end: i64,
}

pub struct IntervalResolver<'a> {
    session: &'a StreamSession,
    store: &'a SegmentStore,
    base_url: &'a str,
    dvr_window: ChronoDuration,
}

impl<'a> IntervalResolver<'a> {
    pub fn new(session: &'a StreamSession, store: &'a SegmentStore, base_url: &'a str) -> IntervalResolver<'a> {
        IntervalResolver { session, store, base_url, dvr_window: DVR_WINDOW }
    }

    /// Overrides the DVR window used to resolve the `earliest` keyword,
    /// typically from `RewindConfig::dvr_window`. Defaults to the
    /// documented 7-day window.
    pub fn with_dvr_window(mut self, dvr_window: StdDuration) -> IntervalResolver<'a> {
        self.dvr_window = ChronoDuration::from_std(dvr_window).unwrap_or(DVR_WINDOW);
        self
    }

    fn validate_preconditions(&self, start: PointInStream, end: PointInStream) -> Result<()> {
        if start.is_relative() && end.is_relative() {
            return Err(RewindError::Interval("at least one endpoint must not be relative".to_string()));
        }
        if matches!(start, PointInStream::Open) || matches!(end, PointInStream::Open) {
            return Err(RewindError::Interval("open endpoints are only valid via resolve_open_start".to_string()));
        }
        if matches!(end, PointInStream::Earliest) {
            return Err(RewindError::Interval("'earliest' is only valid as the start endpoint".to_string()));
        }
        if matches!(start, PointInStream::Now) {
            return Err(RewindError::Interval("'now' is only valid as the end endpoint".to_string()));
        }
        if matches!(start, PointInStream::RelativeDuration(_)) && matches!(end, PointInStream::RelativeDuration(_)) {
            return Err(RewindError::Interval("two relative durations together are ambiguous".to_string()));
        }
        Ok(())
    }

    /// Resolves a concrete `[start, end]` range. `end` must not be
    /// [`PointInStream::Open`].
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn resolve(&self, start: PointInStream, end: PointInStream) -> Result<RewindInterval> {
        self.validate_preconditions(start, end)?;

        if let (PointInStream::AbsoluteSequence(s), PointInStream::AbsoluteSequence(e)) = (start, end) {
            return self.finish(s, e);
        }

        let locator = SequenceLocator::new(self.session, self.store, self.base_url, None).await?;

        // Resolve whichever endpoint doesn't depend on the other first.
        let (resolved_start, resolved_end) = if start.is_relative() {
            let e = self.resolve_absolute(&locator, end, true).await?;
            let s = self.resolve_endpoint(&locator, start, false, None, Some(e)).await?;
            (s, e)
        } else {
            let s = self.resolve_absolute(&locator, start, false).await?;
            let e = self.resolve_endpoint(&locator, end, true, Some(s), None).await?;
            (s, e)
        };

        self.finish(resolved_start, resolved_end)
    }

    /// Resolves only the start endpoint, for preview mode (`end = ..`),
    /// where the producer streams forward with no fixed end.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn resolve_open_start(&self, start: PointInStream) -> Result<i64> {
        if matches!(start, PointInStream::Open) || start.is_relative() {
            return Err(RewindError::Interval("preview start must be an absolute endpoint".to_string()));
        }
        let locator = SequenceLocator::new(self.session, self.store, self.base_url, None).await?;
        self.resolve_absolute(&locator, start, false).await
    }

    /// Preview mode: resolves `start` and substitutes an end of
    /// `start + floor(preview_duration / nominal_duration)`, rather than
    /// streaming open-endedly. `preview_duration` is ordinarily
    /// [`RewindConfig::preview_duration`].
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn resolve_preview(&self, start: PointInStream, preview_duration: StdDuration) -> Result<RewindInterval> {
        let resolved_start = self.resolve_open_start(start).await?;
        let duration = self.segment_duration().await?;
        let window_segments = (preview_duration.as_secs_f64() / duration).floor() as i64;
        self.finish(resolved_start, resolved_start + window_segments)
    }

    fn finish(&self, start: i64, end: i64) -> Result<RewindInterval> {
        if start > end {
            return Err(RewindError::Interval(format!("start {start} is after end {end}")));
        }
        Ok(RewindInterval { start, end })
    }

    async fn head_sequence(&self) -> Result<i64> {
        self.session.request_reference_sequence(self.base_url).await
    }

    async fn segment_duration(&self) -> Result<f64> {
        extract_parameter_from_url("dur", self.base_url)?
            .parse()
            .map_err(|_| RewindError::Protocol("non-numeric dur parameter in base URL".to_string()))
    }

    /// Resolves an endpoint known not to be relative (sequence, date, `now`,
    /// `earliest`).
    async fn resolve_absolute(&self, locator: &SequenceLocator<'a>, point: PointInStream, is_end: bool) -> Result<i64> {
        match point {
            PointInStream::AbsoluteSequence(s) => Ok(s),
            PointInStream::AbsoluteDate(d) => locator.find(d, is_end).await,
            PointInStream::Now => Ok(self.head_sequence().await? - 1),
            PointInStream::Earliest => {
                let duration = self.segment_duration().await?;
                let window_segments = (self.dvr_window.num_seconds() as f64 / duration).floor() as i64;
                Ok(self.head_sequence().await? - window_segments)
            }
            PointInStream::RelativeSequence(_) | PointInStream::RelativeDuration(_) => Err(
                RewindError::Interval("internal: resolve_absolute called with a relative endpoint".to_string()),
            ),
            PointInStream::Open => Err(RewindError::Interval("open endpoint cannot be resolved".to_string())),
        }
    }

    /// Resolves any endpoint, given the other endpoint's already-resolved
    /// sequence when relative resolution needs it.
    async fn resolve_endpoint(
        &self,
        locator: &SequenceLocator<'a>,
        point: PointInStream,
        is_end: bool,
        other_if_start_known: Option<i64>,
        other_if_end_known: Option<i64>,
    ) -> Result<i64> {
        match point {
            PointInStream::RelativeSequence(n) => {
                if is_end {
                    let start = other_if_start_known
                        .ok_or_else(|| RewindError::Interval("relative end needs a resolved start".to_string()))?;
                    Ok(start + n)
                } else {
                    let end = other_if_end_known
                        .ok_or_else(|| RewindError::Interval("relative start needs a resolved end".to_string()))?;
                    Ok(end - n)
                }
            }
            PointInStream::RelativeDuration(seconds) => {
                let anchor_sequence = if is_end {
                    other_if_start_known
                        .ok_or_else(|| RewindError::Interval("relative end needs a resolved start".to_string()))?
                } else {
                    other_if_end_known
                        .ok_or_else(|| RewindError::Interval("relative start needs a resolved end".to_string()))?
                };
                let anchor = self.fetch_segment(anchor_sequence).await?;
                let target = if is_end {
                    anchor.ingestion_start_date() + ChronoDuration::microseconds((seconds * 1e6) as i64)
                } else {
                    anchor.ingestion_end_date()? - ChronoDuration::microseconds((seconds * 1e6) as i64)
                };
                locator.find(target, !is_end).await
            }
            _ => self.resolve_absolute(locator, point, is_end).await,
        }
    }

    async fn fetch_segment(&self, sequence: i64) -> Result<Segment> {
        let path = self
            .store
            .fetch(self.session, sequence, self.base_url, FetchOptions::default())
            .await
            .map_err(|e| RewindError::SegmentDownload { sequence, reason: e.to_string() })?;
        Segment::from_file(&path)
    }
}
