//! ExcerptProducer: downloads a resolved sequence range, then either
//! hands back the raw per-sequence paths or invokes the muxer collaborator
//! to produce a single trimmed artifact.
//!
//! Boundary handling follows the table in the module docs of [`crate::muxer`]:
//! the first and last segment of the range are cut at a sub-segment
//! millisecond offset, the segments in between are concatenated by copy,
//! and the (up to three) parts are concatenated into the final container.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs_err as fs;

use crate::catalog::Catalog;
use crate::config::RewindConfig;
use crate::error::{RewindError, Result};
use crate::interval::RewindInterval;
use crate::muxer::{self, Cut};
use crate::query;
use crate::representation::Representation;
use crate::segment::Segment;
use crate::session::StreamSession;
use crate::store::{FetchOptions, SegmentStore};

/// Receives progress updates as segments are downloaded. The core is
/// agnostic to whether the sink renders a terminal progress bar, writes to
/// a log, or does nothing at all.
pub trait ProgressSink: Send + Sync {
    fn segment_started(&self, _sequence: i64, _kind: &str) {}
    fn segment_finished(&self, _sequence: i64, _kind: &str) {}
    fn finalize(&self) {}
}

/// A sink that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {}

/// A cooperative cancellation flag. Polled between segment requests and
/// between muxer invocations; does not interrupt I/O already in flight.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RewindError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Resolves `spec` against `catalog`, requiring exactly one match.
fn resolve_single(catalog: &Catalog, spec: &str) -> Result<Representation> {
    let matched = query::query(spec, catalog)?;
    match matched.len() {
        0 => Err(RewindError::EmptyFormatSpec(spec.to_string())),
        1 => Ok(matched.into_iter().next().unwrap()),
        _ => Err(RewindError::AmbiguousFormatSpec(spec.to_string())),
    }
}

/// A fully specified excerpt request: the resolved sequence range, the
/// original (pre-snapping) endpoint times if the caller supplied them (used
/// only to compute sub-segment trim offsets), and the format specs
/// selecting exactly one audio and/or one video representation.
#[derive(Debug, Clone)]
pub struct ExcerptRequest {
    pub interval: RewindInterval,
    pub requested_start_time: Option<DateTime<Utc>>,
    pub requested_end_time: Option<DateTime<Utc>>,
    pub audio_spec: String,
    pub video_spec: String,
}

/// Controls for the post-download phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProduceOptions {
    /// Skip muxing entirely; return the raw downloaded paths.
    pub no_merge: bool,
    /// Delete the boundary-mux/concat intermediates regardless of success.
    pub cleanup: bool,
}

/// The outcome of [`produce`]. A muxer failure after a successful download
/// phase is captured in `error` rather than propagated, so a caller can
/// still inspect the downloaded segments.
#[derive(Debug, Default)]
pub struct ExcerptResult {
    pub merged_path: Option<PathBuf>,
    pub audio_paths: Vec<PathBuf>,
    pub video_paths: Vec<PathBuf>,
    pub error: Option<RewindError>,
}

/// Downloads every segment in `request.interval` for the audio and/or video
/// representation it selects, reporting progress to `progress`, then
/// (unless `options.no_merge`) muxes and trims the range into a single
/// artifact in `scratch_dir` using the `ffmpeg_path` subprocess.
#[tracing::instrument(level = "info", skip(session, store, catalog, progress, cancel, config))]
pub async fn produce(
    session: &StreamSession,
    store: &SegmentStore,
    catalog: &Catalog,
    request: &ExcerptRequest,
    options: ProduceOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
    ffmpeg_path: &str,
    config: &RewindConfig,
) -> Result<ExcerptResult> {
    let audio_repr = resolve_optional(catalog, &request.audio_spec)?;
    let video_repr = resolve_optional(catalog, &request.video_spec)?;
    if audio_repr.is_none() && video_repr.is_none() {
        return Err(RewindError::EmptyFormatSpec("neither an audio nor a video representation was selected".into()));
    }

    let mut audio_paths = Vec::new();
    let mut video_paths = Vec::new();

    for sequence in request.interval.start..=request.interval.end {
        cancel.check()?;
        if let Some(repr) = &audio_repr {
            progress.segment_started(sequence, "audio");
            let path = fetch_with_retry(session, store, sequence, &repr.base_url, config.max_segment_fetch_retries).await?;
            audio_paths.push(path);
            progress.segment_finished(sequence, "audio");
        }
        if let Some(repr) = &video_repr {
            progress.segment_started(sequence, "video");
            let path = fetch_with_retry(session, store, sequence, &repr.base_url, config.max_segment_fetch_retries).await?;
            video_paths.push(path);
            progress.segment_finished(sequence, "video");
        }
    }
    progress.finalize();

    if options.no_merge {
        return Ok(ExcerptResult { merged_path: None, audio_paths, video_paths, error: None });
    }

    match mux_excerpt(request, &audio_repr, &video_repr, &audio_paths, &video_paths, store.scratch_dir(), ffmpeg_path, options.cleanup, cancel).await {
        Ok(path) => Ok(ExcerptResult { merged_path: Some(path), audio_paths, video_paths, error: None }),
        Err(e) => Ok(ExcerptResult { merged_path: None, audio_paths, video_paths, error: Some(e) }),
    }
}

fn resolve_optional(catalog: &Catalog, spec: &str) -> Result<Option<Representation>> {
    if spec.trim().is_empty() || spec.trim() == "none" {
        return Ok(None);
    }
    resolve_single(catalog, spec).map(Some)
}

/// Retries a single segment fetch up to `max_retries` times on failure.
/// `StreamSession` already handles 403-refresh internally; this covers
/// transient failures (timeouts, resets) that survive that layer.
async fn fetch_with_retry(
    session: &StreamSession,
    store: &SegmentStore,
    sequence: i64,
    base_url: &str,
    max_retries: usize,
) -> Result<PathBuf> {
    let mut attempt = 0;
    loop {
        match store.fetch(session, sequence, base_url, FetchOptions::default()).await {
            Ok(path) => return Ok(path),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                tracing::debug!(sequence, attempt, error = %e, "retrying segment fetch");
            }
            Err(e) => return Err(e),
        }
    }
}

/// `max(0, requested - actual_start)` in milliseconds.
/// `requested = None` (the caller supplied a bare sequence, not a time)
/// means no trimming is needed at that boundary.
pub fn compute_cut_start_ms(requested: Option<DateTime<Utc>>, actual_start: DateTime<Utc>) -> i64 {
    match requested {
        Some(r) => (r - actual_start).num_milliseconds().max(0),
        None => 0,
    }
}

/// `max(0, actual_end - requested)` in milliseconds.
pub fn compute_cut_end_ms(requested: Option<DateTime<Utc>>, actual_end: DateTime<Utc>) -> i64 {
    match requested {
        Some(r) => (actual_end - r).num_milliseconds().max(0),
        None => 0,
    }
}

/// Index range (into the per-sequence path vectors) of the segments that
/// get concatenated-by-copy rather than cut: everything except the first
/// and last. Empty when there are fewer than 3 segments.
fn middle_indices(n: usize) -> Range<usize> {
    if n <= 2 {
        0..0
    } else {
        1..(n - 1)
    }
}

fn boundary_segment(audio_paths: &[PathBuf], video_paths: &[PathBuf], start: bool) -> Result<Segment> {
    let path = if start {
        video_paths.first().or_else(|| audio_paths.first())
    } else {
        video_paths.last().or_else(|| audio_paths.last())
    };
    let path = path.ok_or_else(|| RewindError::Muxer {
        stage: "locate boundary segment".to_string(),
        stderr: "no segments were downloaded".to_string(),
    })?;
    Segment::from_file(path)
}

async fn build_parts(
    ffmpeg_path: &str,
    audio_paths: &[PathBuf],
    video_paths: &[PathBuf],
    scratch_dir: &Path,
    cut_start_ms: i64,
    cut_end_ms: i64,
    cancel: &CancelToken,
) -> Result<Vec<PathBuf>> {
    let n = audio_paths.len().max(video_paths.len());
    let audio_at = |i: usize| audio_paths.get(i).map(|p| p.as_path());
    let video_at = |i: usize| video_paths.get(i).map(|p| p.as_path());

    if n == 0 {
        return Err(RewindError::Muxer {
            stage: "plan boundary segments".to_string(),
            stderr: "no segments were downloaded".to_string(),
        });
    }

    let mut parts = Vec::new();

    if n == 1 {
        let out = scratch_dir.join("part_single.mkv");
        muxer::mux_and_cut_boundary_segment(ffmpeg_path, audio_at(0), video_at(0), &out, Cut::Start(cut_start_ms)).await?;
        parts.push(out);
        return Ok(parts);
    }

    cancel.check()?;
    let first = scratch_dir.join("part_first.mkv");
    muxer::mux_and_cut_boundary_segment(ffmpeg_path, audio_at(0), video_at(0), &first, Cut::Start(cut_start_ms)).await?;
    parts.push(first);

    let middle = middle_indices(n);
    if !middle.is_empty() {
        cancel.check()?;
        let middle_audio: Vec<PathBuf> = audio_paths.get(middle.clone()).map(|s| s.to_vec()).unwrap_or_default();
        let middle_video: Vec<PathBuf> = video_paths.get(middle).map(|s| s.to_vec()).unwrap_or_default();
        let middle_out = scratch_dir.join("part_middle.mkv");
        muxer::concat_audio_and_video_streams(ffmpeg_path, scratch_dir, &middle_audio, &middle_video, &middle_out).await?;
        parts.push(middle_out);
    }

    cancel.check()?;
    let last = scratch_dir.join("part_last.mkv");
    muxer::mux_and_cut_boundary_segment(ffmpeg_path, audio_at(n - 1), video_at(n - 1), &last, Cut::End(cut_end_ms)).await?;
    parts.push(last);

    Ok(parts)
}

fn final_extension(audio_repr: &Option<Representation>, video_repr: &Option<Representation>) -> String {
    match (audio_repr, video_repr) {
        (Some(_), Some(_)) => "mkv".to_string(),
        (None, Some(v)) => v.format().to_string(),
        (Some(a), None) => a.format().to_string(),
        (None, None) => "mkv".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn mux_excerpt(
    request: &ExcerptRequest,
    audio_repr: &Option<Representation>,
    video_repr: &Option<Representation>,
    audio_paths: &[PathBuf],
    video_paths: &[PathBuf],
    scratch_dir: &Path,
    ffmpeg_path: &str,
    cleanup: bool,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    cancel.check()?;
    let actual_start = boundary_segment(audio_paths, video_paths, true)?.ingestion_start_date();
    let last = boundary_segment(audio_paths, video_paths, false)?;
    let actual_end = last.ingestion_end_date()?;

    let cut_start_ms = compute_cut_start_ms(request.requested_start_time, actual_start);
    let cut_end_ms = compute_cut_end_ms(request.requested_end_time, actual_end);

    let parts = build_parts(ffmpeg_path, audio_paths, video_paths, scratch_dir, cut_start_ms, cut_end_ms, cancel).await?;

    cancel.check()?;
    let output = scratch_dir.join(format!("excerpt.{}", final_extension(audio_repr, video_repr)));
    muxer::concat_parts(ffmpeg_path, scratch_dir, &parts, &output).await?;

    if cleanup {
        for part in &parts {
            let _ = fs::remove_file(part);
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representation::{AudioAttributes, Media, VideoAttributes};

    fn sample_catalog() -> Catalog {
        Catalog::new(vec![
            Representation {
                itag: "140".into(),
                mime_type: "audio/mp4".into(),
                codecs: "mp4a.40.2".into(),
                base_url: "https://example.test/itag/140/mime/audio%2Fmp4/dur/2/expire/9999999999/".into(),
                media: Media::Audio(AudioAttributes { audio_sampling_rate: 44100 }),
            },
            Representation {
                itag: "137".into(),
                mime_type: "video/mp4".into(),
                codecs: "avc1.640028".into(),
                base_url: "https://example.test/itag/137/mime/video%2Fmp4/dur/2/expire/9999999999/".into(),
                media: Media::Video(VideoAttributes { width: 1920, height: 1080, frame_rate: 30.0 }),
            },
            Representation {
                itag: "299".into(),
                mime_type: "video/mp4".into(),
                codecs: "avc1.640028".into(),
                base_url: "https://example.test/itag/299/mime/video%2Fmp4/dur/2/expire/9999999999/".into(),
                media: Media::Video(VideoAttributes { width: 1920, height: 1080, frame_rate: 60.0 }),
            },
        ])
    }

    #[test]
    fn resolve_single_matching_spec_succeeds() {
        let catalog = sample_catalog();
        let repr = resolve_single(&catalog, "itag = 140").unwrap();
        assert_eq!(repr.itag, "140");
    }

    #[test]
    fn resolve_single_ambiguous_spec_fails() {
        let catalog = sample_catalog();
        let err = resolve_single(&catalog, "type = video").unwrap_err();
        assert!(matches!(err, RewindError::AmbiguousFormatSpec(_)));
    }

    #[test]
    fn resolve_single_empty_spec_fails() {
        let catalog = sample_catalog();
        let err = resolve_single(&catalog, "itag = 999").unwrap_err();
        assert!(matches!(err, RewindError::EmptyFormatSpec(_)));
    }

    #[test]
    fn resolve_optional_treats_none_keyword_as_absent() {
        let catalog = sample_catalog();
        assert!(resolve_optional(&catalog, "none").unwrap().is_none());
        assert!(resolve_optional(&catalog, "").unwrap().is_none());
    }

    #[test]
    fn middle_indices_empty_below_three_segments() {
        assert_eq!(middle_indices(0), 0..0);
        assert_eq!(middle_indices(1), 0..0);
        assert_eq!(middle_indices(2), 0..0);
    }

    #[test]
    fn middle_indices_excludes_first_and_last() {
        assert_eq!(middle_indices(5), 1..4);
    }

    #[test]
    fn cut_start_is_zero_when_endpoint_was_a_bare_sequence() {
        let actual = crate::segment::seconds_to_datetime(1679787234.491);
        assert_eq!(compute_cut_start_ms(None, actual), 0);
    }

    #[test]
    fn cut_start_is_clamped_to_zero_when_requested_precedes_actual() {
        let actual = crate::segment::seconds_to_datetime(1679787234.491);
        let requested = crate::segment::seconds_to_datetime(1679787230.0);
        assert_eq!(compute_cut_start_ms(Some(requested), actual), 0);
    }

    #[test]
    fn cut_start_reflects_sub_segment_offset() {
        let actual = crate::segment::seconds_to_datetime(1679787234.0);
        let requested = crate::segment::seconds_to_datetime(1679787234.5);
        assert_eq!(compute_cut_start_ms(Some(requested), actual), 500);
    }

    #[test]
    fn cut_end_reflects_sub_segment_offset() {
        let actual_end = crate::segment::seconds_to_datetime(1679787236.0);
        let requested = crate::segment::seconds_to_datetime(1679787235.7);
        assert_eq!(compute_cut_end_ms(Some(requested), actual_end), 300);
    }

    #[test]
    fn final_extension_is_mkv_when_both_streams_present() {
        let audio = Some(Representation {
            itag: "140".into(),
            mime_type: "audio/mp4".into(),
            codecs: "mp4a.40.2".into(),
            base_url: "https://example.test/140/".into(),
            media: Media::Audio(AudioAttributes { audio_sampling_rate: 44100 }),
        });
        let video = Some(Representation {
            itag: "137".into(),
            mime_type: "video/webm".into(),
            codecs: "vp9".into(),
            base_url: "https://example.test/137/".into(),
            media: Media::Video(VideoAttributes { width: 1920, height: 1080, frame_rate: 30.0 }),
        });
        assert_eq!(final_extension(&audio, &video), "mkv");
        assert_eq!(final_extension(&None, &video), "webm");
        assert_eq!(final_extension(&audio, &None), "mp4");
    }

    #[test]
    fn cancel_token_check_fails_once_cancelled() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check().unwrap_err(), RewindError::Cancelled));
    }
}
