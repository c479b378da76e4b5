//! SegmentStore: downloads segments to a scratch directory with a
//! canonical, content-addressed filename, and serves cache hits without
//! network I/O.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use fs_err as fs;
use tracing::debug;

use crate::error::{RewindError, Result};
use crate::session::StreamSession;
use crate::url::{build_segment_url, extract_media_type_from_url, extract_parameter_from_url};

/// Returns the portion of `url` up to (not including) the `/sq/` path
/// segment, i.e. the representation's base URL a segment URL was built
/// from.
pub(crate) fn base_url_prefix(segment_url: &str) -> &str {
    match segment_url.find("/sq/") {
        Some(idx) => &segment_url[..idx],
        None => segment_url,
    }
}

/// Options controlling a single fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// When set, only the first `size` bytes are requested.
    pub size: Option<u64>,
    /// Bypass the on-disk cache hit and always perform the network request.
    pub force: bool,
}

/// Downloads segments into `scratch_dir`, naming them canonically so
/// concurrent fetches for the same (sequence, itag) converge on one file.
pub struct SegmentStore {
    scratch_dir: PathBuf,
}

impl SegmentStore {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> SegmentStore {
        SegmentStore { scratch_dir: scratch_dir.into() }
    }

    /// Canonical on-disk name: `{sequence}.i{itag}.{ext}`, where `itag` and
    /// `ext` (the MIME subtype) are read from `base_url`'s positional
    /// parameters.
    pub fn canonical_filename(&self, sequence: i64, base_url: &str) -> Result<String> {
        let itag = extract_parameter_from_url("itag", base_url)?;
        let (_, ext) = extract_media_type_from_url(base_url)?;
        Ok(format!("{sequence}.i{itag}.{ext}"))
    }

    pub fn canonical_path(&self, sequence: i64, base_url: &str) -> Result<PathBuf> {
        Ok(self.scratch_dir.join(self.canonical_filename(sequence, base_url)?))
    }

    /// Downloads `base_url/sq/{sequence}` into the scratch directory,
    /// returning its path. A pre-existing file with the canonical name is
    /// returned unread unless `force` is set.
    #[tracing::instrument(level = "debug", skip(self, session))]
    pub async fn fetch(
        &self,
        session: &StreamSession,
        sequence: i64,
        base_url: &str,
        options: FetchOptions,
    ) -> Result<PathBuf> {
        let path = self.canonical_path(sequence, base_url)?;
        if !options.force && path.exists() {
            debug!(?path, "cache hit, skipping network fetch");
            return Ok(path);
        }

        let bytes = self.fetch_to_buffer(session, sequence, base_url, options).await?;

        fs::create_dir_all(&self.scratch_dir).map_err(|e| RewindError::io(e, &self.scratch_dir))?;
        let tmp_path = path.with_extension("part");
        fs::write(&tmp_path, &bytes).map_err(|e| RewindError::io(e, &tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(|e| RewindError::io(e, &path))?;
        Ok(path)
    }

    /// Same as [`Self::fetch`] but returns the payload in memory without
    /// touching disk (`force`/cache-hit logic does not apply here: callers
    /// that want a disk cache hit should call [`Self::fetch`]).
    #[tracing::instrument(level = "debug", skip(self, session))]
    pub async fn fetch_to_buffer(
        &self,
        session: &StreamSession,
        sequence: i64,
        base_url: &str,
        options: FetchOptions,
    ) -> Result<Bytes> {
        let url = build_segment_url(base_url, sequence);
        session
            .get_with_range(&url, options.size)
            .await
            .map_err(|e| RewindError::SegmentDownload { sequence, reason: e.to_string() })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}
