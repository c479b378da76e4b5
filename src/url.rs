//! Stream identifier normalization and base-URL parameter extraction.
//!
//! Base URLs served by the origin encode several parameters positionally in
//! the URL path (`/itag/137/mime/video%2Fmp4/dur/2/expire/1700000000/...`);
//! [`extract_parameter_from_url`] reads them by name rather than by a fixed
//! offset, since the ordering of segments is not itself part of the
//! contract.

use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::error::{RewindError, Result};

lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[\w-]{11}$").unwrap();
    static ref WATCH_URL_RE: Regex =
        Regex::new(r"^https://(?:www\.youtube\.com/watch\?v=|youtu\.be/)([\w-]{11})(?:[^\w-]|$)").unwrap();
}

/// Normalizes a bare video ID or a full watch/short URL into a canonical
/// watch URL.
pub fn normalize_video_url(video_url_or_id: &str) -> Result<String> {
    if VIDEO_ID_RE.is_match(video_url_or_id) {
        return Ok(build_video_url_with_id(video_url_or_id));
    }
    if let Some(c) = WATCH_URL_RE.captures(video_url_or_id) {
        return Ok(build_video_url_with_id(&c[1]));
    }
    Err(RewindError::BadStreamIdentifier(video_url_or_id.to_string()))
}

pub fn build_video_url_with_id(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Extracts a named positional parameter from a base URL's path, e.g.
/// `extract_parameter_from_url("itag", url)` on a path containing
/// `/itag/137/...` returns `"137"`.
pub fn extract_parameter_from_url(parameter: &str, url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| RewindError::BadStreamIdentifier(e.to_string()))?;
    let parts: Vec<&str> = parsed.path().split('/').collect();
    let idx = parts
        .iter()
        .position(|p| *p == parameter)
        .ok_or_else(|| RewindError::Protocol(format!("parameter '{parameter}' is not in URL")))?;
    parts
        .get(idx + 1)
        .map(|s| s.to_string())
        .ok_or_else(|| RewindError::Protocol(format!("value of '{parameter}' is not in URL")))
}

/// Extracts and decodes the `(type, subtype)` MIME pair from a base URL's
/// `mime` path parameter (percent-encoded as `video%2Fmp4`).
pub fn extract_media_type_from_url(url: &str) -> Result<(String, String)> {
    let raw = extract_parameter_from_url("mime", url)?;
    let decoded = raw.replace("%2F", "/").replace("%2f", "/");
    decoded
        .split_once('/')
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .ok_or_else(|| RewindError::Protocol(format!("malformed mime parameter '{raw}' in URL")))
}

pub fn extract_id_from_base_url(base_url: &str) -> Result<String> {
    let id = extract_parameter_from_url("id", base_url)?;
    Ok(id.chars().take(11).collect())
}

/// Builds the URL for a specific segment sequence number by appending the
/// `sq/<n>` path segment to a representation's base URL.
pub fn build_segment_url(base_url: &str, sequence: i64) -> String {
    format!("{}/sq/{}", base_url.trim_end_matches('/'), sequence)
}

/// Whether a base URL's `expire` parameter is at or past the current wall
/// clock.
pub fn check_base_url_is_expired(base_url: &str) -> Result<bool> {
    let expires_at: u64 = extract_parameter_from_url("expire", base_url)?
        .parse()
        .map_err(|_| RewindError::Protocol("non-numeric expire parameter".to_string()))?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Ok(now >= expires_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_video_id() {
        let url = normalize_video_url("dQw4w9WgXcQ").unwrap();
        assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn normalizes_watch_url() {
        let url = normalize_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn normalizes_short_url() {
        let url = normalize_video_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn rejects_garbage_identifier() {
        assert!(normalize_video_url("not a valid id").is_err());
    }

    #[test]
    fn extracts_itag_and_mime_from_base_url() {
        let base = "https://example.test/videoplayback/itag/137/mime/video%2Fmp4/dur/2/expire/9999999999/id/dQw4w9WgXcQ.1/";
        assert_eq!(extract_parameter_from_url("itag", base).unwrap(), "137");
        assert_eq!(
            extract_media_type_from_url(base).unwrap(),
            ("video".to_string(), "mp4".to_string())
        );
        assert_eq!(extract_id_from_base_url(base).unwrap(), "dQw4w9WgXcQ");
    }

    #[test]
    fn builds_segment_url_trimming_trailing_slash() {
        let base = "https://example.test/videoplayback/itag/137/";
        assert_eq!(build_segment_url(base, 42), "https://example.test/videoplayback/itag/137/sq/42");
    }

    #[test]
    fn expired_base_url_detected() {
        let base = "https://example.test/itag/137/expire/0/";
        assert!(check_base_url_is_expired(base).unwrap());
    }

    #[test]
    fn not_yet_expired_base_url() {
        let base = "https://example.test/itag/137/expire/4102444800/";
        assert!(!check_base_url_is_expired(base).unwrap());
    }
}
