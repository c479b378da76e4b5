//! Crate-wide configuration. This is constructed programmatically by the
//! embedding application — there is no TOML/file loading here, that remains
//! a peripheral concern (see the crate's top-level docs).

use std::time::Duration;

/// Fixed synthetic User-Agent sent with every request; see [`crate::session`].
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Tunables shared across the components that perform network I/O.
#[derive(Debug, Clone)]
pub struct RewindConfig {
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Maximum retries for a 403-triggered base-URL refresh.
    pub max_refresh_retries: u32,
    /// Maximum retries for a transient (network/5xx) segment download
    /// failure, applied around [`crate::store::SegmentStore::fetch`].
    pub max_segment_fetch_retries: usize,
    /// Nominal duration synthesized for preview-mode excerpts that have no
    /// caller-supplied end endpoint.
    pub preview_duration: Duration,
    /// The documented DVR retention window, used to resolve the `earliest`
    /// keyword.
    pub dvr_window: Duration,
    /// Bytes of segment prefix requested when only metadata is needed.
    pub partial_segment_probe_size: u64,
    pub user_agent: String,
}

impl Default for RewindConfig {
    fn default() -> RewindConfig {
        RewindConfig {
            request_timeout: Duration::from_secs(30),
            max_refresh_retries: 3,
            max_segment_fetch_retries: 3,
            preview_duration: Duration::from_secs(10),
            dvr_window: Duration::from_secs(7 * 24 * 3600),
            partial_segment_probe_size: crate::metadata::PARTIAL_SEGMENT_SIZE_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = RewindConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_refresh_retries, 3);
        assert_eq!(config.dvr_window, Duration::from_secs(604_800));
        assert_eq!(config.partial_segment_probe_size, 2000);
    }
}
