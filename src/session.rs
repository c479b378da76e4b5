//! StreamSession: an HTTP client wrapper that detects upstream base-URL
//! expiry (a 403 on a segment URL), refreshes the catalog, rewrites the
//! in-flight request, and retries.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::config::RewindConfig;
use crate::error::{RewindError, Result};

lazy_static! {
    static ref SEGMENT_URL_PATTERN: Regex = Regex::new(r"/videoplayback/").unwrap();
}

/// Refreshes the catalog and returns the new base URL for `itag`, given the
/// base URL that just failed with 403. Supplied by the caller (typically the
/// playback session that owns the catalog); expected to be idempotent.
pub type RefreshCallback =
    Arc<dyn Fn(&str) -> futures_util::future::BoxFuture<'static, Result<String>> + Send + Sync>;

/// An HTTP client bound to a particular stream's 403-refresh policy.
#[derive(Clone)]
pub struct StreamSession {
    client: reqwest::Client,
    refresh: RefreshCallback,
    max_retries: u32,
}

impl StreamSession {
    pub fn new(config: &RewindConfig, refresh: RefreshCallback) -> Result<StreamSession> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()?;
        Ok(StreamSession { client, refresh, max_retries: config.max_refresh_retries })
    }

    /// GETs `url`, transparently handling 403-on-segment-URL by refreshing
    /// and retrying up to `config.max_refresh_retries` times.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Result<Bytes> {
        self.get_with_range(url, None).await
    }

    /// Same as [`Self::get`] but sends a `Range: bytes=0-{size-1}` header
    /// when `size` is given. Servers that ignore the header and return the
    /// full body are tolerated silently.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_with_range(&self, url: &str, size: Option<u64>) -> Result<Bytes> {
        let retries = AtomicU32::new(0);
        let mut current_url = url.to_string();

        loop {
            let mut builder = self.client.get(&current_url);
            if let Some(size) = size {
                builder = builder.header("Range", format!("bytes=0-{}", size.saturating_sub(1)));
            }
            let response = builder.send().await?;

            if response.status() == StatusCode::FORBIDDEN && SEGMENT_URL_PATTERN.is_match(&current_url) {
                let count = retries.fetch_add(1, Ordering::SeqCst);
                if count >= self.max_retries {
                    return Err(RewindError::MaxRetry { status: 403 });
                }
                debug!(url = %current_url, attempt = count + 1, "received 403 for segment url, refreshing base url");
                current_url = self.rewrite_after_refresh(&current_url).await?;
                continue;
            }

            return finish(response, &current_url).await;
        }
    }

    async fn rewrite_after_refresh(&self, url: &str) -> Result<String> {
        let old_base_url = crate::store::base_url_prefix(url);
        let new_base_url = (self.refresh)(old_base_url).await?;
        Ok(url.replacen(old_base_url, &new_base_url, 1))
    }

    /// `HEAD`s `base_url` and returns the upstream's `X-Head-Seqnum` cursor,
    /// used to resolve the `now` and `earliest` keywords.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn request_reference_sequence(&self, base_url: &str) -> Result<i64> {
        let response = self.client.head(base_url).send().await?;
        let header = response
            .headers()
            .get("X-Head-Seqnum")
            .ok_or_else(|| RewindError::Protocol("'X-Head-Seqnum' header value is missing".to_string()))?;
        header
            .to_str()
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| RewindError::Protocol("'X-Head-Seqnum' header value is malformed".to_string()))
    }
}

async fn finish(response: Response, url: &str) -> Result<Bytes> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(RewindError::Network(format!("{status} for {url}")));
    }
    Ok(response.bytes().await?)
}

/// Wraps a plain async closure as a [`RefreshCallback`].
pub fn callback<F, Fut>(f: F) -> RefreshCallback
where
    F: Fn(&str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move |base_url: &str| {
        let fut = f(base_url);
        Box::pin(fut)
    })
}
