// Integration test for StreamSession's 403-triggered base-URL refresh and
// retry, against a mock origin that serves on a /videoplayback/ path shape.
//
// What happens in this test:
//
//   - `refresh_recovers_after_one_403`: the mock origin returns 403 for the
//     original (expired) base URL and 200 for a second ("refreshed") base
//     URL. We check that exactly one refresh happens and the retried
//     request succeeds.
//
//   - `max_refresh_retries_is_enforced`: the mock origin always returns 403.
//     We check that the session gives up after `max_refresh_retries` and
//     surfaces `MaxRetryError`.

pub mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::setup_logging;
use rewind_dvr::error::RewindError;
use rewind_dvr::session::{callback, StreamSession};
use rewind_dvr::RewindConfig;

async fn start_mock(app: Router) -> Result<(std::net::SocketAddr, axum_server::Handle)> {
    let server_handle = axum_server::Handle::new();
    let backend_handle = server_handle.clone();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("binding mock origin")?;
    let bound_addr = listener.local_addr()?;
    let backend = async move {
        axum_server::from_tcp(listener)
            .unwrap()
            .handle(backend_handle)
            .serve(app.into_make_service())
            .await
            .unwrap()
    };
    tokio::spawn(backend);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok((bound_addr, server_handle))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_recovers_after_one_403() -> Result<()> {
    setup_logging();

    let old_hits = Arc::new(AtomicUsize::new(0));
    let old_hits_in_handler = old_hits.clone();

    let send_expired = move |Path(_sequence): Path<i64>| {
        let old_hits = old_hits_in_handler.clone();
        async move {
            old_hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::FORBIDDEN
        }
    };

    async fn send_fresh(Path(_sequence): Path<i64>) -> impl IntoResponse {
        (StatusCode::OK, common::sample_segment_body(0))
    }

    let app = Router::new()
        .route("/videoplayback/itag/140/v1/sq/{sequence}", get(send_expired))
        .route("/videoplayback/itag/140/v2/sq/{sequence}", get(send_fresh));

    let (bound_addr, server_handle) = start_mock(app).await?;

    let old_base_url = format!("http://{bound_addr}/videoplayback/itag/140/v1");
    let new_base_url = format!("http://{bound_addr}/videoplayback/itag/140/v2");

    let refresh_count = Arc::new(AtomicUsize::new(0));
    let refresh_count_for_callback = refresh_count.clone();
    let new_base_url_for_callback = new_base_url.clone();
    let session = StreamSession::new(
        &RewindConfig::default(),
        callback(move |_expired_base_url: &str| {
            refresh_count_for_callback.fetch_add(1, Ordering::SeqCst);
            let new_base_url = new_base_url_for_callback.clone();
            async move { Ok(new_base_url) }
        }),
    )?;

    let body = session.get(&format!("{old_base_url}/sq/0")).await?;
    assert_eq!(body.as_ref(), common::sample_segment_body(0).as_slice());
    assert_eq!(old_hits.load(Ordering::SeqCst), 1, "the expired base URL should be hit exactly once");
    assert_eq!(refresh_count.load(Ordering::SeqCst), 1, "exactly one refresh should have occurred");

    server_handle.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn max_refresh_retries_is_enforced() -> Result<()> {
    setup_logging();

    async fn always_expired(Path(_sequence): Path<i64>) -> impl IntoResponse {
        StatusCode::FORBIDDEN
    }

    let app = Router::new().route("/videoplayback/itag/140/sq/{sequence}", get(always_expired));
    let (bound_addr, server_handle) = start_mock(app).await?;

    let base_url = format!("http://{bound_addr}/videoplayback/itag/140");
    let refresh_count = Arc::new(AtomicUsize::new(0));
    let refresh_count_for_callback = refresh_count.clone();
    let base_url_for_callback = base_url.clone();
    let session = StreamSession::new(
        &RewindConfig::default(),
        callback(move |_expired_base_url: &str| {
            refresh_count_for_callback.fetch_add(1, Ordering::SeqCst);
            let base_url = base_url_for_callback.clone();
            async move { Ok(base_url) }
        }),
    )?;

    let err = session.get(&format!("{base_url}/sq/0")).await.unwrap_err();
    assert!(matches!(err, RewindError::MaxRetry { status: 403 }), "expected MaxRetryError, got {err:?}");
    assert_eq!(
        refresh_count.load(Ordering::SeqCst),
        RewindConfig::default().max_refresh_retries as usize,
        "refresh should be attempted exactly max_refresh_retries times before giving up"
    );

    server_handle.shutdown();
    Ok(())
}
