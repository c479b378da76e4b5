// Integration test for SequenceLocator against a mock origin that behaves
// like a constant-cadence live stream: segment `n`'s ingestion walltime is
// exactly `n * dur` seconds after a fixed epoch, and HEAD on the base URL
// reports the current head sequence number.

pub mod common;

use anyhow::{Context, Result};
use axum::extract::Path;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, head};
use axum::Router;
use chrono::{TimeZone, Utc};
use common::setup_logging;
use rewind_dvr::error::RewindError;
use rewind_dvr::interval::{IntervalResolver, PointInStream};
use rewind_dvr::locator::SequenceLocator;
use rewind_dvr::session::{callback, StreamSession};
use rewind_dvr::store::SegmentStore;

const EPOCH_US: i64 = 1_700_000_000_000_000;
const DUR_SECS: i64 = 5;
const HEAD_SEQUENCE: i64 = 1000;

struct Origin;

impl Origin {
    fn segment_body(sequence: i64) -> Vec<u8> {
        let walltime_us = EPOCH_US + sequence * DUR_SECS * 1_000_000;
        format!(
            "Sequence-Number: {sequence}\r\n\
             Ingestion-Walltime-Us: {walltime_us}\r\n\
             Ingestion-Uncertainty-Us: 0\r\n\
             Target-Duration-Us: {dur_us}\r\n\
             First-Frame-Time-Us: {walltime_us}\r\n\
             First-Frame-Uncertainty-Us: 0\r\n",
            dur_us = DUR_SECS * 1_000_000,
        )
        .into_bytes()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn locates_sequence_for_past_timestamp() -> Result<()> {
    setup_logging();

    async fn send_head() -> impl IntoResponse {
        ([(header::HeaderName::from_static("x-head-seqnum"), HEAD_SEQUENCE.to_string())], "")
    }

    async fn send_segment(Path(sequence): Path<i64>) -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "video/mp4")], Origin::segment_body(sequence))
    }

    let base_path = "/itag/137/mime/video%2Fmp4/dur/5/expire/9999999999";
    let app = Router::new()
        .route(base_path, head(send_head))
        .route(&format!("{base_path}/sq/{{sequence}}"), get(send_segment));

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

    let base_url = format!("http://{bound_addr}{base_path}");
    let session = StreamSession::new(
        &rewind_dvr::RewindConfig::default(),
        callback(|_base_url: &str| async move {
            Err::<String, RewindError>(RewindError::Protocol("refresh should not be called".to_string()))
        }),
    )?;
    let scratch = tempfile::tempdir().context("creating scratch dir")?;
    let store = SegmentStore::new(scratch.path());

    let locator = SequenceLocator::new(&session, &store, &base_url, None).await?;

    // 100 segments (500s) before the head cursor.
    let target = Utc
        .timestamp_opt((EPOCH_US + (HEAD_SEQUENCE - 100) * DUR_SECS * 1_000_000) / 1_000_000, 0)
        .unwrap();
    let found = locator.find(target, false).await?;
    assert_eq!(found, HEAD_SEQUENCE - 100);

    server_handle.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preview_mode_substitutes_a_concrete_end() -> Result<()> {
    setup_logging();

    async fn send_head() -> impl IntoResponse {
        ([(header::HeaderName::from_static("x-head-seqnum"), HEAD_SEQUENCE.to_string())], "")
    }

    async fn send_segment(Path(sequence): Path<i64>) -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "video/mp4")], Origin::segment_body(sequence))
    }

    let base_path = "/itag/137/mime/video%2Fmp4/dur/5/expire/9999999999";
    let app = Router::new()
        .route(base_path, head(send_head))
        .route(&format!("{base_path}/sq/{{sequence}}"), get(send_segment));

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

    let base_url = format!("http://{bound_addr}{base_path}");
    let session = StreamSession::new(
        &rewind_dvr::RewindConfig::default(),
        callback(|_base_url: &str| async move {
            Err::<String, RewindError>(RewindError::Protocol("refresh should not be called".to_string()))
        }),
    )?;
    let scratch = tempfile::tempdir().context("creating scratch dir")?;
    let store = SegmentStore::new(scratch.path());

    // 100 segments (500s) before the head cursor.
    let target = Utc
        .timestamp_opt((EPOCH_US + (HEAD_SEQUENCE - 100) * DUR_SECS * 1_000_000) / 1_000_000, 0)
        .unwrap();

    let resolver = IntervalResolver::new(&session, &store, &base_url);
    let interval = resolver
        .resolve_preview(PointInStream::AbsoluteDate(target), std::time::Duration::from_secs(12))
        .await?;

    assert_eq!(interval.start, HEAD_SEQUENCE - 100);
    // floor(12 / 5) == 2
    assert_eq!(interval.end, HEAD_SEQUENCE - 100 + 2);

    server_handle.shutdown();
    Ok(())
}
