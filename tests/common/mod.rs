//! Shared helpers for the integration tests.

use std::sync::Once;

use lazy_static::lazy_static;

lazy_static! {
    static ref TRACING_INIT: Once = Once::new();
}

pub fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    TRACING_INIT.call_once(|| {
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info,reqwest=warn,hyper=warn,h2=warn"))
            .expect("initializing logging");
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().compact().with_target(false))
            .init();
    });
}

/// A minimal, well-formed segment body: the textual metadata header
/// required by every segment, padded to the size callers assume covers it.
pub fn sample_segment_body(sequence: i64) -> Vec<u8> {
    let header = format!(
        "Sequence-Number: {sequence}\r\n\
         Ingestion-Walltime-Us: 1679329555339525\r\n\
         Ingestion-Uncertainty-Us: 85\r\n\
         Target-Duration-Us: 5000000\r\n\
         First-Frame-Time-Us: 1679329560650712\r\n\
         First-Frame-Uncertainty-Us: 87\r\n"
    );
    let mut body = header.into_bytes();
    body.extend(std::iter::repeat(b'\0').take(64));
    body
}
