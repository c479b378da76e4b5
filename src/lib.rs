//! Random-access playback (rewind) of segmented live video streams served as
//! a sliding DVR window.
//!
//! The upstream publishes a monotonically numbered sequence of media
//! segments (audio-only and video-only), each carrying ingestion
//! timestamps in a textual header. Given a user-specified moment or
//! interval — expressed in wall-clock time, segment numbers, durations, or
//! relative offsets — this crate determines which segments cover that
//! interval, downloads exactly those segments, then either returns them
//! as-is, or muxes and trims them into a single playable excerpt, or
//! packages the located range as a static manifest for an external player.
//!
//! ## Module map
//!
//! - [`metadata`] parses the textual segment metadata header.
//! - [`segment`] is the `Segment` data type and its actual-duration probe.
//! - [`store`] downloads segments to a scratch directory with a canonical,
//!   content-addressed filename.
//! - [`session`] is the HTTP client wrapper that detects upstream base-URL
//!   expiry and transparently refreshes and retries.
//! - [`representation`] and [`catalog`] are the stream's set of audio/video
//!   representations, indexed by itag.
//! - [`query`] is the textual expression language used to select a
//!   representation (`best`, `@1080p60`, `[type = video] | best`, ...).
//! - [`locator`] finds the sequence number whose media covers a given
//!   wall-clock instant.
//! - [`interval`] normalizes a heterogeneous pair of endpoint
//!   specifications into a concrete sequence range.
//! - [`producer`] downloads a resolved range and (optionally) invokes an
//!   external muxer to produce a single trimmed artifact; [`muxer`] is that
//!   collaborator.
//! - [`manifest`] emits a static manifest describing a located interval,
//!   for consumption by an external player.
//! - [`url`] handles stream-identifier normalization and base-URL parameter
//!   extraction.
//! - [`cache`] is the on-disk hint cache for previously extracted catalogs.
//! - [`config`] holds the tunables shared by the network-facing components.
//!
//! ## Non-goals
//!
//! Decoding media, real-time playback, video analytics, authenticating
//! with the upstream, scheduling or concurrency across multiple distinct
//! streams, and persistence of state beyond the on-disk cache (an opaque
//! hint, never load-bearing for correctness) are all out of scope. Argument
//! parsing, output-filename templating, and the CLI itself live in the
//! embedding application, not in this crate.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod interval;
pub mod locator;
pub mod manifest;
pub mod metadata;
pub mod muxer;
pub mod producer;
pub mod query;
pub mod representation;
pub mod segment;
pub mod session;
pub mod store;
pub mod url;

pub use catalog::{BroadcastStatus, Catalog, VideoInfo};
pub use config::RewindConfig;
pub use error::{RewindError, Result};
pub use interval::{IntervalResolver, PointInStream, RewindInterval};
pub use locator::SequenceLocator;
pub use producer::{CancelToken, ExcerptRequest, ExcerptResult, NullProgressSink, ProduceOptions, ProgressSink};
pub use representation::{AudioAttributes, Media, Representation, VideoAttributes, VideoQuality};
pub use segment::Segment;
pub use session::StreamSession;
pub use store::{FetchOptions, SegmentStore};
