//! Parsing of the textual segment metadata header (C1 SegmentMetadataCodec).
//!
//! The header is a run of `Key: value\r\n` lines at the start of the segment
//! byte stream; we scan for each field independently with a regular
//! expression rather than assuming a fixed ordering, so a caller-supplied
//! prefix of any length that covers the header parses identically to the
//! full segment.

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::error::{RewindError, Result};

/// Microseconds per second, used to convert the wire encoding (integer
/// microseconds) into the floating point seconds used throughout the crate.
const US_TO_S: f64 = 1_000_000.0;

/// Parsed segment metadata header.
///
/// All timestamp and duration fields are expressed in seconds, converted
/// from the wire encoding in microseconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SegmentMetadata {
    pub sequence_number: i64,
    pub ingestion_walltime: f64,
    pub ingestion_uncertainty: f64,
    pub target_duration: f64,
    pub first_frame_time: f64,
    pub first_frame_uncertainty: f64,
    pub stream_duration: Option<f64>,
    pub max_dvr_duration: Option<f64>,
    pub streamable: Option<String>,
    pub encoding_alias: Option<String>,
}

lazy_static! {
    static ref SEQUENCE_NUMBER_RE: Regex = Regex::new(r"Sequence-Number:\s(.+)\r\n").unwrap();
    static ref INGESTION_WALLTIME_RE: Regex = Regex::new(r"Ingestion-Walltime-Us:\s(.+)\r\n").unwrap();
    static ref INGESTION_UNCERTAINTY_RE: Regex = Regex::new(r"Ingestion-Uncertainty-Us:\s(.+)\r\n").unwrap();
    static ref TARGET_DURATION_RE: Regex = Regex::new(r"Target-Duration-Us:\s(.+)\r\n").unwrap();
    static ref FIRST_FRAME_TIME_RE: Regex = Regex::new(r"First-Frame-Time-Us:\s(.+)\r\n").unwrap();
    static ref FIRST_FRAME_UNCERTAINTY_RE: Regex = Regex::new(r"First-Frame-Uncertainty-Us:\s(.+)\r\n").unwrap();
    static ref STREAM_DURATION_RE: Regex = Regex::new(r"Stream-Duration-Us:\s(.+)\r\n").unwrap();
    static ref MAX_DVR_DURATION_RE: Regex = Regex::new(r"Max-Dvr-Duration-Us:\s(.+)\r\n").unwrap();
    static ref STREAMABLE_RE: Regex = Regex::new(r"Streamable:\s(.+)\r\n").unwrap();
    static ref ENCODING_ALIAS_RE: Regex = Regex::new(r"Encoding-Alias:\s(.+)\r\n").unwrap();
}

fn required_field(re: &Regex, content: &[u8], name: &str) -> Result<Vec<u8>> {
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_bytes().to_vec())
        .ok_or_else(|| RewindError::MalformedMetadata(name.to_string()))
}

fn optional_field(re: &Regex, content: &[u8]) -> Option<Vec<u8>> {
    re.captures(content).and_then(|c| c.get(1)).map(|m| m.as_bytes().to_vec())
}

fn parse_i64(bytes: &[u8], name: &str) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RewindError::MalformedMetadata(name.to_string()))
}

fn parse_us_to_seconds(bytes: &[u8], name: &str) -> Result<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v / US_TO_S)
        .ok_or_else(|| RewindError::MalformedMetadata(name.to_string()))
}

/// Parses a full or partial segment byte stream into a [`SegmentMetadata`].
///
/// `content` only needs to cover the textual header; any prefix of at least
/// ~2000 bytes is guaranteed to parse identically to the full segment (see
/// the crate-level invariant tested in `tests`).
#[tracing::instrument(level = "trace", skip(content))]
pub fn parse(content: &[u8]) -> Result<SegmentMetadata> {
    let sequence_number = parse_i64(
        &required_field(&SEQUENCE_NUMBER_RE, content, "Sequence-Number")?,
        "Sequence-Number",
    )?;
    let ingestion_walltime = parse_us_to_seconds(
        &required_field(&INGESTION_WALLTIME_RE, content, "Ingestion-Walltime-Us")?,
        "Ingestion-Walltime-Us",
    )?;
    let ingestion_uncertainty = parse_us_to_seconds(
        &required_field(&INGESTION_UNCERTAINTY_RE, content, "Ingestion-Uncertainty-Us")?,
        "Ingestion-Uncertainty-Us",
    )?;
    let target_duration = parse_us_to_seconds(
        &required_field(&TARGET_DURATION_RE, content, "Target-Duration-Us")?,
        "Target-Duration-Us",
    )?;
    let first_frame_time = parse_us_to_seconds(
        &required_field(&FIRST_FRAME_TIME_RE, content, "First-Frame-Time-Us")?,
        "First-Frame-Time-Us",
    )?;
    let first_frame_uncertainty = parse_us_to_seconds(
        &required_field(&FIRST_FRAME_UNCERTAINTY_RE, content, "First-Frame-Uncertainty-Us")?,
        "First-Frame-Uncertainty-Us",
    )?;

    let stream_duration = optional_field(&STREAM_DURATION_RE, content)
        .map(|b| parse_us_to_seconds(&b, "Stream-Duration-Us"))
        .transpose()?;
    let max_dvr_duration = optional_field(&MAX_DVR_DURATION_RE, content)
        .map(|b| parse_us_to_seconds(&b, "Max-Dvr-Duration-Us"))
        .transpose()?;
    let streamable = optional_field(&STREAMABLE_RE, content)
        .map(|b| String::from_utf8_lossy(&b).into_owned());
    let encoding_alias = optional_field(&ENCODING_ALIAS_RE, content)
        .map(|b| String::from_utf8_lossy(&b).into_owned());

    if target_duration <= 0.0 {
        return Err(RewindError::MalformedMetadata("Target-Duration-Us".to_string()));
    }
    if ingestion_walltime <= 0.0 {
        return Err(RewindError::MalformedMetadata("Ingestion-Walltime-Us".to_string()));
    }

    Ok(SegmentMetadata {
        sequence_number,
        ingestion_walltime,
        ingestion_uncertainty,
        target_duration,
        first_frame_time,
        first_frame_uncertainty,
        stream_duration,
        max_dvr_duration,
        streamable,
        encoding_alias,
    })
}

/// Bytes of prefix guaranteed sufficient to cover the metadata header.
pub const PARTIAL_SEGMENT_SIZE_BYTES: u64 = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Sequence-Number: 1150301\r\nIngestion-Walltime-Us: 1679329555339525\r\nIngestion-Uncertainty-Us: 85\r\nStream-Duration-Us: 5751479780030\r\nMax-Dvr-Duration-Us: 14400000000\r\nTarget-Duration-Us: 5000000\r\nFirst-Frame-Time-Us: 1679329560650712\r\nFirst-Frame-Uncertainty-Us: 87\r\nEncoding-Alias: L1_Bg\r\n";

    #[test]
    fn parses_all_fields() {
        let m = parse(SAMPLE).unwrap();
        assert_eq!(m.sequence_number, 1150301);
        assert!((m.ingestion_walltime - 1679329555.339525).abs() < 1e-9);
        assert!((m.target_duration - 5.0).abs() < 1e-12);
        assert_eq!(m.encoding_alias.as_deref(), Some("L1_Bg"));
        assert_eq!(m.streamable, None);
    }

    #[test]
    fn missing_required_field_fails() {
        let truncated = b"Sequence-Number: 1\r\n";
        let err = parse(truncated).unwrap_err();
        assert!(matches!(err, RewindError::MalformedMetadata(f) if f == "Ingestion-Walltime-Us"));
    }

    #[test]
    fn prefix_of_at_least_2000_bytes_parses_identically() {
        let mut padded = SAMPLE.to_vec();
        padded.resize(2000, b'\0');
        let from_prefix = parse(&padded[..2000]).unwrap();
        let from_full = parse(SAMPLE).unwrap();
        assert_eq!(from_prefix, from_full);
    }

    #[test]
    fn rejects_non_positive_target_duration() {
        let bad = b"Sequence-Number: 1\r\nIngestion-Walltime-Us: 1000000\r\nIngestion-Uncertainty-Us: 1\r\nTarget-Duration-Us: 0\r\nFirst-Frame-Time-Us: 1000000\r\nFirst-Frame-Uncertainty-Us: 1\r\n";
        assert!(parse(bad).is_err());
    }

    proptest::proptest! {
        #[test]
        fn any_prefix_length_at_or_above_2000_bytes_parses_identically(pad_len in 2000usize..4000) {
            let mut padded = SAMPLE.to_vec();
            if padded.len() < pad_len {
                padded.resize(pad_len, b'\0');
            }
            let from_prefix = parse(&padded[..pad_len.min(padded.len())]).unwrap();
            let from_full = parse(SAMPLE).unwrap();
            proptest::prop_assert_eq!(from_prefix, from_full);
        }
    }
}
