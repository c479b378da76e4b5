//! ManifestBuilder: emits a static DASH-style manifest mapping the
//! resolved segment range to each representation's base URL, for
//! consumption by an external player. Not on the critical path — the
//! composition only depends on an already-resolved [`RewindInterval`].

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, VideoInfo};
use crate::error::{RewindError, Result};
use crate::interval::RewindInterval;
use crate::url::extract_parameter_from_url;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "MPD")]
struct Mpd {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "ProgramInformation", skip_serializing_if = "Option::is_none")]
    program_information: Option<ProgramInformation>,
    #[serde(rename = "Period")]
    period: Period,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgramInformation {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "moreInformationURL", skip_serializing_if = "Option::is_none")]
    more_information_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Period {
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "Representation", default)]
    representations: Vec<XmlRepresentation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlRepresentation {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    codecs: Option<String>,
    #[serde(rename = "SegmentList", skip_serializing_if = "Option::is_none")]
    segment_list: Option<SegmentListElement>,
    #[serde(rename = "BaseURL")]
    base_url: BaseUrlElement,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentListElement {
    #[serde(rename = "startNumber")]
    start_number: i64,
    #[serde(rename = "endNumber")]
    end_number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BaseUrlElement {
    #[serde(rename = "$text")]
    text: String,
}

fn earliest_expire(catalog: &Catalog) -> u64 {
    catalog
        .iter()
        .filter_map(|r| extract_parameter_from_url("expire", &r.base_url).ok())
        .filter_map(|s| s.parse::<u64>().ok())
        .min()
        .unwrap_or(0)
}

fn build_adaptation_sets(catalog: &Catalog, interval: &RewindInterval) -> Vec<AdaptationSet> {
    let mut video = Vec::new();
    let mut audio = Vec::new();
    for r in catalog.iter() {
        let xr = XmlRepresentation {
            id: r.itag.clone(),
            codecs: Some(r.codecs.clone()),
            segment_list: Some(SegmentListElement { start_number: interval.start, end_number: interval.end }),
            base_url: BaseUrlElement { text: r.base_url.clone() },
        };
        if r.is_video() {
            video.push((r.mime_type.clone(), xr));
        } else {
            audio.push((r.mime_type.clone(), xr));
        }
    }
    let mut sets = Vec::new();
    if !video.is_empty() {
        sets.push(AdaptationSet {
            mime_type: video[0].0.clone(),
            representations: video.into_iter().map(|(_, x)| x).collect(),
        });
    }
    if !audio.is_empty() {
        sets.push(AdaptationSet {
            mime_type: audio[0].0.clone(),
            representations: audio.into_iter().map(|(_, x)| x).collect(),
        });
    }
    sets
}

/// Composes a static manifest describing `interval` over `catalog`, for
/// `video_info`.
///
/// The leading comment line carries the earliest `expire` epoch across the
/// catalog's base URLs; this is the only part of the output that changes
/// between two calls over an otherwise-unchanged catalog, which is what the
/// [`refresh`] round-trip property relies on.
#[tracing::instrument(level = "debug", skip(catalog))]
pub fn compose(video_info: &VideoInfo, interval: &RewindInterval, catalog: &Catalog) -> Result<String> {
    let mpd = Mpd {
        kind: "static".to_string(),
        program_information: Some(ProgramInformation {
            title: video_info.title.clone(),
            more_information_url: Some(video_info.url.clone()),
        }),
        period: Period { adaptation_sets: build_adaptation_sets(catalog, interval) },
    };
    let body = quick_xml::se::to_string(&mpd).map_err(|e| RewindError::Xml(e.to_string()))?;
    let comment = format!("<!-- expire: {} -->\n", earliest_expire(catalog));
    Ok(format!("{comment}{body}"))
}

fn split_comment(xml: &str) -> (Option<&str>, &str) {
    match xml.split_once('\n') {
        Some((first, rest)) if first.trim_start().starts_with("<!--") => (Some(first), rest),
        _ => (None, xml),
    }
}

/// Keeps `existing_xml`'s topology, substituting each representation's
/// `BaseURL` element with the URL found for the same itag in `new_catalog`.
///
/// Fails with `UnknownRepresentation(itag)` if any itag present in the old
/// manifest is absent from `new_catalog`.
#[tracing::instrument(level = "debug", skip(existing_xml, new_catalog))]
pub fn refresh(existing_xml: &str, new_catalog: &Catalog) -> Result<String> {
    let (_, body) = split_comment(existing_xml);
    let mut mpd: Mpd = quick_xml::de::from_str(body).map_err(|e| RewindError::Xml(e.to_string()))?;

    for set in &mut mpd.period.adaptation_sets {
        for repr in &mut set.representations {
            let fresh = new_catalog
                .get_by_itag(&repr.id)
                .ok_or_else(|| RewindError::UnknownRepresentation(repr.id.clone()))?;
            repr.base_url.text = fresh.base_url.clone();
        }
    }

    let new_body = quick_xml::se::to_string(&mpd).map_err(|e| RewindError::Xml(e.to_string()))?;
    let comment = format!("<!-- expire: {} -->\n", earliest_expire(new_catalog));
    Ok(format!("{comment}{new_body}"))
}
