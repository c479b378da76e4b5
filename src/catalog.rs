//! The stream catalog (C4 StreamCatalog): a set of representations indexed
//! by itag, plus extraction from a DASH-style manifest document.

use serde::{Deserialize, Serialize};

use crate::error::{RewindError, Result};
use crate::representation::{AudioAttributes, Media, Representation, VideoAttributes};

/// Broadcast status of the underlying stream. Only `Active` is operable by
/// the rest of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    Active,
    Upcoming,
    Completed,
    None,
}

/// Metainformation about the video the catalog belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub url: String,
    pub title: String,
    pub author: String,
    pub status: BroadcastStatus,
    pub dash_manifest_url: Option<String>,
}

impl VideoInfo {
    /// Returns `Ok(())` if the stream is currently live, otherwise the
    /// precondition failure this crate surfaces for all non-operable
    /// statuses.
    pub fn require_active(&self) -> Result<()> {
        if self.status == BroadcastStatus::Active {
            Ok(())
        } else {
            Err(RewindError::BroadcastNotActive(self.status))
        }
    }
}

/// A set of representations, indexed by itag.
///
/// The itag index is a derived structure rebuilt on mutation; the
/// authoritative store is the vector so insertion order (and therefore
/// iteration order, which matters for e.g. "first reference
/// representation") is preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    representations: Vec<Representation>,
}

impl Catalog {
    pub fn new(representations: Vec<Representation>) -> Catalog {
        Catalog { representations }
    }

    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.representations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Representation> {
        self.representations.iter()
    }

    /// Looks up a representation by itag. Itags are unique within a
    /// catalog; the first (and only) match is returned.
    pub fn get_by_itag(&self, itag: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.itag == itag)
    }

    pub fn add(&mut self, representation: Representation) {
        if self.get_by_itag(&representation.itag).is_none() {
            self.representations.push(representation);
        }
    }

    /// Returns a new catalog containing only representations matching the
    /// predicate.
    pub fn filter(&self, predicate: impl Fn(&Representation) -> bool) -> Catalog {
        Catalog::new(self.representations.iter().filter(|r| predicate(r)).cloned().collect())
    }

    /// The first representation in the catalog, used as a default reference
    /// representation when none is specified.
    pub fn first(&self) -> Option<&Representation> {
        self.representations.first()
    }
}

// --- Manifest parsing -------------------------------------------------

#[derive(Debug, Deserialize)]
struct Mpd {
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "Representation", default)]
    representations: Vec<XmlRepresentation>,
}

#[derive(Debug, Deserialize)]
struct XmlRepresentation {
    id: String,
    codecs: Option<String>,
    #[serde(rename = "audioSamplingRate")]
    audio_sampling_rate: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(rename = "frameRate")]
    frame_rate: Option<f64>,
    #[serde(rename = "BaseURL")]
    base_url: BaseUrlElement,
}

#[derive(Debug, Deserialize)]
struct BaseUrlElement {
    #[serde(rename = "$text")]
    text: String,
}

/// Extracts representations from a DASH-style MPD manifest document.
///
/// Mirrors the original implementation's XPath-based extraction: a
/// representation's `mimeType` is inherited from its enclosing
/// `AdaptationSet`, and is classified as audio or video by substring match
/// (`"audio"` in the MIME type).
#[tracing::instrument(level = "trace", skip(manifest_xml))]
pub fn extract_representations(manifest_xml: &str) -> Result<Vec<Representation>> {
    let mpd: Mpd = quick_xml::de::from_str(manifest_xml)
        .map_err(|e| RewindError::Xml(e.to_string()))?;

    let mut out = Vec::new();
    for period in mpd.periods {
        for set in period.adaptation_sets {
            let is_audio = set.mime_type.contains("audio");
            for repr in set.representations {
                let media = if is_audio {
                    Media::Audio(AudioAttributes {
                        audio_sampling_rate: repr.audio_sampling_rate.ok_or_else(|| {
                            RewindError::Xml(format!("representation {} missing audioSamplingRate", repr.id))
                        })?,
                    })
                } else {
                    Media::Video(VideoAttributes {
                        width: repr.width.ok_or_else(|| RewindError::Xml(format!("representation {} missing width", repr.id)))?,
                        height: repr.height.ok_or_else(|| RewindError::Xml(format!("representation {} missing height", repr.id)))?,
                        frame_rate: repr.frame_rate.ok_or_else(|| RewindError::Xml(format!("representation {} missing frameRate", repr.id)))?,
                    })
                };
                out.push(Representation {
                    itag: repr.id,
                    mime_type: set.mime_type.clone(),
                    codecs: repr.codecs.unwrap_or_default(),
                    base_url: repr.base_url.text,
                    media,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD>
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="140" codecs="mp4a.40.2" audioSamplingRate="44100">
        <BaseURL>https://example.test/itag/140/mime/audio%2Fmp4/dur/2/expire/9999999999/</BaseURL>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="137" codecs="avc1.640028" width="1920" height="1080" frameRate="30">
        <BaseURL>https://example.test/itag/137/mime/video%2Fmp4/dur/2/expire/9999999999/</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn extracts_audio_and_video_representations() {
        let reps = extract_representations(SAMPLE_MPD).unwrap();
        assert_eq!(reps.len(), 2);
        let catalog = Catalog::new(reps);
        assert!(catalog.get_by_itag("140").unwrap().is_audio());
        assert!(catalog.get_by_itag("137").unwrap().is_video());
        assert!(catalog.get_by_itag("999").is_none());
    }

    #[test]
    fn itag_is_unique_within_catalog() {
        let mut catalog = Catalog::new(extract_representations(SAMPLE_MPD).unwrap());
        let before = catalog.len();
        catalog.add(catalog.get_by_itag("140").unwrap().clone());
        assert_eq!(catalog.len(), before);
    }
}
