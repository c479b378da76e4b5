//! Representations (audio or video encodings) of a stream.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// `(height, frame_rate)` lexicographic video quality, used by the `best`
/// and `worst` query functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoQuality {
    pub height: u32,
    pub frame_rate: f64,
}

impl Eq for VideoQuality {}

impl PartialOrd for VideoQuality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VideoQuality {
    fn cmp(&self, other: &Self) -> Ordering {
        self.height.cmp(&other.height).then(
            self.frame_rate
                .partial_cmp(&other.frame_rate)
                .unwrap_or(Ordering::Equal),
        )
    }
}

/// Attributes specific to an audio representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAttributes {
    pub audio_sampling_rate: u32,
}

/// Attributes specific to a video representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAttributes {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Media {
    Audio(AudioAttributes),
    Video(VideoAttributes),
}

/// One encoding (audio or video) of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub itag: String,
    pub mime_type: String,
    pub codecs: String,
    pub base_url: String,
    pub media: Media,
}

impl Representation {
    /// The MIME supertype, e.g. `"audio"` or `"video"`.
    pub fn kind(&self) -> &str {
        self.mime_type.split('/').next().unwrap_or_default()
    }

    /// The MIME subtype, e.g. `"mp4"` or `"webm"`.
    pub fn format(&self) -> &str {
        self.mime_type.split('/').nth(1).unwrap_or_default()
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.media, Media::Audio(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self.media, Media::Video(_))
    }

    pub fn quality(&self) -> Option<VideoQuality> {
        match &self.media {
            Media::Video(v) => Some(VideoQuality { height: v.height, frame_rate: v.frame_rate }),
            Media::Audio(_) => None,
        }
    }

    /// Looks up a named attribute for the query engine. Returns `None` for
    /// attributes that don't apply to this representation's kind (e.g.
    /// `height` on an audio representation) — the query language treats a
    /// missing attribute as a non-match rather than an error.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "itag" => Some(AttributeValue::Str(self.itag.clone())),
            "mime_type" => Some(AttributeValue::Str(self.mime_type.clone())),
            "codecs" => Some(AttributeValue::Str(self.codecs.clone())),
            "base_url" => Some(AttributeValue::Str(self.base_url.clone())),
            "type" => Some(AttributeValue::Str(self.kind().to_string())),
            "format" => Some(AttributeValue::Str(self.format().to_string())),
            "audio_sampling_rate" => match &self.media {
                Media::Audio(a) => Some(AttributeValue::Num(a.audio_sampling_rate as f64)),
                Media::Video(_) => None,
            },
            "width" => match &self.media {
                Media::Video(v) => Some(AttributeValue::Num(v.width as f64)),
                Media::Audio(_) => None,
            },
            "height" => match &self.media {
                Media::Video(v) => Some(AttributeValue::Num(v.height as f64)),
                Media::Audio(_) => None,
            },
            "frame_rate" => match &self.media {
                Media::Video(v) => Some(AttributeValue::Num(v.frame_rate)),
                Media::Audio(_) => None,
            },
            _ => None,
        }
    }

    /// Names of every attribute the query engine recognizes, across both
    /// audio and video representations. An attribute absent from this list
    /// is a genuinely unknown name (`UnknownAttributeError`); one present
    /// here but inapplicable to this representation's kind (e.g. `height`
    /// on audio) is a missing value, which the query language treats as a
    /// non-match rather than an error.
    pub fn known_attribute_names(&self) -> &'static [&'static str] {
        &[
            "itag",
            "mime_type",
            "codecs",
            "base_url",
            "type",
            "format",
            "audio_sampling_rate",
            "width",
            "height",
            "frame_rate",
        ]
    }
}

/// A typed attribute value, as exposed to the query engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Num(f64),
}

impl AttributeValue {
    pub fn contains(&self, needle: &str) -> bool {
        match self {
            AttributeValue::Str(s) => s.contains(needle),
            AttributeValue::Num(n) => n.to_string().contains(needle),
        }
    }
}
