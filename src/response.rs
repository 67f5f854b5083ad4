//! Ad sources and the parsed ad responses the fetcher hands back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a single ad attempt gets its response from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdSource {
    /// Ad tag URL to be fetched and parsed
    Url(String),
    /// Inline ad document supplied by the host
    Document(String),
}

impl AdSource {
    /// Short description for logs and error payloads.
    pub fn locator(&self) -> String {
        match self {
            AdSource::Url(url) => url.clone(),
            AdSource::Document(doc) => format!("<inline document, {} bytes>", doc.len()),
        }
    }
}

impl fmt::Display for AdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator())
    }
}

/// A media file descriptor from a linear creative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub src: String,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub api_framework: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl MediaFile {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            mime_type: None,
            api_framework: None,
            width: None,
            height: None,
        }
    }

    pub fn with_api_framework(mut self, framework: impl Into<String>) -> Self {
        self.api_framework = Some(framework.into());
        self
    }

    /// Whether this file must run inside an interactive (VPAID) ad unit.
    pub fn is_interactive(&self) -> bool {
        self.api_framework
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("VPAID"))
    }
}

/// A validated ad response, as produced by the response fetcher.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdResponse {
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub ad_title: Option<String>,
    /// Creative duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub click_through: Option<String>,
    #[serde(default)]
    pub skip_offset: Option<f64>,
    pub media_files: Vec<MediaFile>,
}

impl AdResponse {
    pub fn with_media(media_files: Vec<MediaFile>) -> Self {
        Self {
            media_files,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpaid_detection_is_case_insensitive() {
        assert!(MediaFile::new("unit.js").with_api_framework("vpaid").is_interactive());
        assert!(MediaFile::new("unit.js").with_api_framework("VPAID").is_interactive());
        assert!(!MediaFile::new("ad.mp4").is_interactive());
        assert!(!MediaFile::new("ad.mp4").with_api_framework("omid").is_interactive());
    }

    #[test]
    fn response_parses_from_json() {
        let json = r#"{
            "adId": "42",
            "duration": 15.0,
            "mediaFiles": [
                {"src": "http://cdn/ad.mp4", "type": "video/mp4", "width": 640, "height": 360},
                {"src": "http://cdn/unit.js", "type": "application/javascript", "apiFramework": "VPAID"}
            ]
        }"#;
        let resp: AdResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.ad_id.as_deref(), Some("42"));
        assert_eq!(resp.media_files.len(), 2);
        assert_eq!(resp.media_files[0].mime_type.as_deref(), Some("video/mp4"));
        assert!(resp.media_files[1].is_interactive());
    }

    #[test]
    fn locator_describes_inline_documents() {
        assert_eq!(AdSource::Url("http://ad".into()).locator(), "http://ad");
        assert!(AdSource::Document("{}".into()).locator().contains("2 bytes"));
    }
}
