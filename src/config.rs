//! Options object accepted at attach time and the validated settings built
//! from it.
//!
//! `VastOptions` mirrors the host-facing options (camelCase JSON keys). Values
//! that can only be functions (dynamic ad tags, inline documents) are supplied
//! through the builder methods. [`Settings::from_options`] performs every
//! check that can fail and produces the immutable [`Settings`].

use crate::error::{Error, Result};
use log::LevelFilter;
use serde::de::{Deserializer, IgnoredAny};
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// A host function producing a string on demand (ad tag URL or ad document).
#[derive(Clone)]
pub struct Provider(Arc<dyn Fn() -> String + Send + Sync>);

impl Provider {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Provider(Arc::new(f))
    }

    pub fn call(&self) -> String {
        (self.0)()
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Provider(..)")
    }
}

/// One ad tag: a fixed URL or a function returning one.
#[derive(Debug, Clone)]
pub enum AdTag {
    Url(String),
    Dynamic(Provider),
}

impl AdTag {
    pub fn resolve(&self) -> String {
        match self {
            AdTag::Url(url) => url.clone(),
            AdTag::Dynamic(provider) => provider.call(),
        }
    }
}

impl<'de> Deserialize<'de> for AdTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(AdTag::Url)
    }
}

/// `adTagUrl` accepts a single tag or an ordered fallback queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AdTagOption {
    One(AdTag),
    Queue(Vec<AdTag>),
}

/// `adTagXML` must be a function. Anything arriving through JSON is kept only
/// to be rejected at validation.
#[derive(Debug, Clone)]
pub enum AdTagXml {
    Provider(Provider),
    NotAFunction,
}

impl<'de> Deserialize<'de> for AdTagXml {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer).map(|_| AdTagXml::NotAFunction)
    }
}

/// Console verbosity, 0 (errors only) to 4 (everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "u8")]
pub struct Verbosity(u8);

impl Verbosity {
    pub const MAX: u8 = 4;

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.0 {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        Verbosity(level.min(Self::MAX))
    }
}

fn lenient_midrolls<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error> {
    // Non-numeric entries become NaN so validation disables midrolls instead
    // of the whole options object failing to parse.
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|v| v.as_f64().unwrap_or(f64::NAN))
        .collect())
}

/// Options object handed to [`crate::attach`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VastOptions {
    /// Ready timeout in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Preroll window on iPhones in milliseconds of content
    #[serde(rename = "iosPrerollCancelTimeout")]
    pub ios_preroll_cancel_timeout_ms: u64,
    /// Maximum time for an ad to actually start, in milliseconds
    #[serde(rename = "adCancelTimeout")]
    pub ad_cancel_timeout_ms: u64,
    pub play_ad_always: bool,
    pub ads_enabled: bool,
    pub auto_resize: bool,
    pub verbosity: Verbosity,
    pub preroll: bool,
    pub postroll: bool,
    #[serde(deserialize_with = "lenient_midrolls")]
    pub midrolls: Vec<f64>,
    pub ad_tag_url: Option<AdTagOption>,
    /// Legacy alias of `adTagUrl`
    pub url: Option<AdTagOption>,
    #[serde(rename = "adTagXML")]
    pub ad_tag_xml: Option<AdTagXml>,
}

impl Default for VastOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            ios_preroll_cancel_timeout_ms: 2000,
            ad_cancel_timeout_ms: 3000,
            play_ad_always: false,
            ads_enabled: true,
            auto_resize: true,
            verbosity: Verbosity::default(),
            preroll: true,
            postroll: false,
            midrolls: Vec::new(),
            ad_tag_url: None,
            url: None,
            ad_tag_xml: None,
        }
    }
}

impl VastOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_ad_tag_url(mut self, url: impl Into<String>) -> Self {
        self.ad_tag_url = Some(AdTagOption::One(AdTag::Url(url.into())));
        self
    }

    pub fn with_ad_tag_provider<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.ad_tag_url = Some(AdTagOption::One(AdTag::Dynamic(Provider::new(f))));
        self
    }

    pub fn with_ad_tag_queue(mut self, tags: Vec<AdTag>) -> Self {
        self.ad_tag_url = Some(AdTagOption::Queue(tags));
        self
    }

    pub fn with_ad_tag_xml<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.ad_tag_xml = Some(AdTagXml::Provider(Provider::new(f)));
        self
    }

    pub fn with_midrolls(mut self, midrolls: Vec<f64>) -> Self {
        self.midrolls = midrolls;
        self
    }
}

/// Where break sources come from for the whole session.
#[derive(Debug, Clone)]
pub enum AdSourceConfig {
    /// One tag, resolved again for every break
    Tag(AdTag),
    /// Ordered fallback queue walked on every break
    Queue(Vec<AdTag>),
    /// Inline document provider
    Document(Provider),
}

/// Validated, immutable plugin settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub timeout: Duration,
    pub ios_preroll_cancel_timeout: Duration,
    pub ad_cancel_timeout: Duration,
    pub play_ad_always: bool,
    /// Initial value of the runtime enable toggle
    pub ads_enabled: bool,
    pub auto_resize: bool,
    pub verbosity: Verbosity,
    pub preroll: bool,
    pub postroll: bool,
    pub midrolls: Vec<f64>,
    pub ad_source: AdSourceConfig,
}

impl Settings {
    pub fn from_options(options: VastOptions) -> Result<Self> {
        let ad_tag_url = options.ad_tag_url.or(options.url);
        let document = match options.ad_tag_xml {
            Some(AdTagXml::NotAFunction) => {
                return Err(Error::Config(
                    "the passed adTagXML option does not contain a function".into(),
                ))
            }
            Some(AdTagXml::Provider(p)) => Some(p),
            None => None,
        };

        let ad_source = match (ad_tag_url, document) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "adTagUrl and adTagXML are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(Error::Config("missing adTagUrl on options object".into()))
            }
            (None, Some(provider)) => AdSourceConfig::Document(provider),
            (Some(AdTagOption::One(tag)), None) => {
                check_tag(&tag)?;
                AdSourceConfig::Tag(tag)
            }
            (Some(AdTagOption::Queue(tags)), None) => {
                if tags.is_empty() {
                    return Err(Error::Config("adTagUrl queue is empty".into()));
                }
                for tag in &tags {
                    check_tag(tag)?;
                }
                AdSourceConfig::Queue(tags)
            }
        };

        Ok(Settings {
            timeout: Duration::from_millis(options.timeout_ms),
            ios_preroll_cancel_timeout: Duration::from_millis(options.ios_preroll_cancel_timeout_ms),
            ad_cancel_timeout: Duration::from_millis(options.ad_cancel_timeout_ms),
            play_ad_always: options.play_ad_always,
            ads_enabled: options.ads_enabled,
            auto_resize: options.auto_resize,
            verbosity: options.verbosity,
            preroll: options.preroll,
            postroll: options.postroll,
            midrolls: options.midrolls,
            ad_source,
        })
    }

    /// Starting value of the remaining-ads counter.
    pub fn planned_ads(&self) -> u32 {
        u32::from(self.preroll) + self.midrolls.len() as u32 + u32::from(self.postroll)
    }
}

fn check_tag(tag: &AdTag) -> Result<()> {
    match tag {
        AdTag::Url(url) if url.trim().is_empty() => {
            Err(Error::Config("adTagUrl must not be empty".into()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_plugin_defaults() {
        let o = VastOptions::default();
        assert_eq!(o.timeout_ms, 500);
        assert_eq!(o.ios_preroll_cancel_timeout_ms, 2000);
        assert_eq!(o.ad_cancel_timeout_ms, 3000);
        assert!(o.ads_enabled);
        assert!(o.auto_resize);
        assert!(o.preroll);
        assert!(!o.postroll);
        assert!(!o.play_ad_always);
        assert!(o.midrolls.is_empty());
        assert_eq!(o.verbosity.level(), 0);
    }

    #[test]
    fn parses_camel_case_json() {
        let o = VastOptions::from_json(
            r#"{
                "adTagUrl": "http://ad",
                "adCancelTimeout": 1000,
                "iosPrerollCancelTimeout": 1500,
                "playAdAlways": true,
                "postroll": true,
                "midrolls": [10, 30.5],
                "verbosity": 3
            }"#,
        )
        .unwrap();
        assert_eq!(o.ad_cancel_timeout_ms, 1000);
        assert_eq!(o.ios_preroll_cancel_timeout_ms, 1500);
        assert!(o.play_ad_always);
        assert_eq!(o.midrolls, vec![10.0, 30.5]);
        assert_eq!(o.verbosity.level_filter(), LevelFilter::Debug);

        let s = Settings::from_options(o).unwrap();
        assert!(matches!(s.ad_source, AdSourceConfig::Tag(AdTag::Url(ref u)) if u == "http://ad"));
        assert_eq!(s.ad_cancel_timeout, Duration::from_millis(1000));
        assert_eq!(s.planned_ads(), 4);
    }

    #[test]
    fn queue_of_urls_parses() {
        let o = VastOptions::from_json(r#"{"adTagUrl": ["bad1", "bad2", "good"]}"#).unwrap();
        let s = Settings::from_options(o).unwrap();
        match s.ad_source {
            AdSourceConfig::Queue(tags) => {
                let urls: Vec<String> = tags.iter().map(AdTag::resolve).collect();
                assert_eq!(urls, vec!["bad1", "bad2", "good"]);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn non_numeric_midrolls_become_nan() {
        let o = VastOptions::from_json(r#"{"adTagUrl": "x", "midrolls": [10, "soon"]}"#).unwrap();
        assert_eq!(o.midrolls[0], 10.0);
        assert!(o.midrolls[1].is_nan());
    }

    #[test]
    fn legacy_url_alias_is_accepted() {
        let o = VastOptions::from_json(r#"{"url": "http://legacy"}"#).unwrap();
        let s = Settings::from_options(o).unwrap();
        assert!(matches!(s.ad_source, AdSourceConfig::Tag(_)));
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let err = Settings::from_options(VastOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("missing adTagUrl")));
    }

    #[test]
    fn ad_tag_xml_from_json_is_rejected() {
        let o = VastOptions::from_json(r#"{"adTagXML": "<VAST/>"}"#).unwrap();
        let err = Settings::from_options(o).unwrap_err();
        assert!(err.to_string().contains("does not contain a function"));
    }

    #[test]
    fn both_sources_are_rejected() {
        let o = VastOptions::default()
            .with_ad_tag_url("http://ad")
            .with_ad_tag_xml(|| "{}".to_string());
        assert!(Settings::from_options(o).is_err());
    }

    #[test]
    fn empty_queue_and_empty_url_are_rejected() {
        let o = VastOptions::default().with_ad_tag_queue(Vec::new());
        assert!(Settings::from_options(o).is_err());
        let o = VastOptions::default().with_ad_tag_url("  ");
        assert!(Settings::from_options(o).is_err());
    }

    #[test]
    fn document_provider_becomes_document_source() {
        let o = VastOptions::default().with_ad_tag_xml(|| "{}".to_string());
        let s = Settings::from_options(o).unwrap();
        assert!(matches!(s.ad_source, AdSourceConfig::Document(_)));
    }

    #[test]
    fn verbosity_is_clamped() {
        assert_eq!(Verbosity::from(9).level(), 4);
        assert_eq!(Verbosity::from(1).level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = VastOptions::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
