//! Ad response fetching: the collaborator trait and a table-driven fetcher.

use crate::response::{AdResponse, AdSource};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Retrieves and validates the ad response for a source.
///
/// The returned future must resolve exactly once. Transport and document
/// parsing are the implementor's business; failures are reported as a
/// message and turned into a fetch error by the orchestrator.
pub trait AdResponseFetcher: Send + Sync {
    fn get_response(&self, source: &AdSource) -> BoxFuture<'static, Result<AdResponse, String>>;
}

/// Fetcher answering from a fixed table, used by tests and the simulator.
///
/// URL sources are looked up in the table; inline documents are parsed as
/// JSON-encoded [`AdResponse`]s. Every attempt is recorded.
pub struct StaticFetcher {
    responses: HashMap<String, Result<AdResponse, String>>,
    latency: Option<Duration>,
    attempts: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        StaticFetcher {
            responses: HashMap::new(),
            latency: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, url: &str, response: AdResponse) -> Self {
        self.responses.insert(url.to_string(), Ok(response));
        self
    }

    pub fn with_failure(mut self, url: &str, message: &str) -> Self {
        self.responses.insert(url.to_string(), Err(message.to_string()));
        self
    }

    /// Delay every answer, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Locators requested so far, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn answer(&self, source: &AdSource) -> Result<AdResponse, String> {
        match source {
            AdSource::Url(url) => self
                .responses
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(format!("no ad response for {}", url))),
            AdSource::Document(doc) => serde_json::from_str::<AdResponse>(doc)
                .map_err(|e| format!("invalid ad document: {}", e)),
        }
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AdResponseFetcher for StaticFetcher {
    fn get_response(&self, source: &AdSource) -> BoxFuture<'static, Result<AdResponse, String>> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source.locator());
        let answer = self.answer(source);
        match self.latency {
            Some(latency) => async move {
                tokio::time::sleep(latency).await;
                answer
            }
            .boxed(),
            None => future::ready(answer).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::MediaFile;

    #[tokio::test]
    async fn static_fetcher_answers_from_table() {
        let fetcher = StaticFetcher::new()
            .with_response("good", AdResponse::with_media(vec![MediaFile::new("ad.mp4")]))
            .with_failure("bad", "HTTP 500");

        let ok = fetcher.get_response(&AdSource::Url("good".into())).await;
        assert_eq!(ok.unwrap().media_files.len(), 1);

        let err = fetcher.get_response(&AdSource::Url("bad".into())).await;
        assert_eq!(err.unwrap_err(), "HTTP 500");

        let missing = fetcher.get_response(&AdSource::Url("other".into())).await;
        assert!(missing.unwrap_err().contains("no ad response"));

        assert_eq!(fetcher.attempts(), vec!["good", "bad", "other"]);
    }

    #[tokio::test]
    async fn inline_documents_are_parsed() {
        let fetcher = StaticFetcher::new();
        let doc = r#"{"mediaFiles": [{"src": "ad.mp4"}]}"#;
        let resp = fetcher
            .get_response(&AdSource::Document(doc.into()))
            .await
            .unwrap();
        assert_eq!(resp.media_files[0].src, "ad.mp4");

        let bad = fetcher.get_response(&AdSource::Document("<VAST/>".into())).await;
        assert!(bad.is_err());
    }
}
