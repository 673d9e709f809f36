// src/services/feed.rs

//! Live `aircraft.json` feed.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::FeedConfig;
use crate::utils::http;

/// Source of raw aircraft entries.
#[async_trait]
pub trait AircraftFeed: Send + Sync {
    /// Read the current snapshot and return its unvalidated entries.
    async fn fetch(&self) -> Result<Vec<Value>>;

    /// Human-readable location, for logs.
    fn location(&self) -> &str;
}

/// Feed read from a local file or an HTTP(S) URL.
#[derive(Debug, Clone)]
pub struct JsonFeed {
    client: reqwest::Client,
    source: String,
}

impl JsonFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(&config.user_agent, config.timeout_secs)?,
            source: config.source.clone(),
        })
    }
}

#[async_trait]
impl AircraftFeed for JsonFeed {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let text = if http::is_http(&self.source) {
            http::fetch_text(&self.client, &self.source).await?
        } else {
            tokio::fs::read_to_string(&self.source).await?
        };
        extract_aircraft(&text)
    }

    fn location(&self) -> &str {
        &self.source
    }
}

/// Pull the `aircraft` array out of a feed document.
///
/// A document without the array yields no entries; a document that is not
/// a JSON object is an error.
pub fn extract_aircraft(text: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(mut doc) => match doc.remove("aircraft") {
            Some(Value::Array(entries)) => Ok(entries),
            Some(_) | None => Ok(Vec::new()),
        },
        _ => Err(AppError::feed("feed document is not a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DOC: &str = r#"{
        "now": 1700000000.1,
        "messages": 123456,
        "aircraft": [
            {"hex": "a1b2c3", "flight": "UAL123 ", "alt_baro": 35000},
            {"hex": "d4e5f6", "alt_baro": "ground"}
        ]
    }"#;

    fn feed_for(source: String) -> JsonFeed {
        JsonFeed::new(&FeedConfig {
            source,
            ..FeedConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_extract_entries() {
        let entries = extract_aircraft(DOC).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["hex"], "a1b2c3");
    }

    #[test]
    fn test_missing_array_is_empty() {
        assert!(extract_aircraft(r#"{"now": 1}"#).unwrap().is_empty());
        assert!(extract_aircraft(r#"{"aircraft": null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_non_object_is_error() {
        assert!(matches!(
            extract_aircraft("[1, 2, 3]"),
            Err(AppError::Feed(_))
        ));
        assert!(matches!(extract_aircraft("not json"), Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("aircraft.json");
        std::fs::write(&file, DOC).unwrap();

        let feed = feed_for(file.display().to_string());
        assert_eq!(feed.fetch().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let feed = feed_for(dir.path().join("absent.json").display().to_string());
        assert!(matches!(feed.fetch().await, Err(AppError::Io(_))));
    }

    #[tokio::test]
    async fn test_http_source_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/aircraft.json"))
            .and(header("user-agent", FeedConfig::default().user_agent.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(DOC))
            .mount(&server)
            .await;

        let feed = feed_for(format!("{}/data/aircraft.json", server.uri()));
        assert_eq!(feed.fetch().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let feed = feed_for(format!("{}/aircraft.json", server.uri()));
        assert!(matches!(feed.fetch().await, Err(AppError::Http(_))));
    }
}
