//! YouTube Data API v3 content source.
//!
//! Asks the search endpoint for the single newest video on a channel.
//! Parsing is split out of the HTTP call so it can be tested against
//! canned API responses.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_core::error::{HeraldError, Result};
use herald_core::traits::ContentSource;
use herald_core::types::ContentItem;

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct YouTubeSource {
    client: reqwest::Client,
    api_key: String,
}

impl YouTubeSource {
    pub fn new(api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }

    /// Extract the newest video from a search response.
    fn parse_latest(body: &serde_json::Value) -> Result<ContentItem> {
        let item = body["items"]
            .as_array()
            .and_then(|items| items.first())
            .ok_or_else(|| HeraldError::Fetch("channel has no videos".into()))?;

        let id = item["id"]["videoId"]
            .as_str()
            .ok_or_else(|| HeraldError::Fetch("search result has no videoId".into()))?
            .to_string();
        let snippet = &item["snippet"];
        let title = decode_entities(snippet["title"].as_str().unwrap_or("(untitled)"));
        let thumbnail_url = snippet["thumbnails"]["high"]["url"]
            .as_str()
            .or_else(|| snippet["thumbnails"]["default"]["url"].as_str())
            .map(str::to_string);
        let published_at = snippet["publishedAt"]
            .as_str()
            .and_then(|t| t.parse::<DateTime<Utc>>().ok());

        Ok(ContentItem {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            title,
            thumbnail_url,
            published_at,
        })
    }
}

#[async_trait]
impl ContentSource for YouTubeSource {
    async fn latest(&self, source_key: &str) -> Result<ContentItem> {
        if self.api_key.is_empty() {
            return Err(HeraldError::Config("YouTube api_key not configured".into()));
        }
        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("channelId", source_key),
                ("part", "snippet,id"),
                ("order", "date"),
                ("type", "video"),
                ("maxResults", "1"),
            ])
            .send()
            .await
            .map_err(|e| HeraldError::Fetch(format!("YouTube request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HeraldError::Fetch(format!(
                "YouTube API error {status}: {text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HeraldError::Fetch(format!("invalid YouTube response: {e}")))?;
        let item = Self::parse_latest(&body)?;
        tracing::debug!("🎬 latest video on '{source_key}': '{}' ({})", item.title, item.id);
        Ok(item)
    }
}

/// The search endpoint HTML-escapes titles.
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> serde_json::Value {
        serde_json::json!({
            "items": [{
                "id": { "kind": "youtube#video", "videoId": "dQw4w9WgXcQ" },
                "snippet": {
                    "title": "Launch day &amp; Q&amp;A",
                    "publishedAt": "2026-08-28T15:00:00Z",
                    "thumbnails": {
                        "default": { "url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg" },
                        "high": { "url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg" }
                    }
                }
            }]
        })
    }

    #[test]
    fn test_parse_latest_video() {
        let item = YouTubeSource::parse_latest(&sample_response()).unwrap();
        assert_eq!(item.id, "dQw4w9WgXcQ");
        assert_eq!(item.title, "Launch day & Q&A");
        assert_eq!(item.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(
            item.thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg")
        );
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_empty_channel_is_an_error() {
        let body = serde_json::json!({ "items": [] });
        let err = YouTubeSource::parse_latest(&body).unwrap_err();
        assert!(matches!(err, HeraldError::Fetch(_)));
    }

    #[test]
    fn test_missing_video_id_is_an_error() {
        let body = serde_json::json!({
            "items": [{ "id": { "kind": "youtube#channel" }, "snippet": { "title": "x" } }]
        });
        assert!(YouTubeSource::parse_latest(&body).is_err());
    }
}
