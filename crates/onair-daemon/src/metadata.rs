//! Track metadata: inline ICY titles and the polled episode endpoint.

use async_trait::async_trait;
use onair_proto::config::MetadataConfig;
use onair_proto::protocol::TrackInfo;
use tracing::{debug, info};

use crate::error::MetadataError;

/// Parse `"Artist - Title"`.  Without the separator the whole string is the
/// title and the artist stays empty.
pub fn parse_inline_title(raw: &str) -> TrackInfo {
    let s = raw.trim();
    match s.split_once(" - ") {
        Some((artist, title)) => TrackInfo::new(title.trim(), artist.trim()),
        None => TrackInfo::new(s, ""),
    }
}

/// Decode the episode list and turn its newest entry into a track.  The
/// episode name goes into `artist`; `title` is the fixed label.
pub fn parse_last_episodes(body: &[u8], title_label: &str) -> Result<TrackInfo, MetadataError> {
    let episodes: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| MetadataError::ParseFailed(e.to_string()))?;
    let latest = episodes
        .first()
        .ok_or_else(|| MetadataError::ParseFailed("empty episode list".to_string()))?;
    let name = latest["title"]
        .as_str()
        .ok_or_else(|| MetadataError::ParseFailed("episode has no string title".to_string()))?;
    Ok(TrackInfo::new(title_label, name.trim()))
}

/// One-shot source of polled metadata.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self) -> Result<TrackInfo, MetadataError>;
}

pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    endpoint: String,
    title_label: String,
}

impl HttpMetadataFetcher {
    pub fn new(config: &MetadataConfig, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            title_label: config.title_label.clone(),
        })
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self) -> Result<TrackInfo, MetadataError> {
        debug!("[poll] GET {}", self.endpoint);
        let resp = self.client.get(&self.endpoint).send().await?;
        if !resp.status().is_success() {
            return Err(MetadataError::FetchFailed(format!("HTTP {}", resp.status())));
        }
        let body = resp.bytes().await?;
        let track = parse_last_episodes(&body, &self.title_label)?;
        info!("[poll] latest episode: {:?}", track.artist);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_inline_artist_title() {
        let track = parse_inline_title("DJ Name - Song Title");
        assert_eq!(track.artist, "DJ Name");
        assert_eq!(track.title, "Song Title");
    }

    #[test]
    fn test_parse_inline_no_separator() {
        let track = parse_inline_title("Just A Title");
        assert_eq!(track.artist, "");
        assert_eq!(track.title, "Just A Title");
    }

    #[test]
    fn test_parse_inline_trims_and_keeps_rest() {
        let track = parse_inline_title("  Band  -  Song - Live Edit ");
        assert_eq!(track.artist, "Band");
        assert_eq!(track.title, "Song - Live Edit");
        // a hyphen without spaces is part of the title
        assert_eq!(parse_inline_title("Jay-Z").title, "Jay-Z");
    }

    #[test]
    fn test_parse_last_episodes() {
        let body = br#"[{"title": "Radio-T 942", "url": "x"}, {"title": "Radio-T 941"}]"#;
        let track = parse_last_episodes(body, "Radio").unwrap();
        assert_eq!(track, TrackInfo::new("Radio", "Radio-T 942"));
    }

    #[test]
    fn test_parse_last_episodes_failures() {
        assert!(matches!(
            parse_last_episodes(b"[]", "Radio"),
            Err(MetadataError::ParseFailed(_))
        ));
        assert!(matches!(
            parse_last_episodes(br#"[{"title": 5}]"#, "Radio"),
            Err(MetadataError::ParseFailed(_))
        ));
        assert!(matches!(
            parse_last_episodes(b"<html>", "Radio"),
            Err(MetadataError::ParseFailed(_))
        ));
    }

    fn fetcher_for(server: &MockServer) -> HttpMetadataFetcher {
        let config = MetadataConfig {
            endpoint: format!("{}/site-api/last/5", server.uri()),
            title_label: "Radio".to_string(),
        };
        HttpMetadataFetcher::new(&config, "Radio/1.0 (iOS)").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_takes_first_episode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/site-api/last/5"))
            .and(header("user-agent", "Radio/1.0 (iOS)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"title": "Episode 2"},
                {"title": "Episode 1"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let track = fetcher_for(&server).fetch().await.unwrap();
        assert_eq!(track.title, "Radio");
        assert_eq!(track.artist, "Episode 2");
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher_for(&server).fetch().await.unwrap_err();
        assert!(matches!(err, MetadataError::FetchFailed(_)), "{err}");
    }
}
