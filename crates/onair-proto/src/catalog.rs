//! The fixed set of streams the player knows about, plus the two external
//! links shown next to the player.

use serde::{Deserialize, Serialize};

/// Identifier of one of the built-in streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StreamId {
    WkncHd1,
    #[default]
    WkncHd2,
    RadioT,
}

impl StreamId {
    pub const ALL: [StreamId; 3] = [StreamId::WkncHd1, StreamId::WkncHd2, StreamId::RadioT];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamId::WkncHd1 => "wknc-hd1",
            StreamId::WkncHd2 => "wknc-hd2",
            StreamId::RadioT => "radio-t",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == s)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where "now playing" text for a stream comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// Titles embedded in the audio stream (ICY metadata).
    Inline,
    /// Titles fetched once per play start from a separate JSON endpoint.
    Polled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub url: String,
    pub display_title: String,
    pub metadata: MetadataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub name: String,
    pub url: String,
}

/// Lookup table over the built-in streams.
#[derive(Debug, Clone)]
pub struct StreamCatalog {
    streams: Vec<StreamDescriptor>,
}

impl StreamCatalog {
    pub fn builtin() -> Self {
        let stream = |id, url: &str, title: &str, metadata| StreamDescriptor {
            id,
            url: url.to_string(),
            display_title: title.to_string(),
            metadata,
        };
        Self {
            streams: vec![
                stream(
                    StreamId::WkncHd1,
                    "https://das-edge14-live365-dal02.cdnstream.com/a45877",
                    "WKNC HD1",
                    MetadataSource::Inline,
                ),
                stream(
                    StreamId::WkncHd2,
                    "https://das-edge12-live365-dal02.cdnstream.com/a30009",
                    "WKNC HD2",
                    MetadataSource::Inline,
                ),
                stream(
                    StreamId::RadioT,
                    "https://stream.radio-t.com",
                    "Radio-T",
                    MetadataSource::Polled,
                ),
            ],
        }
    }

    /// Every `StreamId` has an entry in the built-in catalog.
    pub fn get(&self, id: StreamId) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// News site and chat channel, opened in a browser by clients.
pub fn external_links() -> Vec<ExternalLink> {
    vec![
        ExternalLink {
            name: "news".to_string(),
            url: "https://news.radio-t.com".to_string(),
        },
        ExternalLink {
            name: "chat".to_string(),
            url: "https://t.me/radio_t_chat".to_string(),
        },
    ]
}
