use serde::{Deserialize, Serialize};

use crate::catalog::StreamId;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest JSON body accepted in one frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Messages sent from a client (control socket or HTTP API) to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    SelectStream { id: StreamId },
    Play,
    Stop,
    TogglePlayPause,
    /// A button press from a now-playing surface (lock screen, media keys).
    Remote { command: RemoteCommand },
    /// Another audio client took or released the output.
    Interruption { event: Interruption },
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: SessionSnapshot,
    },
    State {
        data: SessionSnapshot,
    },
    NowPlaying {
        info: Option<NowPlayingInfo>,
    },
    Log {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interruption {
    Began,
    Ended { should_resume: bool },
}

/// Buttons a now-playing surface can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteCommand {
    Play,
    Pause,
    Stop,
    TogglePlayPause,
    NextTrack,
    PreviousTrack,
    SeekForward,
    SeekBackward,
    ChangePlaybackPosition,
}

impl RemoteCommand {
    pub const ALL: [RemoteCommand; 9] = [
        RemoteCommand::Play,
        RemoteCommand::Pause,
        RemoteCommand::Stop,
        RemoteCommand::TogglePlayPause,
        RemoteCommand::NextTrack,
        RemoteCommand::PreviousTrack,
        RemoteCommand::SeekForward,
        RemoteCommand::SeekBackward,
        RemoteCommand::ChangePlaybackPosition,
    ];

    /// Live streams have no timeline and no track list, so skip and seek
    /// controls stay off for good.
    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            RemoteCommand::Play
                | RemoteCommand::Pause
                | RemoteCommand::Stop
                | RemoteCommand::TogglePlayPause
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteCommand::Play => "play",
            RemoteCommand::Pause => "pause",
            RemoteCommand::Stop => "stop",
            RemoteCommand::TogglePlayPause => "toggle-play-pause",
            RemoteCommand::NextTrack => "next-track",
            RemoteCommand::PreviousTrack => "previous-track",
            RemoteCommand::SeekForward => "seek-forward",
            RemoteCommand::SeekBackward => "seek-backward",
            RemoteCommand::ChangePlaybackPosition => "change-playback-position",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Playback phase of the session.
///
/// Transitions:
///   Idle -> Loading -> Playing <-> Paused
///   any -> Failed(reason)
///   Playing | Paused | Failed -> Idle (explicit stop)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Failed(String),
}

impl PlaybackPhase {
    /// True while a stream is attached (opening, playing or paused).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackPhase::Loading | PlaybackPhase::Playing | PlaybackPhase::Paused
        )
    }

    /// True when the now-playing surface should show something.
    pub fn is_presentable(&self) -> bool {
        matches!(self, PlaybackPhase::Playing | PlaybackPhase::Paused)
    }
}

/// What is playing right now.  Two tracks are the same track when title and
/// artist match; artwork does not take part in equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    #[serde(skip)]
    pub artwork: Option<Vec<u8>>,
}

impl PartialEq for TrackInfo {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist
    }
}

impl Eq for TrackInfo {}

impl TrackInfo {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            artwork: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty()
    }
}

/// Read-only snapshot of the playback session.  `rev` is a monotonically
/// increasing counter bumped every time the snapshot is republished, so
/// clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub selected_stream: StreamId,
    pub playing_stream: Option<StreamId>,
    pub phase: PlaybackPhase,
    pub current_track: TrackInfo,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Audio,
}

/// Station or track picture shown next to the now-playing text.  Only the
/// type goes over JSON; the bytes are served by `/api/now-playing/artwork`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Record handed to the now-playing surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: String,
    pub artwork: Option<Artwork>,
    pub is_live_stream: bool,
    pub playback_rate: f64,
    pub default_playback_rate: f64,
    pub media_type: MediaType,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// Frame as a big-endian `u32` length followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut frame = Vec::with_capacity(4 + json.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&json);
        Ok(frame)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(header) = data.get(..4) else {
            anyhow::bail!("Insufficient data for length header");
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        let Some(body) = data.get(4..4 + len) else {
            anyhow::bail!("Insufficient data for message");
        };
        let msg: Self = serde_json::from_slice(body)?;
        Ok((msg, 4 + len))
    }
}
