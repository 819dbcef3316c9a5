//! Now-playing publisher and remote command routing.
//!
//! The publisher turns a session snapshot into the record shown by
//! now-playing surfaces (HTTP API, control socket clients).  Outside
//! Playing/Paused the record is cleared rather than left stale.

use async_trait::async_trait;
use onair_proto::catalog::StreamCatalog;
use onair_proto::protocol::{
    Artwork, MediaType, NowPlayingInfo, PlaybackPhase, RemoteCommand, SessionSnapshot,
};
use onair_proto::state::StateManager;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::BroadcastMessage;

const FALLBACK_ARTIST: &str = "Radio";

#[async_trait]
pub trait NowPlayingSurface: Send + Sync {
    /// Last write wins.  `None` clears the surface.
    async fn publish(&self, info: Option<NowPlayingInfo>);
}

/// Surface backed by the shared `StateManager`; clients see it on
/// `/api/now-playing` and as `NowPlaying` broadcasts.
pub struct StateSurface {
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl StateSurface {
    pub fn new(
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            state_manager,
            broadcast_tx,
        }
    }
}

#[async_trait]
impl NowPlayingSurface for StateSurface {
    async fn publish(&self, info: Option<NowPlayingInfo>) {
        if self.state_manager.set_now_playing(info).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::NowPlayingUpdated);
        }
    }
}

pub struct NowPlayingPublisher {
    surface: Arc<dyn NowPlayingSurface>,
    catalog: StreamCatalog,
    station_artwork: Option<Artwork>,
}

impl NowPlayingPublisher {
    pub fn new(
        surface: Arc<dyn NowPlayingSurface>,
        catalog: StreamCatalog,
        station_artwork: Option<Artwork>,
    ) -> Self {
        Self {
            surface,
            catalog,
            station_artwork,
        }
    }

    pub async fn refresh(&self, snapshot: &SessionSnapshot) {
        let info = self.build(snapshot);
        debug!("now playing: {:?}", info.as_ref().map(|i| (&i.title, &i.artist)));
        self.surface.publish(info).await;
    }

    pub async fn clear(&self) {
        self.surface.publish(None).await;
    }

    pub fn build(&self, snapshot: &SessionSnapshot) -> Option<NowPlayingInfo> {
        if !snapshot.phase.is_presentable() {
            return None;
        }
        let stream = self.catalog.get(snapshot.playing_stream?)?;
        let track = &snapshot.current_track;

        let title = if track.title.is_empty() {
            stream.display_title.clone()
        } else {
            track.title.clone()
        };
        let artist = if track.artist.is_empty() {
            FALLBACK_ARTIST.to_string()
        } else {
            track.artist.clone()
        };
        let artwork = match &track.artwork {
            Some(bytes) => Some(Artwork {
                mime_type: sniff_mime(bytes).to_string(),
                bytes: bytes.clone(),
            }),
            None => self.station_artwork.clone(),
        };

        Some(NowPlayingInfo {
            title,
            artist,
            artwork,
            is_live_stream: true,
            playback_rate: 1.0,
            default_playback_rate: 1.0,
            media_type: MediaType::Audio,
        })
    }
}

/// Read the configured station picture once at start-up.
pub fn load_station_artwork(path: &Path) -> anyhow::Result<Artwork> {
    let bytes = std::fs::read(path)?;
    info!("Loaded station artwork from {} ({} bytes)", path.display(), bytes.len());
    Ok(Artwork {
        mime_type: sniff_mime(&bytes).to_string(),
        bytes,
    })
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

// ── remote commands ───────────────────────────────────────────────────────────

/// What the playback core should do for a remote button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    Play,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("remote command '{}' is disabled", .0.as_str())]
pub struct CommandDisabled(pub RemoteCommand);

/// Map a remote button onto a core operation.  A live stream cannot be
/// paused from the outside, so pause ends the session like stop does.
pub fn route_remote(
    command: RemoteCommand,
    phase: &PlaybackPhase,
) -> Result<RemoteAction, CommandDisabled> {
    match command {
        RemoteCommand::Play => Ok(RemoteAction::Play),
        RemoteCommand::Pause | RemoteCommand::Stop => Ok(RemoteAction::Stop),
        RemoteCommand::TogglePlayPause => match phase {
            PlaybackPhase::Playing => Ok(RemoteAction::Stop),
            _ => Ok(RemoteAction::Play),
        },
        disabled => Err(CommandDisabled(disabled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onair_proto::catalog::StreamId;
    use onair_proto::protocol::TrackInfo;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSurface {
        pub published: Mutex<Vec<Option<NowPlayingInfo>>>,
    }

    #[async_trait]
    impl NowPlayingSurface for RecordingSurface {
        async fn publish(&self, info: Option<NowPlayingInfo>) {
            self.published.lock().await.push(info);
        }
    }

    fn playing(track: TrackInfo) -> SessionSnapshot {
        SessionSnapshot {
            playing_stream: Some(StreamId::WkncHd1),
            phase: PlaybackPhase::Playing,
            current_track: track,
            ..SessionSnapshot::default()
        }
    }

    fn publisher(artwork: Option<Artwork>) -> (NowPlayingPublisher, Arc<RecordingSurface>) {
        let surface = Arc::new(RecordingSurface::default());
        let publisher = NowPlayingPublisher::new(surface.clone(), StreamCatalog::builtin(), artwork);
        (publisher, surface)
    }

    #[test]
    fn test_build_falls_back_to_stream_title() {
        let (publisher, _) = publisher(None);
        let info = publisher.build(&playing(TrackInfo::default())).unwrap();
        assert_eq!(info.title, "WKNC HD1");
        assert_eq!(info.artist, "Radio");
        assert!(info.is_live_stream);
        assert_eq!(info.playback_rate, 1.0);
        assert_eq!(info.media_type, MediaType::Audio);
    }

    #[test]
    fn test_build_uses_track_and_station_artwork() {
        let art = Artwork {
            mime_type: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let (publisher, _) = publisher(Some(art.clone()));
        let info = publisher
            .build(&playing(TrackInfo::new("Song", "Band")))
            .unwrap();
        assert_eq!((info.title.as_str(), info.artist.as_str()), ("Song", "Band"));
        assert_eq!(info.artwork, Some(art));
    }

    #[test]
    fn test_build_clears_outside_playing_and_paused() {
        let (publisher, _) = publisher(None);
        for phase in [
            PlaybackPhase::Idle,
            PlaybackPhase::Loading,
            PlaybackPhase::Failed("stream unavailable".into()),
        ] {
            let snap = SessionSnapshot {
                phase,
                ..playing(TrackInfo::default())
            };
            assert!(publisher.build(&snap).is_none());
        }
        let paused = SessionSnapshot {
            phase: PlaybackPhase::Paused,
            ..playing(TrackInfo::default())
        };
        assert!(publisher.build(&paused).is_some());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (publisher, surface) = publisher(None);
        let snap = playing(TrackInfo::new("Song", "Band"));
        publisher.refresh(&snap).await;
        publisher.refresh(&snap).await;
        let published = surface.published.lock().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1]);
    }

    #[tokio::test]
    async fn test_state_surface_broadcasts_only_changes() {
        let sm = Arc::new(StateManager::new(StreamId::WkncHd1));
        let (tx, mut rx) = broadcast::channel(8);
        let surface = StateSurface::new(sm.clone(), tx);
        let info = NowPlayingPublisher::new(
            Arc::new(RecordingSurface::default()),
            StreamCatalog::builtin(),
            None,
        )
        .build(&playing(TrackInfo::default()));

        surface.publish(info.clone()).await;
        surface.publish(info.clone()).await;
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::NowPlayingUpdated)));
        assert!(rx.try_recv().is_err());
        assert_eq!(sm.now_playing().await, info);
    }

    #[test]
    fn test_route_remote() {
        let playing = PlaybackPhase::Playing;
        let idle = PlaybackPhase::Idle;
        assert_eq!(route_remote(RemoteCommand::Play, &idle), Ok(RemoteAction::Play));
        assert_eq!(route_remote(RemoteCommand::Pause, &playing), Ok(RemoteAction::Stop));
        assert_eq!(route_remote(RemoteCommand::Stop, &playing), Ok(RemoteAction::Stop));
        assert_eq!(
            route_remote(RemoteCommand::TogglePlayPause, &playing),
            Ok(RemoteAction::Stop)
        );
        assert_eq!(
            route_remote(RemoteCommand::TogglePlayPause, &PlaybackPhase::Paused),
            Ok(RemoteAction::Play)
        );
        for cmd in RemoteCommand::ALL.into_iter().filter(|c| !c.is_enabled()) {
            assert_eq!(route_remote(cmd, &playing), Err(CommandDisabled(cmd)));
        }
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89a"), "application/octet-stream");
    }
}
