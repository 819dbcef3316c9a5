use crate::catalog::StreamId;
use crate::protocol::{NowPlayingInfo, SessionSnapshot};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Published view of the daemon: the latest session snapshot plus the
/// record currently shown on the now-playing surface.
///
/// The playback core is the only writer of the snapshot and the now-playing
/// publisher the only writer of the record.  Readers (HTTP API, control
/// socket) get clones.  Nothing here is persisted.
#[derive(Debug, Default)]
struct Published {
    session: SessionSnapshot,
    now_playing: Option<NowPlayingInfo>,
}

pub struct StateManager {
    state: Arc<RwLock<Published>>,
}

impl StateManager {
    pub fn new(selected_stream: StreamId) -> Self {
        let published = Published {
            session: SessionSnapshot {
                rev: 1,
                selected_stream,
                ..SessionSnapshot::default()
            },
            now_playing: None,
        };
        Self {
            state: Arc::new(RwLock::new(published)),
        }
    }

    pub async fn get_state(&self) -> SessionSnapshot {
        self.state.read().await.session.clone()
    }

    pub async fn now_playing(&self) -> Option<NowPlayingInfo> {
        self.state.read().await.now_playing.clone()
    }

    /// Replace the session snapshot.  The stored `rev` is always the
    /// previous one plus one; whatever `rev` the caller passed is ignored.
    /// Returns the new revision.
    pub async fn publish_session(&self, mut snapshot: SessionSnapshot) -> u64 {
        let mut state = self.state.write().await;
        snapshot.rev = state.session.rev + 1;
        state.session = snapshot;
        state.session.rev
    }

    /// Replace the now-playing record.  Returns false when the record was
    /// already identical, so callers can skip the broadcast.
    pub async fn set_now_playing(&self, info: Option<NowPlayingInfo>) -> bool {
        let mut state = self.state.write().await;
        if state.now_playing == info {
            return false;
        }
        state.now_playing = info;
        state.session.rev += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MediaType, PlaybackPhase};

    fn info(title: &str) -> NowPlayingInfo {
        NowPlayingInfo {
            title: title.to_string(),
            artist: "Radio".to_string(),
            artwork: None,
            is_live_stream: true,
            playback_rate: 1.0,
            default_playback_rate: 1.0,
            media_type: MediaType::Audio,
        }
    }

    #[tokio::test]
    async fn test_publish_bumps_rev() {
        let sm = StateManager::new(StreamId::RadioT);
        let first = sm.get_state().await;
        assert_eq!(first.rev, 1);
        assert_eq!(first.selected_stream, StreamId::RadioT);

        let rev = sm
            .publish_session(SessionSnapshot {
                rev: 999,
                phase: PlaybackPhase::Loading,
                ..first
            })
            .await;
        assert_eq!(rev, 2);
        assert_eq!(sm.get_state().await.phase, PlaybackPhase::Loading);
    }

    #[tokio::test]
    async fn test_identical_now_playing_is_not_a_change() {
        let sm = StateManager::new(StreamId::default());
        assert!(sm.set_now_playing(Some(info("A"))).await);
        let rev = sm.get_state().await.rev;
        assert!(!sm.set_now_playing(Some(info("A"))).await);
        assert_eq!(sm.get_state().await.rev, rev);
        assert!(sm.set_now_playing(None).await);
        assert!(sm.now_playing().await.is_none());
    }
}
