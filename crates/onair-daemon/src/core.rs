/// PlaybackCore: single-owner event loop for the playback session.
///
/// Every input (client commands, opened streams, player events, polled
/// metadata, the now-playing tick) arrives as a `DaemonEvent` on one mpsc
/// channel.  PlaybackCore owns the session and the player resource
/// exclusively; spawned tasks only ever report back through the channel.
///
/// Asynchronous results carry the `generation` they were issued for.  Open,
/// switch, stop and failure all bump the generation, so a late result for an
/// abandoned stream is recognised and dropped (a stale opened player is
/// released on the spot).
use std::sync::Arc;
use std::time::Duration;

use onair_proto::catalog::{MetadataSource, StreamCatalog, StreamId};
use onair_proto::config::Config;
use onair_proto::protocol::{Command, Interruption, PlaybackPhase, SessionSnapshot, TrackInfo};
use onair_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MetadataError, PlaybackError};
use crate::metadata::{parse_inline_title, MetadataFetcher};
use crate::now_playing::{route_remote, NowPlayingPublisher, RemoteAction};
use crate::player::{PlayerBackend, PlayerEvent, PlayerResource};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PlaybackCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the control socket or HTTP API.
    ClientCommand(Command),
    /// An open issued for `generation` finished.
    StreamOpened {
        generation: u64,
        stream: StreamId,
        result: Result<Box<dyn PlayerResource>, PlaybackError>,
    },
    /// Forwarded from the live player of `generation`.
    Player { generation: u64, event: PlayerEvent },
    /// Result of the single polled fetch issued for `generation`.
    PolledMetadata {
        generation: u64,
        result: Result<TrackInfo, MetadataError>,
    },
    /// Periodic now-playing refresh while a player exists.
    NowPlayingTick { generation: u64 },
    /// Shutdown requested.
    Shutdown,
}

// ── PlaybackCore ──────────────────────────────────────────────────────────────

pub struct PlaybackCore {
    catalog: StreamCatalog,
    session: SessionSnapshot,
    generation: u64,
    /// The one live player resource, if any.
    player: Option<Box<dyn PlayerResource>>,
    tick_task: Option<AbortHandle>,
    player_events_task: Option<AbortHandle>,
    poll_cancel: Option<CancellationToken>,
    tick_interval: Duration,
    backend: Arc<dyn PlayerBackend>,
    fetcher: Arc<dyn MetadataFetcher>,
    publisher: NowPlayingPublisher,
    state_manager: Arc<StateManager>,
    /// Sender into our own event loop, handed to spawned tasks.
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl PlaybackCore {
    pub fn new(
        config: &Config,
        backend: Arc<dyn PlayerBackend>,
        fetcher: Arc<dyn MetadataFetcher>,
        publisher: NowPlayingPublisher,
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<DaemonEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let session = SessionSnapshot {
            selected_stream: StreamId::default(),
            ..SessionSnapshot::default()
        };
        Self {
            catalog: StreamCatalog::builtin(),
            session,
            generation: 0,
            player: None,
            tick_task: None,
            player_events_task: None,
            poll_cancel: None,
            tick_interval: Duration::from_millis(config.player.tick_interval_ms.max(1)),
            backend,
            fetcher,
            publisher,
            state_manager,
            event_tx,
            broadcast_tx,
        }
    }

    pub fn session(&self) -> &SessionSnapshot {
        &self.session
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("PlaybackCore: starting event loop");
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlaybackCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("PlaybackCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.stop().await;
        Ok(())
    }

    pub async fn handle_event(&mut self, evt: DaemonEvent) {
        match evt {
            DaemonEvent::ClientCommand(cmd) => {
                info!("PlaybackCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            DaemonEvent::StreamOpened {
                generation,
                stream,
                result,
            } => self.on_stream_opened(generation, stream, result).await,
            DaemonEvent::Player { generation, event } => {
                self.on_player_event(generation, event).await
            }
            DaemonEvent::PolledMetadata { generation, result } => {
                self.on_polled_metadata(generation, result).await
            }
            DaemonEvent::NowPlayingTick { generation } => {
                if generation == self.generation && self.player.is_some() {
                    self.publisher.refresh(&self.session).await;
                }
            }
            DaemonEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SelectStream { id } => self.select_stream(id).await,
            Command::Play => self.play().await,
            Command::Stop => self.stop().await,
            Command::TogglePlayPause => self.toggle_play_pause().await,
            Command::Remote { command } => match route_remote(command, &self.session.phase) {
                Ok(RemoteAction::Play) => self.play().await,
                Ok(RemoteAction::Stop) => self.stop().await,
                Err(e) => warn!("PlaybackCore: {}", e),
            },
            Command::Interruption { event } => self.handle_interruption(event).await,
            Command::GetState => {
                // State will be broadcast automatically
            }
        }
    }

    // ── operations ────────────────────────────────────────────────────────────

    pub async fn select_stream(&mut self, id: StreamId) {
        if self.catalog.get(id).is_none() {
            warn!("PlaybackCore: unknown stream {}", id);
            return;
        }
        let attached = self.session.playing_stream.map_or(true, |p| p == id);
        if self.session.selected_stream == id && attached {
            return;
        }
        self.session.selected_stream = id;

        let switching = matches!(
            self.session.phase,
            PlaybackPhase::Loading | PlaybackPhase::Playing
        ) && self.session.playing_stream != Some(id);

        if switching {
            info!(
                "PlaybackCore: switching {:?} → {}",
                self.session.playing_stream, id
            );
            self.release_player().await;
            self.session.current_track = TrackInfo::default();
            self.begin_open(id).await;
        } else {
            self.publish().await;
        }
    }

    pub async fn toggle_play_pause(&mut self) {
        if self.player.is_none() {
            self.play().await;
        } else if self.session.phase == PlaybackPhase::Playing {
            self.pause().await;
        } else {
            self.play().await;
        }
    }

    pub async fn play(&mut self) {
        if let Some(player) = self.player.as_mut() {
            match player.start().await {
                Ok(()) => {
                    self.session.phase = PlaybackPhase::Playing;
                    self.publish().await;
                }
                Err(e) => self.fail(e).await,
            }
            return;
        }

        if self.session.phase == PlaybackPhase::Loading {
            debug!("PlaybackCore: open already in flight");
            return;
        }
        self.begin_open(self.session.selected_stream).await;
    }

    pub async fn stop(&mut self) {
        info!("PlaybackCore: stopping playback");
        self.generation += 1;
        self.release_player().await;

        let changed = self.session.phase != PlaybackPhase::Idle
            || self.session.playing_stream.is_some()
            || !self.session.current_track.is_empty();
        self.session.phase = PlaybackPhase::Idle;
        self.session.playing_stream = None;
        self.session.current_track = TrackInfo::default();

        if changed {
            self.publish().await;
        } else {
            self.publisher.clear().await;
        }
    }

    async fn pause(&mut self) {
        if self.session.phase != PlaybackPhase::Playing {
            return;
        }
        let Some(player) = self.player.as_mut() else {
            return;
        };
        match player.pause().await {
            Ok(()) => {
                self.session.phase = PlaybackPhase::Paused;
                self.publish().await;
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn handle_interruption(&mut self, event: Interruption) {
        match event {
            Interruption::Began => {
                info!("PlaybackCore: interruption began");
                self.pause().await;
            }
            Interruption::Ended { should_resume } => {
                info!("PlaybackCore: interruption ended resume={}", should_resume);
                if should_resume && self.session.phase == PlaybackPhase::Paused {
                    self.play().await;
                }
            }
        }
    }

    // ── async result handlers ─────────────────────────────────────────────────

    async fn on_stream_opened(
        &mut self,
        generation: u64,
        stream: StreamId,
        result: Result<Box<dyn PlayerResource>, PlaybackError>,
    ) {
        if generation != self.generation || self.session.phase != PlaybackPhase::Loading {
            debug!(
                "PlaybackCore: dropping stale open of {} (gen {} current {})",
                stream, generation, self.generation
            );
            if let Ok(player) = result {
                player.release().await;
            }
            return;
        }

        let mut player = match result {
            Ok(p) => p,
            Err(e) => return self.fail(e).await,
        };
        if let Err(e) = player.start().await {
            player.release().await;
            return self.fail(e).await;
        }

        let events = player.take_events();
        self.player = Some(player);
        self.session.phase = PlaybackPhase::Playing;
        info!("PlaybackCore: playing {}", stream);

        self.start_tick(generation);
        if let Some(rx) = events {
            self.forward_player_events(generation, rx);
        }
        if self.metadata_source(stream) == Some(MetadataSource::Polled) {
            self.start_poll(generation);
        }
        self.publish().await;
    }

    async fn on_player_event(&mut self, generation: u64, event: PlayerEvent) {
        if generation != self.generation || !self.session.phase.is_presentable() {
            debug!("PlaybackCore: dropping player event for gen {}", generation);
            return;
        }
        match event {
            PlayerEvent::Metadata(raw) => {
                let inline = self
                    .session
                    .playing_stream
                    .and_then(|id| self.metadata_source(id))
                    == Some(MetadataSource::Inline);
                if !inline {
                    return;
                }
                let track = parse_inline_title(&raw);
                if track != self.session.current_track {
                    info!("PlaybackCore: track {:?} - {:?}", track.artist, track.title);
                    self.session.current_track = track;
                    self.publish().await;
                }
            }
            PlayerEvent::Ended { reason } => {
                warn!("PlaybackCore: stream ended unexpectedly ({})", reason);
                self.fail(PlaybackError::StreamUnplayable).await;
            }
        }
    }

    async fn on_polled_metadata(
        &mut self,
        generation: u64,
        result: Result<TrackInfo, MetadataError>,
    ) {
        if generation != self.generation || !self.session.phase.is_presentable() {
            debug!("PlaybackCore: dropping polled metadata for gen {}", generation);
            return;
        }
        match result {
            Ok(track) => {
                if track != self.session.current_track {
                    self.session.current_track = track;
                    self.publish().await;
                }
            }
            Err(e) => warn!("[poll] {}", e),
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn metadata_source(&self, id: StreamId) -> Option<MetadataSource> {
        self.catalog.get(id).map(|s| s.metadata)
    }

    async fn begin_open(&mut self, id: StreamId) {
        let Some(stream) = self.catalog.get(id).cloned() else {
            warn!("PlaybackCore: unknown stream {}", id);
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        self.session.playing_stream = Some(id);
        self.session.phase = PlaybackPhase::Loading;
        self.session.last_error = None;
        self.publish().await;

        info!("PlaybackCore: opening {} ({})", stream.display_title, stream.url);
        let backend = Arc::clone(&self.backend);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = backend.open(&stream).await;
            let opened = DaemonEvent::StreamOpened {
                generation,
                stream: stream.id,
                result,
            };
            if let Err(mpsc::error::SendError(DaemonEvent::StreamOpened {
                result: Ok(player),
                ..
            })) = tx.send(opened).await
            {
                // core is gone; nobody else will free the instance
                player.release().await;
            }
        });
    }

    async fn fail(&mut self, e: PlaybackError) {
        warn!("PlaybackCore: playback failed: {}", e);
        self.generation += 1;
        self.release_player().await;
        self.session.phase = PlaybackPhase::Failed(e.to_string());
        self.session.last_error = Some(e.to_string());
        self.session.playing_stream = None;
        self.session.current_track = TrackInfo::default();
        self.publish().await;
    }

    /// Tear down the live player and everything hanging off it.
    async fn release_player(&mut self) {
        if let Some(h) = self.tick_task.take() {
            h.abort();
        }
        if let Some(h) = self.player_events_task.take() {
            h.abort();
        }
        if let Some(token) = self.poll_cancel.take() {
            token.cancel();
        }
        if let Some(player) = self.player.take() {
            player.release().await;
        }
    }

    fn start_tick(&mut self, generation: u64) {
        let tx = self.event_tx.clone();
        let period = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(DaemonEvent::NowPlayingTick { generation }).await.is_err() {
                    break;
                }
            }
        });
        self.tick_task = Some(handle.abort_handle());
    }

    fn forward_player_events(&mut self, generation: u64, mut rx: mpsc::Receiver<PlayerEvent>) {
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if tx.send(DaemonEvent::Player { generation, event }).await.is_err() {
                    break;
                }
            }
        });
        self.player_events_task = Some(handle.abort_handle());
    }

    fn start_poll(&mut self, generation: u64) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => debug!("[poll] cancelled"),
                result = fetcher.fetch() => {
                    let _ = tx.send(DaemonEvent::PolledMetadata { generation, result }).await;
                }
            }
        });
        self.poll_cancel = Some(token);
    }

    /// Push the session to the shared state, notify clients, and refresh the
    /// now-playing surface.
    async fn publish(&mut self) {
        self.session.rev = self
            .state_manager
            .publish_session(self.session.clone())
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        self.publisher.refresh(&self.session).await;
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────
