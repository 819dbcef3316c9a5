mod core;
mod error;
mod http;
mod metadata;
mod mpv;
mod notifications;
mod now_playing;
mod player;
mod socket;

use onair_proto::catalog::{StreamCatalog, StreamId};
use onair_proto::config::Config;
use onair_proto::state::StateManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    NowPlayingUpdated,
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = onair_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,onair_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let station_artwork = match &config.player.artwork_path {
        Some(path) => match now_playing::load_station_artwork(path) {
            Ok(art) => Some(art),
            Err(e) => {
                warn!("Could not load station artwork {:?}: {}", path, e);
                None
            }
        },
        None => None,
    };

    let state_manager = Arc::new(StateManager::new(StreamId::default()));

    // Event channel: all external inputs funnel into PlaybackCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let surface = Arc::new(now_playing::StateSurface::new(
        state_manager.clone(),
        broadcast_tx.clone(),
    ));
    let publisher =
        now_playing::NowPlayingPublisher::new(surface, StreamCatalog::builtin(), station_artwork);
    let backend = Arc::new(mpv::MpvBackend::new(&config.player));
    let fetcher = Arc::new(metadata::HttpMetadataFetcher::new(
        &config.metadata,
        &config.player.user_agent,
    )?);

    let playback_core = core::PlaybackCore::new(
        &config,
        backend,
        fetcher,
        publisher,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        onair_proto::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    // Weekly live-show alerts; the center must outlive the daemon loop
    let center = Arc::new(notifications::DesktopNotificationCenter::new(
        config.notifications.enabled,
    ));
    let scheduler = notifications::NotificationScheduler::new(center.clone());
    tokio::spawn(async move {
        if let Ok(n) = scheduler.schedule_weekly().await {
            info!("Scheduled {} live-show alerts", n);
        }
    });

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    playback_core.run(event_rx).await?;

    drop(center);
    Ok(())
}
