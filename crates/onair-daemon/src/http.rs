use crate::core::DaemonEvent;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use onair_proto::catalog::{external_links, ExternalLink, StreamCatalog, StreamDescriptor, StreamId};
use onair_proto::protocol::{Command, Interruption, NowPlayingInfo, RemoteCommand, SessionSnapshot};
use onair_proto::state::StateManager;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Deserialize)]
struct ResumeQuery {
    #[serde(default)]
    resume: bool,
}

pub fn build_router(app_state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/now-playing", get(get_now_playing))
        .route("/api/now-playing/artwork", get(get_artwork))
        .route("/api/streams", get(get_streams))
        .route("/api/links", get(get_links))
        .route("/api/select/:id", post(select_stream))
        .route("/api/play", post(play))
        .route("/api/stop", post(stop))
        .route("/api/toggle", post(toggle))
        .route("/api/remote/:command", post(remote))
        .route("/api/interruption/begin", post(interruption_begin))
        .route("/api/interruption/end", post(interruption_end))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = build_router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward command to core");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn get_now_playing(State(state): State<HttpState>) -> Json<Option<NowPlayingInfo>> {
    Json(state.state_manager.now_playing().await)
}

/// Picture of the current record.  The JSON record only carries its type.
async fn get_artwork(State(state): State<HttpState>) -> Response {
    match state.state_manager.now_playing().await.and_then(|i| i.artwork) {
        Some(art) => ([(header::CONTENT_TYPE, art.mime_type)], art.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_streams() -> Json<Vec<StreamDescriptor>> {
    Json(StreamCatalog::builtin().iter().cloned().collect())
}

async fn get_links() -> Json<Vec<ExternalLink>> {
    Json(external_links())
}

async fn select_stream(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    let Some(id) = StreamId::parse(&id) else {
        return StatusCode::NOT_FOUND;
    };
    info!("HTTP API: Select {}", id);
    forward(&state, Command::SelectStream { id }).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Play");
    forward(&state, Command::Play).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    forward(&state, Command::Stop).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle");
    forward(&state, Command::TogglePlayPause).await
}

async fn remote(State(state): State<HttpState>, Path(command): Path<String>) -> StatusCode {
    let Some(command) = RemoteCommand::parse(&command) else {
        return StatusCode::NOT_FOUND;
    };
    if !command.is_enabled() {
        return StatusCode::FORBIDDEN;
    }
    info!("HTTP API: Remote {}", command.as_str());
    forward(&state, Command::Remote { command }).await
}

async fn interruption_begin(State(state): State<HttpState>) -> StatusCode {
    forward(
        &state,
        Command::Interruption {
            event: Interruption::Began,
        },
    )
    .await
}

async fn interruption_end(
    State(state): State<HttpState>,
    Query(query): Query<ResumeQuery>,
) -> StatusCode {
    forward(
        &state,
        Command::Interruption {
            event: Interruption::Ended {
                should_resume: query.resume,
            },
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, mpsc::Receiver<DaemonEvent>, Arc<StateManager>) {
        let state_manager = Arc::new(StateManager::new(StreamId::default()));
        let (event_tx, event_rx) = mpsc::channel(8);
        let router = build_router(HttpState {
            state_manager: state_manager.clone(),
            event_tx,
        });
        (router, event_rx, state_manager)
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn next_command(rx: &mut mpsc::Receiver<DaemonEvent>) -> Command {
        match rx.try_recv() {
            Ok(DaemonEvent::ClientCommand(cmd)) => cmd,
            other => panic!("expected a client command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_state() {
        let (router, _rx, _) = app();
        let (status, body) = call(router, "GET", "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let snap: SessionSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snap.selected_stream, StreamId::WkncHd2);
        assert_eq!(snap.rev, 1);
    }

    #[tokio::test]
    async fn test_now_playing_is_null_when_idle() {
        let (router, _rx, _) = app();
        let (status, body) = call(router, "GET", "/api/now-playing").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"null");
    }

    #[tokio::test]
    async fn test_artwork_bytes_are_served() {
        let (router, _rx, state_manager) = app();
        let (status, _) = call(router.clone(), "GET", "/api/now-playing/artwork").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];
        state_manager
            .set_now_playing(Some(NowPlayingInfo {
                title: "WKNC HD1".to_string(),
                artist: "Radio".to_string(),
                artwork: Some(onair_proto::protocol::Artwork {
                    mime_type: "image/png".to_string(),
                    bytes: png.clone(),
                }),
                is_live_stream: true,
                playback_rate: 1.0,
                default_playback_rate: 1.0,
                media_type: onair_proto::protocol::MediaType::Audio,
            }))
            .await;

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/now-playing/artwork")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.to_vec(), png);
    }

    #[tokio::test]
    async fn test_streams_and_links() {
        let (router, _rx, _) = app();
        let (_, body) = call(router.clone(), "GET", "/api/streams").await;
        let streams: Vec<StreamDescriptor> = serde_json::from_slice(&body).unwrap();
        assert_eq!(streams.len(), 3);

        let (_, body) = call(router, "GET", "/api/links").await;
        let links: Vec<ExternalLink> = serde_json::from_slice(&body).unwrap();
        assert!(links.iter().any(|l| l.url == "https://t.me/radio_t_chat"));
    }

    #[tokio::test]
    async fn test_select_forwards_command() {
        let (router, mut rx, _) = app();
        let (status, _) = call(router.clone(), "POST", "/api/select/radio-t").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::SelectStream {
                id: StreamId::RadioT
            }
        );

        let (status, _) = call(router, "POST", "/api/select/bbc").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_command_routing() {
        let (router, mut rx, _) = app();
        let (status, _) = call(router.clone(), "POST", "/api/remote/toggle-play-pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::Remote {
                command: RemoteCommand::TogglePlayPause
            }
        );

        let (status, _) = call(router.clone(), "POST", "/api/remote/next-track").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(router, "POST", "/api/remote/eject").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interruption_end_query() {
        let (router, mut rx, _) = app();
        call(router.clone(), "POST", "/api/interruption/end?resume=true").await;
        assert_eq!(
            next_command(&mut rx),
            Command::Interruption {
                event: Interruption::Ended {
                    should_resume: true
                }
            }
        );
        call(router, "POST", "/api/interruption/end").await;
        assert_eq!(
            next_command(&mut rx),
            Command::Interruption {
                event: Interruption::Ended {
                    should_resume: false
                }
            }
        );
    }

    #[tokio::test]
    async fn test_core_gone_is_server_error() {
        let (router, rx, _) = app();
        drop(rx);
        let (status, _) = call(router, "POST", "/api/play").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
