use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use onair_proto::protocol::{Broadcast, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use onair_proto::state::StateManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    let count = connected.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("Client {} connected from {} ({} connected)", id, peer, count);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let connected = connected.clone();

                    tokio::spawn(async move {
                        handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                        let count = connected.fetch_sub(1, Ordering::SeqCst) - 1;
                        info!("Client {} disconnected ({} connected)", id, count);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

pub async fn handle_client<S>(
    stream: S,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        if !drain_frames(&mut read_buf, client_id, &event_tx).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::NowPlayingUpdated) => {
                        let info = state_manager.now_playing().await;
                        Message::Broadcast(Broadcast::NowPlaying { info }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Forward every complete command in `read_buf`.  Returns false when the
/// client must be dropped.
async fn drain_frames(
    read_buf: &mut Vec<u8>,
    client_id: usize,
    event_tx: &mpsc::Sender<DaemonEvent>,
) -> bool {
    loop {
        if let Some(len) = declared_body_len(read_buf).filter(|l| *l > MAX_FRAME_LEN) {
            warn!(
                "Client {} announced a {} byte frame (limit {}), disconnecting",
                client_id, len, MAX_FRAME_LEN
            );
            return false;
        }
        let Some(frame_len) = complete_frame_len(read_buf) else {
            return true;
        };
        match Message::decode(read_buf) {
            Ok((Message::Command(cmd), _)) => {
                info!("Client {} sent command: {:?}", client_id, cmd);
                if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                    warn!("DaemonEvent channel closed");
                    return false;
                }
            }
            Ok((_, _)) => {}
            Err(e) => warn!("Client {} sent a bad frame: {}", client_id, e),
        }
        read_buf.drain(..frame_len);
    }
}

/// Body length announced by the header at the front of `buf`.
fn declared_body_len(buf: &[u8]) -> Option<usize> {
    let header = buf.get(..4)?;
    Some(u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize)
}

/// Length of the first frame in `buf` when it has fully arrived.
fn complete_frame_len(buf: &[u8]) -> Option<usize> {
    let total = 4 + declared_body_len(buf)?;
    (buf.len() >= total).then_some(total)
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
