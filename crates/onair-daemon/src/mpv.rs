/// mpv player backend.
///
/// Every `open` spawns one mpv process with its own IPC socket, so an
/// instance maps one-to-one onto a `PlayerResource` and releasing it really
/// frees the audio output.
///
/// ```text
///   MpvBackend::open()
///         │
///         ├── spawn mpv --idle --pause --input-ipc-server=<socket>
///         ├── writer_task   ← PendingRequest via mpsc, serialised → socket
///         ├── reader_task   ← JSON lines from socket
///         │                      ├── response (request_id) → oneshot reply
///         │                      └── event / property-change → MpvEvent
///         ├── loadfile <url>, wait for file-loaded | end-file
///         └── translate_events: MpvEvent → PlayerEvent (icy-title, end-file)
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use onair_proto::catalog::StreamDescriptor;
use onair_proto::config::PlayerConfig;
use onair_proto::platform;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::player::{PlayerBackend, PlayerEvent, PlayerResource};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── request ids / observed properties ────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_ICY_TITLE: u64 = 1;
/// Some mpv builds only expose the title under `icy-title`.
pub const OBS_ICY_TITLE_DIRECT: u64 = 2;

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` of an end-file event.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task of one mpv instance.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({
            "command": command,
            "request_id": req_id,
        }))?;
        payload.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn observe_metadata(&self) {
        let props = [
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
            (OBS_ICY_TITLE_DIRECT, "icy-title"),
        ];
        for (id, name) in props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── backend ───────────────────────────────────────────────────────────────────

pub struct MpvBackend {
    user_agent: String,
    network_timeout_secs: u64,
    next_instance: AtomicU64,
}

impl MpvBackend {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            network_timeout_secs: config.network_timeout_secs,
            next_instance: AtomicU64::new(1),
        }
    }

    fn command(&self, socket_name: &str) -> anyhow::Result<tokio::process::Command> {
        let binary = platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause=yes")
            .arg("--quiet")
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!("--network-timeout={}", self.network_timeout_secs))
            .arg(platform::mpv_socket_arg(socket_name))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }

    #[cfg(unix)]
    async fn spawn(
        &self,
        socket_name: &str,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<(tokio::process::Child, MpvHandle)> {
        let socket_path = std::path::PathBuf::from(socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning instance on {}", socket_name);
        let mut child = self.command(socket_name)?.spawn()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
            if child.try_wait()?.is_some() {
                anyhow::bail!("mpv exited during start-up");
            }
        }
        if !socket_path.exists() {
            let _ = child.kill().await;
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = match UnixStream::connect(&socket_path).await {
            Ok(s) => s,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e.into());
            }
        };
        let (read_half, write_half) = stream.into_split();
        Ok((child, start_io_tasks(read_half, write_half, event_tx)))
    }

    #[cfg(windows)]
    async fn spawn(
        &self,
        socket_name: &str,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<(tokio::process::Child, MpvHandle)> {
        info!("mpv: spawning instance on pipe {}", socket_name);
        let mut child = self.command(socket_name)?.spawn()?;

        let pipe_path = format!(r"\\.\pipe\{}", socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                let (read_half, write_half) = tokio::io::split(client);
                return Ok((child, start_io_tasks(read_half, write_half, event_tx)));
            }
        }
        let _ = child.kill().await;
        anyhow::bail!("mpv named pipe did not appear")
    }
}

#[async_trait]
impl PlayerBackend for MpvBackend {
    async fn open(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Box<dyn PlayerResource>, PlaybackError> {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let socket_name = platform::mpv_socket_name(instance);
        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);

        let (process, handle) = self.spawn(&socket_name, mpv_tx).await.map_err(|e| {
            warn!("mpv: could not start player for '{}': {}", stream.display_title, e);
            PlaybackError::AudioDeviceActivationFailed
        })?;

        let mut player = MpvPlayer {
            process: Some(process),
            handle,
            socket_name,
            events: None,
            translator: None,
        };

        match wait_until_loaded(&player.handle, &stream.url, &mut mpv_rx).await {
            Ok(()) => {
                info!("mpv: '{}' loaded", stream.display_title);
                let (tx, rx) = mpsc::channel(32);
                player.translator = Some(tokio::spawn(translate_events(mpv_rx, tx)).abort_handle());
                player.events = Some(rx);
                Ok(Box::new(player))
            }
            Err(e) => {
                warn!("mpv: '{}' failed to load: {}", stream.display_title, e);
                Box::new(player).release().await;
                Err(PlaybackError::StreamUnplayable)
            }
        }
    }
}

/// Issue `loadfile` and block until mpv reports the file loaded, or that
/// it gave up on it.
async fn wait_until_loaded(
    handle: &MpvHandle,
    url: &str,
    events: &mut mpsc::Receiver<MpvEvent>,
) -> anyhow::Result<()> {
    handle.observe_metadata().await;
    handle.load_stream(url).await?;

    while let Some(evt) = events.recv().await {
        match evt.event_name() {
            Some("file-loaded") => return Ok(()),
            Some("end-file") => {
                anyhow::bail!("end-file reason={}", evt.end_reason().unwrap_or("unknown"))
            }
            _ => {}
        }
    }
    anyhow::bail!("mpv IPC connection closed while loading")
}

/// Turn raw mpv events of a loaded instance into `PlayerEvent`s.
async fn translate_events(mut rx: mpsc::Receiver<MpvEvent>, tx: mpsc::Sender<PlayerEvent>) {
    let mut last_title: Option<String> = None;

    while let Some(evt) = rx.recv().await {
        let out = if let Some((id, data)) = evt.as_property_change() {
            if id != OBS_ICY_TITLE && id != OBS_ICY_TITLE_DIRECT {
                continue;
            }
            // Filter trivial values like "-" or whitespace
            let title = data
                .as_str()
                .filter(|t| !t.trim().trim_matches('-').trim().is_empty())
                .map(str::to_string);
            if title.is_none() || title == last_title {
                continue;
            }
            last_title = title.clone();
            title.map(PlayerEvent::Metadata)
        } else if evt.event_name() == Some("end-file") {
            match evt.end_reason() {
                Some(reason @ ("error" | "network" | "eof")) => Some(PlayerEvent::Ended {
                    reason: reason.to_string(),
                }),
                _ => None,
            }
        } else {
            None
        };

        if let Some(out) = out {
            if tx.send(out).await.is_err() {
                break;
            }
        }
    }
    debug!("mpv: event translator exiting");
}

// ── player resource ───────────────────────────────────────────────────────────

pub struct MpvPlayer {
    process: Option<tokio::process::Child>,
    handle: MpvHandle,
    socket_name: String,
    events: Option<mpsc::Receiver<PlayerEvent>>,
    translator: Option<tokio::task::AbortHandle>,
}

#[async_trait]
impl PlayerResource for MpvPlayer {
    async fn start(&mut self) -> Result<(), PlaybackError> {
        self.handle.set_pause(false).await.map_err(|e| {
            warn!("mpv: unpause failed: {}", e);
            PlaybackError::AudioDeviceActivationFailed
        })
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.handle.set_pause(true).await.map_err(|e| {
            warn!("mpv: pause failed: {}", e);
            PlaybackError::StreamUnplayable
        })
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<PlayerEvent>> {
        self.events.take()
    }

    async fn release(mut self: Box<Self>) {
        if let Some(t) = self.translator.take() {
            t.abort();
        }
        let _ = self.handle.send(json!(["quit"])).await;
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
        debug!("mpv: released instance {}", self.socket_name);
    }
}

// ── IO tasks ──────────────────────────────────────────────────────────────────

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", why)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    let Some(tx) = pending.lock().await.remove(&req_id) else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                        continue;
                    };
                    let result = match val["error"].as_str() {
                        Some("success") => Ok(val),
                        other => Err(anyhow::anyhow!(
                            "mpv error: {}",
                            other.unwrap_or("unknown error")
                        )),
                    };
                    let _ = tx.send(result);
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    // Nobody listens any more; keep draining replies.
                    debug!("mpv reader: event receiver gone");
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
