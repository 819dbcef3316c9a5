//! Seam between the playback core and whatever actually decodes audio.
//!
//! A `PlayerBackend` opens a stream and hands back a `PlayerResource` that
//! is ready to start.  The core owns at most one resource at a time and
//! always calls `release` on it before dropping it.

use async_trait::async_trait;
use onair_proto::catalog::StreamDescriptor;
use tokio::sync::mpsc;

use crate::error::PlaybackError;

/// Things a live player reports on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Raw inline title string, e.g. `"Artist - Title"`.
    Metadata(String),
    /// Delivery stopped without being asked to (server closed, network).
    Ended { reason: String },
}

#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Open `stream` and wait until it is playable.  Must not start audible
    /// output; the core calls `start` once it decides to keep the result.
    async fn open(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Box<dyn PlayerResource>, PlaybackError>;
}

#[async_trait]
pub trait PlayerResource: Send {
    /// Begin or resume audible output.
    async fn start(&mut self) -> Result<(), PlaybackError>;

    /// Suspend output while keeping the connection.
    async fn pause(&mut self) -> Result<(), PlaybackError>;

    /// Event stream of this instance.  Yields `Some` once.
    fn take_events(&mut self) -> Option<mpsc::Receiver<PlayerEvent>>;

    /// Stop delivery and free everything the instance holds.
    async fn release(self: Box<Self>);
}

impl std::fmt::Debug for dyn PlayerResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlayerResource")
    }
}
