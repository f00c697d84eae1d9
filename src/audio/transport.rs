use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::audio::pipeline::EncodedAudio;
use crate::error::Result;

/// Receiving half of a room's interrupt signal.
pub type Interrupts = mpsc::Receiver<()>;

/// Control inputs handed to the transport for one stream.
pub struct StreamControl<'a> {
    /// Any message means "stop this stream now".
    pub interrupts: &'a mut Interrupts,
    /// Latest pause state of the room; applied while streaming.
    pub paused: watch::Receiver<bool>,
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Finished,
    Interrupted,
}

/// A live voice connection for one room.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Plays `audio` until it ends naturally or an interrupt arrives.
    ///
    /// The transport owns `audio` for the duration of the stream, so its
    /// backing file is removed once this returns.
    async fn stream(&self, audio: EncodedAudio, control: StreamControl<'_>) -> Result<StreamEnd>;

    /// Stops whatever is playing. Used on teardown.
    async fn stop(&self);
}
