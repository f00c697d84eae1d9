use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    input::File,
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::audio::{
    pipeline::EncodedAudio,
    transport::{StreamControl, StreamEnd, VoiceTransport},
};
use crate::error::{PlaybackError, Result};

type EndSender = Arc<Mutex<Option<oneshot::Sender<std::result::Result<(), String>>>>>;

/// Voice transport backed by the songbird call of one guild.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            manager,
            guild_id,
            current: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl VoiceTransport for SongbirdTransport {
    fn is_connected(&self) -> bool {
        self.manager.get(self.guild_id).is_some()
    }

    async fn stream(&self, audio: EncodedAudio, mut control: StreamControl<'_>) -> Result<StreamEnd> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| PlaybackError::Transport("no voice connection".into()))?;

        let (tx, mut ended) = oneshot::channel();
        let notifier = TrackEndNotifier {
            tx: Arc::new(Mutex::new(Some(tx))),
        };

        let handle = {
            let mut call = call.lock().await;
            call.play_only_input(File::new(audio.path().to_path_buf()).into())
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| PlaybackError::Transport(format!("Error al agregar event handler: {}", e)))?;
        }
        if *control.paused.borrow_and_update() {
            let _ = handle.pause();
        }
        *self.current.lock() = Some(handle.clone());
        debug!(guild_id = %self.guild_id, "🔊 Transmitiendo {}", audio.path().display());

        let outcome = loop {
            tokio::select! {
                result = &mut ended => break match result {
                    Ok(Ok(())) => Ok(StreamEnd::Finished),
                    Ok(Err(reason)) => Err(PlaybackError::Transport(reason)),
                    Err(_) => Err(PlaybackError::Transport("track handle dropped".into())),
                },
                Some(()) = control.interrupts.recv() => {
                    let _ = handle.stop();
                    break Ok(StreamEnd::Interrupted);
                }
                Ok(()) = control.paused.changed() => {
                    let paused = *control.paused.borrow_and_update();
                    let result = if paused { handle.pause() } else { handle.play() };
                    if let Err(e) = result {
                        warn!(guild_id = %self.guild_id, "No se pudo cambiar la pausa: {}", e);
                    }
                }
            }
        };

        self.current.lock().take();
        // The encoded file goes away with `audio`, after songbird is done with it
        drop(audio);
        outcome
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
        }
    }
}

#[derive(Clone)]
struct TrackEndNotifier {
    tx: EndSender,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let outcome = match ctx {
            EventContext::Track(tracks) => match tracks.first().map(|(state, _)| &state.playing) {
                Some(PlayMode::Errored(e)) => Err(e.to_string()),
                _ => Ok(()),
            },
            _ => Ok(()),
        };

        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
        Some(Event::Cancel)
    }
}
