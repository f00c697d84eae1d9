use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    any::Any,
    sync::{Arc, Weak},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::audio::{pipeline::MediaPipeline, session::GuildSession, worker};
use crate::ui::view::Notice;

/// Sending side of the dispatch loop: "this room should (re)start playback".
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<GuildId>,
}

impl DispatchHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GuildId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn signal(&self, guild_id: GuildId) {
        if self.tx.send(guild_id).is_err() {
            warn!(guild_id = %guild_id, "Dispatcher detenido, señal descartada");
        }
    }
}

/// Process-wide loop that turns dispatch signals into worker runs.
///
/// Sessions are looked up through weak references; the player owns them.
pub struct Dispatcher {
    sessions: DashMap<GuildId, Weak<GuildSession>>,
    pipeline: Arc<dyn MediaPipeline>,
    handle: DispatchHandle,
    signals: Mutex<Option<mpsc::UnboundedReceiver<GuildId>>>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<dyn MediaPipeline>) -> Arc<Self> {
        let (handle, signals) = DispatchHandle::channel();
        Arc::new(Self {
            sessions: DashMap::new(),
            pipeline,
            handle,
            signals: Mutex::new(Some(signals)),
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn register(&self, session: &Arc<GuildSession>) {
        self.sessions.insert(session.guild_id(), Arc::downgrade(session));
    }

    pub fn forget(&self, guild_id: GuildId) {
        self.sessions.remove(&guild_id);
    }

    /// Spawns the dispatch loop. Only the first call starts anything.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let signals = self.signals.lock().take()?;
        info!("🚦 Dispatcher iniciado");
        Some(tokio::spawn(self.clone().run(signals)))
    }

    async fn run(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<GuildId>) {
        while let Some(guild_id) = signals.recv().await {
            self.launch(guild_id);
        }
        info!("🚦 Dispatcher detenido");
    }

    fn launch(&self, guild_id: GuildId) {
        let session = self.sessions.get(&guild_id).and_then(|entry| entry.upgrade());
        let Some(session) = session else {
            debug!(guild_id = %guild_id, "Señal para una sesión que ya no existe");
            return;
        };

        let run = tokio::spawn(worker::run(session.clone(), self.pipeline.clone()));

        // Supervisor: a crashed run must not leave the room stuck
        tokio::spawn(async move {
            let Err(e) = run.await else {
                return;
            };
            if e.is_panic() {
                error!(
                    guild_id = %guild_id,
                    "💥 La ejecución del reproductor falló: {}",
                    panic_message(e.into_panic())
                );
                session.recover_after_crash();
                // A stream the run had already started would keep playing
                session.transport().stop().await;
                session.announce(Notice::RunCrashed);
            } else {
                warn!(guild_id = %guild_id, "Ejecución cancelada: {}", e);
                session.recover_after_crash();
            }
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        pipeline::EncodedAudio,
        queue::QueueSnapshot,
        session::{Effect, RunState},
        transport::{StreamControl, StreamEnd, VoiceTransport},
    };
    use crate::error::Result;
    use crate::sources::{SourceType, TrackDescriptor};
    use crate::ui::view::{Announcer, NowPlayingView};
    use async_trait::async_trait;
    use serenity::model::id::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct PanickingPipeline;

    #[async_trait]
    impl MediaPipeline for PanickingPipeline {
        async fn fetch_and_encode(&self, _token: &CancellationToken, key: &str) -> Result<EncodedAudio> {
            panic!("decoder exploded on {}", key);
        }
    }

    #[derive(Default)]
    struct Connected {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl VoiceTransport for Connected {
        fn is_connected(&self) -> bool {
            true
        }

        async fn stream(&self, _audio: EncodedAudio, _control: StreamControl<'_>) -> Result<StreamEnd> {
            Ok(StreamEnd::Finished)
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingAnnouncer {
        notices: Mutex<Vec<Notice>>,
    }

    #[async_trait]
    impl Announcer for RecordingAnnouncer {
        async fn announce(&self, notice: Notice) {
            self.notices.lock().push(notice);
        }
    }

    struct NoView;

    #[async_trait]
    impl NowPlayingView for NoView {
        async fn refresh(&self, _snapshot: &QueueSnapshot) {}
        async fn destroy(&self) {}
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42_u8)), "unknown panic");
    }

    #[tokio::test]
    async fn panicking_run_is_contained_and_room_recovers() {
        let dispatcher = Dispatcher::new(Arc::new(PanickingPipeline));
        let announcer = Arc::new(RecordingAnnouncer::default());
        let transport = Arc::new(Connected::default());
        let session = GuildSession::new(
            GuildId::new(9),
            10,
            transport.clone(),
            announcer.clone(),
            dispatcher.handle(),
        );
        session.attach_view(Arc::new(NoView));
        dispatcher.register(&session);
        let loop_handle = dispatcher.start().unwrap();
        assert!(dispatcher.start().is_none());

        session
            .mutate(|q| {
                let track = TrackDescriptor::new("a", "a", "ytsearch1:a", SourceType::Search, UserId::new(1));
                Ok((q.append(vec![track])?, Effect::Keep))
            })
            .unwrap();

        for _ in 0..50 {
            if !announcer.notices.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(announcer.notices.lock().as_slice(), &[Notice::RunCrashed]);
        assert_eq!(session.run_state(), RunState::Idle);
        assert_eq!(session.read(|q| q.len()), 1);
        assert_eq!(transport.stops.load(Ordering::SeqCst), 1);
        assert!(!loop_handle.is_finished());
    }

    #[tokio::test]
    async fn signals_for_forgotten_rooms_are_ignored() {
        let dispatcher = Dispatcher::new(Arc::new(PanickingPipeline));
        dispatcher.start().unwrap();
        dispatcher.forget(GuildId::new(1));
        dispatcher.handle().signal(GuildId::new(1));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(dispatcher.sessions.is_empty());
    }
}
