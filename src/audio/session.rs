use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{
    dispatcher::DispatchHandle,
    queue::{PlaybackQueue, QueueSnapshot, VoiceState},
    transport::{Interrupts, VoiceTransport},
};
use crate::error::{PlaybackError, Result};
use crate::sources::TrackDescriptor;
use crate::ui::view::{Announcer, Notice, NowPlayingView};

/// Whether a worker run is queued or running for the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// A dispatch signal was sent and the run has not started yet.
    Pending,
    Active,
    /// The last run failed on the current track. Only a mutation that
    /// changes the current track dispatches again.
    Stalled,
}

/// What a queue mutation means for the track currently streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The current track is unchanged; let it play.
    Keep,
    /// The current track changed; the active stream must stop.
    Restart,
}

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Interrupted,
    Failed,
    Cancelled,
}

/// What a starting run should play.
#[derive(Debug)]
pub struct RunPlan {
    pub track: TrackDescriptor,
    pub token: CancellationToken,
}

struct SessionState {
    queue: PlaybackQueue,
    run: RunState,
    closed: bool,
}

/// Playback state of one room.
///
/// Every transition goes through the `state` mutex: command mutations,
/// run entry and run exit. A dispatch signal is only sent on the
/// `Idle -> Pending` transition, so a room never has more than one run
/// pending or active.
pub struct GuildSession {
    guild_id: GuildId,
    state: Mutex<SessionState>,
    interrupt_tx: mpsc::Sender<()>,
    interrupts: AsyncMutex<Interrupts>,
    paused: watch::Sender<bool>,
    transport: Arc<dyn VoiceTransport>,
    announcer: Arc<dyn Announcer>,
    view: Mutex<Option<Arc<dyn NowPlayingView>>>,
    dispatch: DispatchHandle,
    shutdown: CancellationToken,
}

impl GuildSession {
    pub fn new(
        guild_id: GuildId,
        capacity: usize,
        transport: Arc<dyn VoiceTransport>,
        announcer: Arc<dyn Announcer>,
        dispatch: DispatchHandle,
    ) -> Arc<Self> {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
        let (paused, _) = watch::channel(false);

        Arc::new(Self {
            guild_id,
            state: Mutex::new(SessionState {
                queue: PlaybackQueue::new(capacity),
                run: RunState::Idle,
                closed: false,
            }),
            interrupt_tx,
            interrupts: AsyncMutex::new(interrupt_rx),
            paused,
            transport,
            announcer,
            view: Mutex::new(None),
            dispatch,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    pub fn paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().run
    }

    /// Applies `op` to the queue and settles the run state in the same
    /// critical section.
    pub fn mutate<T>(
        &self,
        op: impl FnOnce(&mut PlaybackQueue) -> Result<(T, Effect)>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PlaybackError::conflict("not connected to a voice channel"));
        }

        let (value, effect) = op(&mut state.queue)?;
        self.settle(&mut state, effect);
        Ok(value)
    }

    /// Read-only access to the queue.
    pub fn read<T>(&self, f: impl FnOnce(&PlaybackQueue) -> T) -> T {
        f(&self.state.lock().queue)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().queue.snapshot()
    }

    fn settle(&self, state: &mut SessionState, effect: Effect) {
        self.paused.send_replace(state.queue.state() == VoiceState::Paused);

        match state.run {
            RunState::Idle => {
                if state.queue.state() == VoiceState::Playing && state.queue.current().is_some() {
                    state.run = RunState::Pending;
                    self.dispatch.signal(self.guild_id);
                }
            }
            RunState::Stalled if effect == Effect::Restart => {
                if state.queue.state() == VoiceState::Playing && state.queue.current().is_some() {
                    state.run = RunState::Pending;
                    self.dispatch.signal(self.guild_id);
                } else {
                    state.run = RunState::Idle;
                }
            }
            RunState::Active if effect == Effect::Restart => self.interrupt(),
            // A pending run reads the latest queue when it starts
            _ => {}
        }
    }

    fn interrupt(&self) {
        match self.interrupt_tx.try_send(()) {
            Ok(()) => debug!(guild_id = %self.guild_id, "⏹️ Interrupción enviada"),
            // One unconsumed interrupt already covers this one
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!(guild_id = %self.guild_id, "Interrupción ya pendiente")
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!(guild_id = %self.guild_id, "Canal de interrupción cerrado")
            }
        }
    }

    /// Exclusive access to the interrupt receiver for one run.
    pub async fn lock_interrupts(&self) -> MutexGuard<'_, Interrupts> {
        self.interrupts.lock().await
    }

    /// Claims the room for a run. `None` means there is nothing to do.
    pub fn begin_run(&self, interrupts: &mut Interrupts) -> Option<RunPlan> {
        let mut state = self.state.lock();

        // Interrupts aimed at an earlier run
        while interrupts.try_recv().is_ok() {}

        if state.run != RunState::Pending {
            debug!(guild_id = %self.guild_id, "Señal sin ejecución pendiente ({:?})", state.run);
            return None;
        }

        if state.closed || !self.transport.is_connected() {
            state.run = RunState::Idle;
            return None;
        }

        let current = state.queue.current().cloned();
        match current {
            Some(track) => {
                state.run = RunState::Active;
                Some(RunPlan {
                    track,
                    token: self.shutdown.child_token(),
                })
            }
            None => {
                state.run = RunState::Idle;
                None
            }
        }
    }

    /// Releases the room after a run and decides whether another one follows.
    pub fn finish_run(&self, end: RunEnd, interrupts: &mut Interrupts) {
        let mut state = self.state.lock();

        // An interrupt raced with the end of the run: the queue moved on
        let interrupted = interrupts.try_recv().is_ok();
        let end = match end {
            RunEnd::Completed | RunEnd::Failed if interrupted => RunEnd::Interrupted,
            other => other,
        };

        if state.closed {
            state.run = RunState::Idle;
            return;
        }

        let mut finished = false;
        match end {
            RunEnd::Completed => {
                if state.queue.advance().is_ok() {
                    state.run = RunState::Pending;
                    self.dispatch.signal(self.guild_id);
                } else {
                    info!(guild_id = %self.guild_id, "📭 Cola terminada");
                    state.queue.reset();
                    state.run = RunState::Idle;
                    finished = true;
                }
            }
            RunEnd::Interrupted => {
                if state.queue.current().is_some() {
                    state.run = RunState::Pending;
                    self.dispatch.signal(self.guild_id);
                } else {
                    state.run = RunState::Idle;
                }
            }
            RunEnd::Failed => {
                debug!(guild_id = %self.guild_id, "Sesión detenida en una pista fallida");
                state.run = RunState::Stalled;
            }
            RunEnd::Cancelled => state.run = RunState::Idle,
        }

        self.paused.send_replace(state.queue.state() == VoiceState::Paused);
        drop(state);

        if finished {
            self.destroy_view();
        }
    }

    /// Puts the room back to idle after a run died unexpectedly. The queue
    /// is left as it was so the next mutation can dispatch again.
    pub fn recover_after_crash(&self) {
        let mut state = self.state.lock();
        state.run = RunState::Idle;
    }

    pub fn attach_view(&self, view: Arc<dyn NowPlayingView>) {
        let previous = self.view.lock().replace(view);
        if let Some(previous) = previous {
            tokio::spawn(async move { previous.destroy().await });
        }
        self.refresh_view();
    }

    /// Refreshes the attached view in the background.
    pub fn refresh_view(&self) {
        let Some(view) = self.view.lock().clone() else {
            return;
        };
        let snapshot = self.snapshot();
        tokio::spawn(async move { view.refresh(&snapshot).await });
    }

    pub fn destroy_view(&self) {
        if let Some(view) = self.view.lock().take() {
            tokio::spawn(async move { view.destroy().await });
        }
    }

    pub fn announce(&self, notice: Notice) {
        let announcer = self.announcer.clone();
        tokio::spawn(async move { announcer.announce(notice).await });
    }

    /// Stops playback for good. Later mutations fail and no run starts.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.reset();
        }
        self.shutdown.cancel();
        self.transport.stop().await;
        self.destroy_view();
        info!(guild_id = %self.guild_id, "👋 Sesión cerrada");
    }
}
