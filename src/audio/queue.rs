use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PlaybackError, Result};
use crate::sources::TrackDescriptor;

/// Voice state of a room's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    NotPlaying,
    Playing,
    Paused,
}

/// Outcome of [`PlaybackQueue::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// 1-based position of the first appended track (1 is the current track).
    pub position: usize,
    pub added: usize,
    /// Tracks dropped because the queue hit its capacity.
    pub truncated: usize,
}

/// Outcome of [`PlaybackQueue::remove`].
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub track: TrackDescriptor,
    pub was_current: bool,
}

/// Ordered tracks of one room with a cursor on the current one.
///
/// Tracks before the cursor are history (they are what `rewind` walks back
/// to). Positions handed in by callers are 1-based and relative to the
/// cursor, so position 1 is always the current track.
///
/// Invariants:
/// - `NotPlaying` iff the sequence is empty, and then the cursor is 0.
/// - otherwise `cursor < tracks.len()`.
#[derive(Debug)]
pub struct PlaybackQueue {
    tracks: Vec<TrackDescriptor>,
    cursor: usize,
    state: VoiceState,
    capacity: usize,
}

impl PlaybackQueue {
    /// `capacity` bounds the current track plus everything after it.
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: Vec::new(),
            cursor: 0,
            state: VoiceState::NotPlaying,
            capacity: capacity.max(1),
        }
    }

    pub fn append(&mut self, tracks: Vec<TrackDescriptor>) -> Result<Appended> {
        let room = self.capacity.saturating_sub(self.upcoming_len());
        if room == 0 {
            return Err(PlaybackError::conflict(format!(
                "the queue is full ({} tracks)",
                self.capacity
            )));
        }
        if tracks.is_empty() {
            return Err(PlaybackError::NotFound("tracks to add".into()));
        }

        let position = self.upcoming_len() + 1;
        let requested = tracks.len();
        let added = requested.min(room);
        self.tracks.extend(tracks.into_iter().take(added));

        if self.state == VoiceState::NotPlaying {
            self.state = VoiceState::Playing;
        }

        info!("➕ Agregadas {} canciones a la cola (posición {})", added, position);
        self.debug_check();
        Ok(Appended {
            position,
            added,
            truncated: requested - added,
        })
    }

    /// Inserts a track right after the current one. Returns its position.
    pub fn insert_next(&mut self, track: TrackDescriptor) -> Result<usize> {
        if self.state == VoiceState::NotPlaying {
            return self.append(vec![track]).map(|appended| appended.position);
        }
        if self.upcoming_len() >= self.capacity {
            return Err(PlaybackError::conflict(format!(
                "the queue is full ({} tracks)",
                self.capacity
            )));
        }

        debug!("⏭️ Insertando a continuación: {}", track.title());
        self.tracks.insert(self.cursor + 1, track);
        self.debug_check();
        Ok(2)
    }

    pub fn advance(&mut self) -> Result<&TrackDescriptor> {
        if !self.has_next() {
            return Err(PlaybackError::conflict("there is no next track"));
        }
        self.cursor += 1;
        self.state = VoiceState::Playing;
        self.debug_check();
        Ok(&self.tracks[self.cursor])
    }

    pub fn rewind(&mut self) -> Result<&TrackDescriptor> {
        if !self.has_previous() {
            return Err(PlaybackError::conflict("there is no previous track"));
        }
        self.cursor -= 1;
        self.state = VoiceState::Playing;
        self.debug_check();
        Ok(&self.tracks[self.cursor])
    }

    /// Exchanges two positions. Returns true when the current track changed.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<bool> {
        let first = self.index_of(a)?;
        let second = self.index_of(b)?;
        if first == second {
            return Ok(false);
        }

        self.tracks.swap(first, second);
        debug!("🔄 Intercambiadas posiciones {} y {}", a, b);
        self.debug_check();
        Ok(first == self.cursor || second == self.cursor)
    }

    /// Deletes the track at `position`.
    ///
    /// Removing the current track makes the next one current; when there is
    /// no next one the whole queue is reset.
    pub fn remove(&mut self, position: usize) -> Result<Removed> {
        let index = self.index_of(position)?;
        let track = self.tracks.remove(index);
        let was_current = index == self.cursor;

        if self.cursor >= self.tracks.len() {
            self.reset();
        }

        debug!("❌ Eliminada de la cola: {}", track.title());
        self.debug_check();
        Ok(Removed { track, was_current })
    }

    /// Drops everything after the current track. Returns how many went.
    pub fn clear_upcoming(&mut self) -> usize {
        if self.state == VoiceState::NotPlaying {
            return 0;
        }
        let removed = self.tracks.len() - (self.cursor + 1);
        self.tracks.truncate(self.cursor + 1);
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        removed
    }

    /// Permutes the tracks after the current one. Returns how many moved.
    pub fn shuffle_upcoming(&mut self) -> usize {
        if self.state == VoiceState::NotPlaying {
            return 0;
        }
        let upcoming = &mut self.tracks[self.cursor + 1..];
        upcoming.shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada ({} canciones)", upcoming.len());
        upcoming.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.cursor = 0;
        self.state = VoiceState::NotPlaying;
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            VoiceState::Playing => {
                self.state = VoiceState::Paused;
                Ok(())
            }
            VoiceState::Paused => Err(PlaybackError::conflict("playback is already paused")),
            VoiceState::NotPlaying => Err(PlaybackError::conflict("nothing is playing")),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            VoiceState::Paused => {
                self.state = VoiceState::Playing;
                Ok(())
            }
            VoiceState::Playing => Err(PlaybackError::conflict("playback is not paused")),
            VoiceState::NotPlaying => Err(PlaybackError::conflict("nothing is playing")),
        }
    }

    pub fn current(&self) -> Option<&TrackDescriptor> {
        match self.state {
            VoiceState::NotPlaying => None,
            _ => self.tracks.get(self.cursor),
        }
    }

    /// The current track followed by everything after it.
    pub fn upcoming(&self) -> &[TrackDescriptor] {
        match self.state {
            VoiceState::NotPlaying => &[],
            _ => &self.tracks[self.cursor..],
        }
    }

    pub fn has_next(&self) -> bool {
        self.cursor + 1 < self.tracks.len()
    }

    pub fn has_previous(&self) -> bool {
        self.cursor > 0
    }

    pub fn upcoming_len(&self) -> usize {
        self.upcoming().len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let upcoming = self.upcoming();
        QueueSnapshot {
            current: upcoming.first().cloned(),
            upcoming: upcoming.iter().skip(1).cloned().collect(),
            played: self.cursor,
            state: self.state,
            total_duration: upcoming.iter().filter_map(|t| t.duration()).sum(),
        }
    }

    fn index_of(&self, position: usize) -> Result<usize> {
        let upcoming = self.upcoming_len();
        if position == 0 || position > upcoming {
            return Err(PlaybackError::InvalidPosition { position, upcoming });
        }
        Ok(self.cursor + position - 1)
    }

    fn debug_check(&self) {
        debug_assert!(
            (self.state == VoiceState::NotPlaying) == self.tracks.is_empty(),
            "voice state {:?} with {} tracks",
            self.state,
            self.tracks.len()
        );
        debug_assert!(self.tracks.is_empty() || self.cursor < self.tracks.len());
        debug_assert!(!self.tracks.is_empty() || self.cursor == 0);
    }
}

/// Read-only copy of a queue for rendering.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<TrackDescriptor>,
    /// Tracks after the current one, in play order.
    pub upcoming: Vec<TrackDescriptor>,
    /// Number of tracks already played (the cursor).
    pub played: usize,
    pub state: VoiceState,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    /// One page of the upcoming list. Pages are 1-based; entries carry their
    /// queue position (the first upcoming track is position 2).
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        let per_page = per_page.max(1);
        let total_pages = self.upcoming.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;

        QueuePage {
            items: self
                .upcoming
                .iter()
                .enumerate()
                .skip(start)
                .take(per_page)
                .map(|(i, track)| (i + 2, track.clone()))
                .collect(),
            current_page,
            total_pages,
            total_items: self.upcoming.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<(usize, TrackDescriptor)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
