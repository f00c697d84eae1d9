use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    audio::{
        dispatcher::Dispatcher,
        queue::{Appended, QueueSnapshot, VoiceState},
        session::{Effect, GuildSession},
        transport::VoiceTransport,
    },
    error::{PlaybackError, Result},
    sources::{CollectionInfo, TrackDescriptor, TrackResolver},
    storage::{PlaylistLibrary, PlaylistSummary, SavedTrack},
    ui::view::{Announcer, NowPlayingView},
};

/// What `/play` added to the queue.
#[derive(Debug, Clone)]
pub struct Queued {
    pub first: TrackDescriptor,
    pub appended: Appended,
    pub collection: Option<CollectionInfo>,
}

/// Command-facing operations over every room the bot is connected to.
pub struct AudioPlayer {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<TrackResolver>,
    library: Arc<PlaylistLibrary>,
    max_queue_size: usize,
}

impl AudioPlayer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<TrackResolver>,
        library: Arc<PlaylistLibrary>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher,
            resolver,
            library,
            max_queue_size,
        }
    }

    /// Returns the room's session, creating it after a successful voice join.
    pub fn open_session(
        &self,
        guild_id: GuildId,
        transport: Arc<dyn VoiceTransport>,
        announcer: Arc<dyn Announcer>,
    ) -> Arc<GuildSession> {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    occupied.insert(self.build_session(guild_id, transport, announcer));
                }
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(self.build_session(guild_id, transport, announcer))
                .clone(),
        }
    }

    fn build_session(
        &self,
        guild_id: GuildId,
        transport: Arc<dyn VoiceTransport>,
        announcer: Arc<dyn Announcer>,
    ) -> Arc<GuildSession> {
        let session = GuildSession::new(
            guild_id,
            self.max_queue_size,
            transport,
            announcer,
            self.dispatcher.handle(),
        );
        self.dispatcher.register(&session);
        info!(guild_id = %guild_id, "🎧 Sesión de reproducción creada");
        session
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    pub fn session(&self, guild_id: GuildId) -> Result<Arc<GuildSession>> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| PlaybackError::conflict("not connected to a voice channel"))
    }

    /// Tears the room down: pending runs are cancelled and the view removed.
    pub async fn close_session(&self, guild_id: GuildId) {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return;
        };
        self.dispatcher.forget(guild_id);
        session.close().await;
    }

    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("🛑 Cerrando {} sesiones", guilds.len());
        for guild_id in guilds {
            self.close_session(guild_id).await;
        }
    }

    /// Resolves `query` and appends the result to the room's queue.
    pub async fn play(&self, guild_id: GuildId, query: &str, user: UserId) -> Result<Queued> {
        // Fail before touching any catalog
        let session = self.session(guild_id)?;
        let resolved = self.resolver.resolve(query, user).await?;

        let first = resolved
            .tracks
            .first()
            .cloned()
            .ok_or_else(|| PlaybackError::NotFound(format!("tracks for `{}`", query)))?;
        let appended = session.mutate(|q| Ok((q.append(resolved.tracks)?, Effect::Keep)))?;

        Ok(Queued {
            first,
            appended,
            collection: resolved.collection,
        })
    }

    pub fn enqueue(&self, guild_id: GuildId, tracks: Vec<TrackDescriptor>) -> Result<Appended> {
        self.session(guild_id)?
            .mutate(|q| Ok((q.append(tracks)?, Effect::Keep)))
    }

    /// Moves to the next track. Returns the track that is now current.
    pub fn skip(&self, guild_id: GuildId) -> Result<TrackDescriptor> {
        let track = self
            .session(guild_id)?
            .mutate(|q| Ok((q.advance()?.clone(), Effect::Restart)))?;
        info!(guild_id = %guild_id, "⏭️ Saltando a: {}", track.title());
        Ok(track)
    }

    pub fn rewind(&self, guild_id: GuildId) -> Result<TrackDescriptor> {
        let track = self
            .session(guild_id)?
            .mutate(|q| Ok((q.rewind()?.clone(), Effect::Restart)))?;
        info!(guild_id = %guild_id, "⏮️ Volviendo a: {}", track.title());
        Ok(track)
    }

    pub fn pause(&self, guild_id: GuildId) -> Result<()> {
        let session = self.session(guild_id)?;
        session.mutate(|q| Ok((q.pause()?, Effect::Keep)))?;
        session.refresh_view();
        info!(guild_id = %guild_id, "⏸️ Reproducción pausada");
        Ok(())
    }

    pub fn resume(&self, guild_id: GuildId) -> Result<()> {
        let session = self.session(guild_id)?;
        session.mutate(|q| Ok((q.resume()?, Effect::Keep)))?;
        session.refresh_view();
        info!(guild_id = %guild_id, "▶️ Reproducción reanudada");
        Ok(())
    }

    /// Empties the queue and ends the current stream. Returns how many
    /// tracks were dropped.
    pub fn stop(&self, guild_id: GuildId) -> Result<usize> {
        let session = self.session(guild_id)?;
        let dropped = session.mutate(|q| {
            if q.state() == VoiceState::NotPlaying {
                return Err(PlaybackError::conflict("nothing is playing"));
            }
            let dropped = q.upcoming_len();
            q.reset();
            Ok((dropped, Effect::Restart))
        })?;
        session.destroy_view();
        info!(guild_id = %guild_id, "⏹️ Reproducción detenida ({} canciones)", dropped);
        Ok(dropped)
    }

    pub fn swap(&self, guild_id: GuildId, a: usize, b: usize) -> Result<()> {
        let session = self.session(guild_id)?;
        session.mutate(|q| {
            let changed_current = q.swap(a, b)?;
            let effect = if changed_current { Effect::Restart } else { Effect::Keep };
            Ok(((), effect))
        })?;
        session.refresh_view();
        Ok(())
    }

    pub fn remove(&self, guild_id: GuildId, position: usize) -> Result<TrackDescriptor> {
        let session = self.session(guild_id)?;
        let (removed, emptied) = session.mutate(|q| {
            let removed = q.remove(position)?;
            let effect = if removed.was_current { Effect::Restart } else { Effect::Keep };
            Ok(((removed.track, q.is_empty()), effect))
        })?;

        if emptied {
            session.destroy_view();
        } else {
            session.refresh_view();
        }
        Ok(removed)
    }

    pub fn clear(&self, guild_id: GuildId) -> Result<usize> {
        let session = self.session(guild_id)?;
        let cleared = session.mutate(|q| Ok((q.clear_upcoming(), Effect::Keep)))?;
        session.refresh_view();
        Ok(cleared)
    }

    pub fn shuffle(&self, guild_id: GuildId) -> Result<usize> {
        let session = self.session(guild_id)?;
        let shuffled = session.mutate(|q| {
            if q.upcoming_len() < 3 {
                return Err(PlaybackError::conflict("not enough upcoming tracks to shuffle"));
            }
            Ok((q.shuffle_upcoming(), Effect::Keep))
        })?;
        session.refresh_view();
        Ok(shuffled)
    }

    /// Plays a random track from the user's saved playlists right now.
    ///
    /// The track goes right after the current one and becomes current; on
    /// an idle room it is simply queued.
    pub async fn spice(&self, guild_id: GuildId, user: UserId) -> Result<TrackDescriptor> {
        let session = self.session(guild_id)?;
        let track = self.library.random_track(user).await?.into_descriptor(user);
        debug!(guild_id = %guild_id, "🌶️ Spice: {}", track.title());

        session.mutate(|q| {
            let playing = q.current().is_some();
            q.insert_next(track.clone())?;
            if playing {
                q.advance()?;
                Ok(((), Effect::Restart))
            } else {
                Ok(((), Effect::Keep))
            }
        })?;
        Ok(track)
    }

    /// Saves the current track and everything after it as a named playlist.
    pub async fn save_playlist(&self, guild_id: GuildId, user: UserId, name: &str) -> Result<usize> {
        let tracks: Vec<SavedTrack> = self
            .session(guild_id)?
            .read(|q| q.upcoming().iter().map(SavedTrack::from).collect());
        if tracks.is_empty() {
            return Err(PlaybackError::conflict("the queue is empty"));
        }

        let count = tracks.len();
        self.library.create(user, name, tracks).await?;
        Ok(count)
    }

    pub async fn load_playlist(&self, guild_id: GuildId, user: UserId, name: &str) -> Result<Appended> {
        let session = self.session(guild_id)?;
        let tracks: Vec<TrackDescriptor> = self
            .library
            .get(user, name)
            .await?
            .into_iter()
            .map(|saved| saved.into_descriptor(user))
            .collect();
        if tracks.is_empty() {
            return Err(PlaybackError::NotFound(format!("tracks in playlist `{}`", name)));
        }

        session.mutate(|q| Ok((q.append(tracks)?, Effect::Keep)))
    }

    pub async fn delete_playlist(&self, user: UserId, name: &str) -> Result<()> {
        self.library.delete(user, name).await
    }

    pub async fn list_playlists(&self, user: UserId) -> Result<Vec<PlaylistSummary>> {
        self.library.list(user).await
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Result<QueueSnapshot> {
        Ok(self.session(guild_id)?.snapshot())
    }

    pub fn attach_view(&self, guild_id: GuildId, view: Arc<dyn NowPlayingView>) -> Result<()> {
        self.session(guild_id)?.attach_view(view);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        pipeline::{EncodedAudio, MediaPipeline},
        session::RunState,
        transport::{StreamControl, StreamEnd},
    };
    use crate::sources::{CatalogTrack, MockVideoCatalog, SourceType};
    use crate::storage::JsonPlaylistStore;
    use crate::ui::view::Notice;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const GUILD: GuildId = GuildId::new(7);
    const USER: UserId = UserId::new(42);

    struct NeverPipeline;

    #[async_trait]
    impl MediaPipeline for NeverPipeline {
        async fn fetch_and_encode(&self, _token: &CancellationToken, _key: &str) -> Result<EncodedAudio> {
            Err(PlaybackError::Cancelled)
        }
    }

    struct Connected;

    #[async_trait]
    impl VoiceTransport for Connected {
        fn is_connected(&self) -> bool {
            true
        }

        async fn stream(&self, _audio: EncodedAudio, _control: StreamControl<'_>) -> Result<StreamEnd> {
            Ok(StreamEnd::Finished)
        }

        async fn stop(&self) {}
    }

    struct Quiet;

    #[async_trait]
    impl Announcer for Quiet {
        async fn announce(&self, _notice: Notice) {}
    }

    fn search_result(title: &str) -> CatalogTrack {
        CatalogTrack {
            id: format!("youtube:{}", title),
            title: title.to_string(),
            artist: None,
            thumbnail: None,
            duration: Some(Duration::from_secs(180)),
            lookup_key: format!("https://www.youtube.com/watch?v={}", title),
        }
    }

    async fn player(catalog: MockVideoCatalog) -> (AudioPlayer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path().to_path_buf()).await.unwrap();
        let library = PlaylistLibrary::new(Arc::new(store), Duration::from_secs(30));
        // The dispatch loop is never started: runs stay pending
        let dispatcher = Dispatcher::new(Arc::new(NeverPipeline));
        let resolver = TrackResolver::new(Arc::new(catalog), None, 2, 100);
        let player = AudioPlayer::new(dispatcher, Arc::new(resolver), Arc::new(library), 5);
        (player, dir)
    }

    fn tracks(ids: &[&str]) -> Vec<TrackDescriptor> {
        ids.iter()
            .map(|id| TrackDescriptor::new(*id, *id, format!("ytsearch1:{}", id), SourceType::Search, USER))
            .collect()
    }

    fn ids(player: &AudioPlayer) -> Vec<String> {
        player
            .session(GUILD)
            .unwrap()
            .read(|q| q.upcoming().iter().map(|t| t.id().to_string()).collect())
    }

    #[tokio::test]
    async fn commands_without_a_session_are_conflicts() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;

        let err = player.play(GUILD, "never gonna", USER).await.unwrap_err();
        assert_eq!(err, PlaybackError::conflict("not connected to a voice channel"));
        assert!(player.skip(GUILD).unwrap_err().is_notice());
    }

    #[tokio::test]
    async fn play_resolves_searches_and_queues_them() {
        let mut catalog = MockVideoCatalog::new();
        catalog
            .expect_search()
            .withf(|query| query == "never gonna")
            .times(1)
            .returning(|_| Ok(search_result("rick")));
        let (player, _dir) = player(catalog).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));

        let queued = player.play(GUILD, "never gonna", USER).await.unwrap();

        assert_eq!(queued.first.title(), "rick");
        assert_eq!(queued.appended.position, 1);
        assert!(queued.collection.is_none());
        assert_eq!(player.session(GUILD).unwrap().run_state(), RunState::Pending);
    }

    #[tokio::test]
    async fn skip_rewind_and_stop_move_the_cursor() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        player.enqueue(GUILD, tracks(&["a", "b", "c"])).unwrap();

        assert_eq!(player.skip(GUILD).unwrap().id(), "b");
        assert_eq!(player.rewind(GUILD).unwrap().id(), "a");
        assert!(player.rewind(GUILD).unwrap_err().is_notice());

        assert_eq!(player.stop(GUILD).unwrap(), 3);
        assert_eq!(player.snapshot(GUILD).unwrap().state, VoiceState::NotPlaying);
        assert!(player.stop(GUILD).is_err());
    }

    #[tokio::test]
    async fn swap_remove_and_clear_edit_upcoming_positions() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        player.enqueue(GUILD, tracks(&["a", "b", "c", "d"])).unwrap();

        player.swap(GUILD, 2, 4).unwrap();
        assert_eq!(ids(&player), vec!["a", "d", "c", "b"]);

        assert_eq!(player.remove(GUILD, 3).unwrap().id(), "c");
        assert_eq!(
            player.remove(GUILD, 9).unwrap_err(),
            PlaybackError::InvalidPosition { position: 9, upcoming: 3 }
        );

        assert_eq!(player.clear(GUILD).unwrap(), 2);
        assert_eq!(ids(&player), vec!["a"]);
    }

    #[tokio::test]
    async fn pause_and_resume_reject_repeats() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        player.enqueue(GUILD, tracks(&["a"])).unwrap();

        player.pause(GUILD).unwrap();
        assert!(player.pause(GUILD).is_err());
        player.resume(GUILD).unwrap();
        assert!(player.resume(GUILD).is_err());
    }

    #[tokio::test]
    async fn playlists_round_trip_through_the_library() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        player.enqueue(GUILD, tracks(&["a", "b"])).unwrap();

        assert_eq!(player.save_playlist(GUILD, USER, "Road Trip").await.unwrap(), 2);
        let listed = player.list_playlists(USER).await.unwrap();
        assert_eq!(listed[0].name, "road trip");
        assert_eq!(listed[0].tracks, 2);

        let appended = player.load_playlist(GUILD, USER, "road trip").await.unwrap();
        assert_eq!(appended.position, 3);
        assert_eq!(ids(&player), vec!["a", "b", "a", "b"]);

        player.delete_playlist(USER, "road trip").await.unwrap();
        assert!(matches!(
            player.load_playlist(GUILD, USER, "road trip").await,
            Err(PlaybackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn spice_jumps_to_a_saved_track() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        assert!(matches!(player.spice(GUILD, USER).await, Err(PlaybackError::NotFound(_))));

        player.enqueue(GUILD, tracks(&["saved"])).unwrap();
        player.save_playlist(GUILD, USER, "mix").await.unwrap();
        player.enqueue(GUILD, tracks(&["b"])).unwrap();

        let spiced = player.spice(GUILD, USER).await.unwrap();
        assert_eq!(spiced.id(), "saved");
        let session = player.session(GUILD).unwrap();
        assert_eq!(session.read(|q| q.cursor()), 1);
        assert_eq!(ids(&player), vec!["saved", "b"]);
    }

    #[tokio::test]
    async fn closing_a_session_forgets_it() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        let session = player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet));
        assert!(Arc::ptr_eq(
            &session,
            &player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet))
        ));

        player.close_session(GUILD).await;

        assert!(!player.has_session(GUILD));
        assert!(session.is_closed());
        assert!(player.enqueue(GUILD, tracks(&["a"])).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_share_one_session() {
        let (player, _dir) = player(MockVideoCatalog::new()).await;
        let player = Arc::new(player);

        let joins: Vec<_> = (0..8)
            .map(|_| {
                let player = player.clone();
                tokio::spawn(async move { player.open_session(GUILD, Arc::new(Connected), Arc::new(Quiet)) })
            })
            .collect();
        let sessions = futures::future::join_all(joins).await;

        let first = sessions[0].as_ref().unwrap();
        assert!(sessions
            .iter()
            .all(|session| Arc::ptr_eq(first, session.as_ref().unwrap())));
        assert!(Arc::ptr_eq(first, &player.session(GUILD).unwrap()));
    }
}
