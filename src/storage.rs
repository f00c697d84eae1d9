use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use dashmap::DashMap;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    fs,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::error::{PlaybackError, Result};
use crate::sources::{SourceType, TrackDescriptor};

/// A track as kept in a saved playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTrack {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub lookup_key: String,
    pub source_type: SourceType,
}

impl From<&TrackDescriptor> for SavedTrack {
    fn from(track: &TrackDescriptor) -> Self {
        Self {
            id: track.id().to_string(),
            title: track.title().to_string(),
            artist: track.artist().map(str::to_string),
            thumbnail: track.thumbnail().map(str::to_string),
            duration_secs: track.duration().map(|d| d.as_secs()),
            lookup_key: track.lookup_key().to_string(),
            source_type: track.source_type(),
        }
    }
}

impl SavedTrack {
    pub fn into_descriptor(self, requested_by: UserId) -> TrackDescriptor {
        let mut track = TrackDescriptor::new(
            self.id,
            self.title,
            self.lookup_key,
            self.source_type,
            requested_by,
        );
        if let Some(artist) = self.artist {
            track = track.with_artist(artist);
        }
        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        if let Some(secs) = self.duration_secs {
            track = track.with_duration(Duration::from_secs(secs));
        }
        track
    }
}

/// All playlists of one user, stored as a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPlaylists {
    pub user_id: u64,
    #[serde(default)]
    pub playlists: BTreeMap<String, Vec<SavedTrack>>,
    pub updated_at: DateTime<Utc>,
}

impl UserPlaylists {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id: user_id.get(),
            playlists: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Persistence for playlist documents.
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// `Ok(None)` when the user never saved anything.
    async fn load(&self, user_id: UserId) -> Result<Option<UserPlaylists>>;

    async fn save(&self, playlists: &UserPlaylists) -> Result<()>;
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonPlaylistStore {
    data_dir: PathBuf,
}

impl JsonPlaylistStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(data_dir.join("users")).await?;
        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    fn user_file_path(&self, user_id: UserId) -> PathBuf {
        self.data_dir.join("users").join(format!("user_{}.json", user_id.get()))
    }
}

#[async_trait]
impl PlaylistStore for JsonPlaylistStore {
    async fn load(&self, user_id: UserId) -> Result<Option<UserPlaylists>> {
        let path = self.user_file_path(user_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, playlists: &UserPlaylists) -> Result<()> {
        let path = self.user_file_path(UserId::new(playlists.user_id));
        let content = serde_json::to_string_pretty(playlists)?;

        // Write then rename so a crash never leaves half a document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("💾 Playlists guardadas para usuario {}", playlists.user_id);
        Ok(())
    }
}

/// Summary line for `/playlists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub name: String,
    pub tracks: usize,
}

/// Named track lists per user, with a short-lived cache in front of the
/// store.
pub struct PlaylistLibrary {
    store: Arc<dyn PlaylistStore>,
    cache: TtlCache<UserId, UserPlaylists>,
    /// Held across load, modify and save of a user's document.
    writes: DashMap<UserId, Arc<AsyncMutex<()>>>,
}

impl PlaylistLibrary {
    pub fn new(store: Arc<dyn PlaylistStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
            writes: DashMap::new(),
        }
    }

    /// Periodically drops expired cache entries. The task ends once the
    /// library is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let library: Weak<Self> = Arc::downgrade(self);
        let period = self.cache.ttl().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(library) = library.upgrade() else {
                    break;
                };
                let removed = library.cache.cleanup_expired();
                if removed > 0 {
                    debug!("🧹 {} documentos de playlists expirados", removed);
                }
            }
        })
    }

    async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = self.writes.entry(user_id).or_default().clone();
        lock.lock_owned().await
    }

    async fn document(&self, user_id: UserId) -> Result<UserPlaylists> {
        if let Some(cached) = self.cache.get(&user_id) {
            return Ok(cached);
        }
        let document = self
            .store
            .load(user_id)
            .await?
            .unwrap_or_else(|| UserPlaylists::empty(user_id));
        self.cache.insert(user_id, document.clone());
        Ok(document)
    }

    async fn persist(&self, user_id: UserId, mut document: UserPlaylists) -> Result<()> {
        document.updated_at = Utc::now();
        // Drop the cached copy first so a failed write is not served later
        self.cache.invalidate(&user_id);
        self.store.save(&document).await?;
        self.cache.insert(user_id, document);
        Ok(())
    }

    pub async fn create(&self, user_id: UserId, name: &str, tracks: Vec<SavedTrack>) -> Result<()> {
        let name = normalize_name(name)?;
        let _write = self.lock_user(user_id).await;
        let mut document = self.document(user_id).await?;
        if document.playlists.contains_key(&name) {
            return Err(PlaybackError::conflict(format!("playlist `{}` already exists", name)));
        }

        info!("📝 Playlist `{}` creada ({} canciones)", name, tracks.len());
        document.playlists.insert(name, tracks);
        self.persist(user_id, document).await
    }

    pub async fn get(&self, user_id: UserId, name: &str) -> Result<Vec<SavedTrack>> {
        let name = normalize_name(name)?;
        self.document(user_id)
            .await?
            .playlists
            .remove(&name)
            .ok_or_else(|| PlaybackError::NotFound(format!("playlist `{}`", name)))
    }

    pub async fn update(&self, user_id: UserId, name: &str, tracks: Vec<SavedTrack>) -> Result<()> {
        let name = normalize_name(name)?;
        let _write = self.lock_user(user_id).await;
        let mut document = self.document(user_id).await?;
        match document.playlists.get_mut(&name) {
            Some(existing) => *existing = tracks,
            None => return Err(PlaybackError::NotFound(format!("playlist `{}`", name))),
        }
        self.persist(user_id, document).await
    }

    pub async fn delete(&self, user_id: UserId, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        let _write = self.lock_user(user_id).await;
        let mut document = self.document(user_id).await?;
        if document.playlists.remove(&name).is_none() {
            return Err(PlaybackError::NotFound(format!("playlist `{}`", name)));
        }
        info!("🗑️ Playlist `{}` eliminada", name);
        self.persist(user_id, document).await
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<PlaylistSummary>> {
        let document = self.document(user_id).await?;
        Ok(document
            .playlists
            .iter()
            .map(|(name, tracks)| PlaylistSummary {
                name: name.clone(),
                tracks: tracks.len(),
            })
            .collect())
    }

    /// A random track from any of the user's playlists.
    pub async fn random_track(&self, user_id: UserId) -> Result<SavedTrack> {
        let document = self.document(user_id).await?;
        document
            .playlists
            .into_values()
            .flatten()
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| PlaybackError::NotFound("saved tracks".into()))
    }
}

fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 64 {
        return Err(PlaybackError::conflict("playlist names must have 1 to 64 characters"));
    }
    Ok(name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn saved(id: &str) -> SavedTrack {
        SavedTrack {
            id: id.to_string(),
            title: format!("Song {}", id),
            artist: Some("Band".into()),
            thumbnail: None,
            duration_secs: Some(180),
            lookup_key: format!("ytsearch1:Band - Song {}", id),
            source_type: SourceType::Spotify,
        }
    }

    async fn library(dir: &std::path::Path) -> PlaylistLibrary {
        let store = JsonPlaylistStore::new(dir.to_path_buf()).await.unwrap();
        PlaylistLibrary::new(Arc::new(store), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path()).await;
        let user = UserId::new(42);

        library.create(user, "Road Trip", vec![saved("a"), saved("b")]).await.unwrap();

        assert_eq!(library.get(user, "road trip").await.unwrap(), vec![saved("a"), saved("b")]);
        assert_eq!(
            library.list(user).await.unwrap(),
            vec![PlaylistSummary { name: "road trip".into(), tracks: 2 }]
        );
        assert!(dir.path().join("users/user_42.json").exists());
    }

    #[tokio::test]
    async fn missing_playlists_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path()).await;
        let user = UserId::new(1);

        assert!(matches!(library.get(user, "nope").await, Err(PlaybackError::NotFound(_))));
        assert!(matches!(library.delete(user, "nope").await, Err(PlaybackError::NotFound(_))));
        assert!(matches!(
            library.update(user, "nope", vec![]).await,
            Err(PlaybackError::NotFound(_))
        ));
        assert!(matches!(library.random_track(user).await, Err(PlaybackError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path()).await;
        let user = UserId::new(1);

        library.create(user, "gym", vec![saved("a")]).await.unwrap();
        let err = library.create(user, "GYM ", vec![saved("b")]).await.unwrap_err();
        assert!(matches!(err, PlaybackError::StateConflict(_)));
    }

    #[tokio::test]
    async fn documents_survive_a_new_library() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::new(5);
        {
            let library = library(dir.path()).await;
            library.create(user, "chill", vec![saved("a")]).await.unwrap();
            library.update(user, "chill", vec![saved("b"), saved("c")]).await.unwrap();
            library.create(user, "old", vec![saved("d")]).await.unwrap();
            library.delete(user, "old").await.unwrap();
        }

        let library = library(dir.path()).await;
        assert_eq!(library.get(user, "chill").await.unwrap().len(), 2);
        assert!(matches!(library.get(user, "old").await, Err(PlaybackError::NotFound(_))));
    }

    #[tokio::test]
    async fn random_track_comes_from_saved_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path()).await;
        let user = UserId::new(8);
        library.create(user, "one", vec![saved("a")]).await.unwrap();
        library.create(user, "two", vec![saved("b")]).await.unwrap();

        let picked = library.random_track(user).await.unwrap();
        assert!(picked.id == "a" || picked.id == "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_for_one_user_keep_every_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(library(dir.path()).await);
        let user = UserId::new(11);

        let saves: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| {
                let library = library.clone();
                tokio::spawn(async move { library.create(user, name, vec![saved(name)]).await })
            })
            .collect();
        for save in futures::future::join_all(saves).await {
            save.unwrap().unwrap();
        }

        assert_eq!(library.list(user).await.unwrap().len(), 4);
        let reopened = self::library(dir.path()).await;
        assert_eq!(reopened.list(user).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cleanup_task_drops_expired_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path().to_path_buf()).await.unwrap();
        let library = Arc::new(PlaylistLibrary::new(Arc::new(store), Duration::from_millis(10)));
        let cleanup = library.spawn_cleanup();

        library.list(UserId::new(1)).await.unwrap();
        library.list(UserId::new(2)).await.unwrap();
        assert_eq!(library.cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(library.cache.is_empty());

        drop(library);
        tokio::time::timeout(Duration::from_secs(1), cleanup).await.unwrap().unwrap();
    }

    #[test]
    fn saved_tracks_round_trip_through_descriptors() {
        let track = saved("x").into_descriptor(UserId::new(3));
        assert_eq!(track.requested_by(), UserId::new(3));
        assert_eq!(track.duration(), Some(Duration::from_secs(180)));
        assert_eq!(SavedTrack::from(&track), saved("x"));
    }

    struct CountingStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PlaylistStore for CountingStore {
        async fn load(&self, _user_id: UserId) -> Result<Option<UserPlaylists>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn save(&self, _playlists: &UserPlaylists) -> Result<()> {
            Err(PlaybackError::Storage("disk full".into()))
        }
    }

    #[tokio::test]
    async fn cache_avoids_repeated_loads_and_failed_writes_are_not_cached() {
        let store = Arc::new(CountingStore { loads: AtomicUsize::new(0) });
        let library = PlaylistLibrary::new(store.clone(), Duration::from_secs(30));
        let user = UserId::new(2);

        library.list(user).await.unwrap();
        library.list(user).await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        let err = library.create(user, "x", vec![saved("a")]).await.unwrap_err();
        assert_eq!(err, PlaybackError::Storage("disk full".into()));
        assert!(library.list(user).await.unwrap().is_empty());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }
}
