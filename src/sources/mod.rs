//! # Sources
//!
//! Turns a user query into an ordered list of [`TrackDescriptor`]s.
//!
//! A query is first classified into a closed [`TrackSource`] variant by
//! [`classify`]; [`TrackResolver::resolve`] then asks the matching catalog
//! adapter for the tracks. Adapters live in [`youtube`] (yt-dlp metadata,
//! also used for generic links and text search) and [`spotify`] (Web API).
//! Spotify entries are not playable by themselves, so their lookup key is a
//! "take first" search directive handled later by the fetch pipeline.

pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{future::Future, sync::Arc, sync::OnceLock, time::Duration};
use tracing::{debug, info};
use url::Url;

use crate::error::{PlaybackError, Result};

pub use spotify::SpotifyClient;
pub use youtube::YouTubeClient;

/// Catalog a track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    YouTube,
    Spotify,
    Link,
    Search,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::YouTube => "youtube",
            SourceType::Spotify => "spotify",
            SourceType::Link => "link",
            SourceType::Search => "search",
        }
    }
}

/// A classified query. Each variant carries exactly what its catalog needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSource {
    YouTubeVideo { url: String },
    YouTubePlaylist { id: String },
    SpotifyTrack { id: String },
    SpotifyAlbum { id: String },
    SpotifyPlaylist { id: String },
    Link { url: String },
    Search { query: String },
}

impl TrackSource {
    pub fn source_type(&self) -> SourceType {
        match self {
            TrackSource::YouTubeVideo { .. } | TrackSource::YouTubePlaylist { .. } => {
                SourceType::YouTube
            }
            TrackSource::SpotifyTrack { .. }
            | TrackSource::SpotifyAlbum { .. }
            | TrackSource::SpotifyPlaylist { .. } => SourceType::Spotify,
            TrackSource::Link { .. } => SourceType::Link,
            TrackSource::Search { .. } => SourceType::Search,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            TrackSource::YouTubePlaylist { .. }
                | TrackSource::SpotifyAlbum { .. }
                | TrackSource::SpotifyPlaylist { .. }
        )
    }
}

/// A queued track. Immutable once built; the fetch pipeline only ever sees
/// its lookup key.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    id: String,
    title: String,
    artist: Option<String>,
    thumbnail: Option<String>,
    duration: Option<Duration>,
    lookup_key: String,
    source_type: SourceType,
    requested_by: UserId,
    added_at: DateTime<Utc>,
}

impl TrackDescriptor {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        lookup_key: impl Into<String>,
        source_type: SourceType,
        requested_by: UserId,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            thumbnail: None,
            duration: None,
            lookup_key: lookup_key.into(),
            source_type,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn from_catalog(track: CatalogTrack, source_type: SourceType, requested_by: UserId) -> Self {
        Self {
            id: track.id,
            title: track.title,
            artist: track.artist,
            thumbnail: track.thumbnail,
            duration: track.duration,
            lookup_key: track.lookup_key,
            source_type,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn lookup_key(&self) -> &str {
        &self.lookup_key
    }
    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// "Artist - Title" when the artist is known, otherwise the bare title.
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

/// Track metadata as returned by a catalog adapter, before it is tied to a
/// requester.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<Duration>,
    pub lookup_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub thumbnail: Option<String>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogCollection {
    pub info: CollectionInfo,
    pub tracks: Vec<CatalogTrack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Album,
    Playlist,
}

/// Video platform lookups (yt-dlp backed in production).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Metadata for a single video or generic link.
    async fn video(&self, url: &str) -> Result<CatalogTrack>;

    /// All entries of a playlist, in playlist order.
    async fn playlist(&self, id: &str) -> Result<CatalogCollection>;

    /// Best match for a free-text search.
    async fn search(&self, query: &str) -> Result<CatalogTrack>;
}

/// Music streaming platform lookups. Collections are paged.
#[async_trait]
pub trait MusicCatalog: Send + Sync {
    async fn track(&self, id: &str) -> Result<CatalogTrack>;

    async fn collection(&self, kind: CollectionKind, id: &str) -> Result<CollectionInfo>;

    async fn collection_page(
        &self,
        kind: CollectionKind,
        id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>>;

    fn page_size(&self, kind: CollectionKind) -> usize;
}

/// Result of [`TrackResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub source: TrackSource,
    pub tracks: Vec<TrackDescriptor>,
    pub collection: Option<CollectionInfo>,
}

const AUDIO_EXTENSIONS: [&str; 8] = [".mp3", ".ogg", ".opus", ".flac", ".wav", ".m4a", ".webm", ".aac"];

fn spotify_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^spotify:(track|album|playlist):([A-Za-z0-9]+)$").expect("valid spotify uri regex")
    })
}

fn youtube_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"))
}

/// Classifies a query into a [`TrackSource`].
///
/// Anything that is not an `http(s)` URL or a `spotify:` URI is a text
/// search. A URL that matches none of the known shapes is rejected with
/// [`PlaybackError::UnsupportedQuery`].
pub fn classify(query: &str) -> Result<TrackSource> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PlaybackError::UnsupportedQuery("empty query".into()));
    }

    if let Some(caps) = spotify_uri_regex().captures(query) {
        let id = caps[2].to_string();
        return Ok(match &caps[1] {
            "track" => TrackSource::SpotifyTrack { id },
            "album" => TrackSource::SpotifyAlbum { id },
            _ => TrackSource::SpotifyPlaylist { id },
        });
    }

    let looks_like_url = query.starts_with("http://") || query.starts_with("https://");
    if !looks_like_url {
        return Ok(TrackSource::Search { query: query.to_string() });
    }

    let url = Url::parse(query).map_err(|_| PlaybackError::UnsupportedQuery(query.to_string()))?;
    classify_url(&url).ok_or_else(|| PlaybackError::UnsupportedQuery(query.to_string()))
}

fn classify_url(url: &Url) -> Option<TrackSource> {
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host)
        .to_string();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    match host.as_str() {
        "youtube.com" | "music.youtube.com" => match segments.as_slice() {
            ["playlist"] => param("list").map(|id| TrackSource::YouTubePlaylist { id }),
            ["watch"] => param("v")
                .filter(|id| youtube_id_regex().is_match(id))
                .map(|id| TrackSource::YouTubeVideo { url: watch_url(&id) }),
            ["shorts", id] if youtube_id_regex().is_match(id) => {
                Some(TrackSource::YouTubeVideo { url: watch_url(id) })
            }
            _ => None,
        },
        "youtu.be" => match segments.as_slice() {
            [id] if youtube_id_regex().is_match(id) => {
                Some(TrackSource::YouTubeVideo { url: watch_url(id) })
            }
            _ => None,
        },
        "open.spotify.com" => {
            // Localized links look like /intl-es/track/<id>
            let rest = match segments.as_slice() {
                [first, rest @ ..] if first.starts_with("intl-") => rest,
                all => all,
            };
            match rest {
                ["track", id] => Some(TrackSource::SpotifyTrack { id: id.to_string() }),
                ["album", id] => Some(TrackSource::SpotifyAlbum { id: id.to_string() }),
                ["playlist", id] => Some(TrackSource::SpotifyPlaylist { id: id.to_string() }),
                _ => None,
            }
        }
        "soundcloud.com" | "on.soundcloud.com" if !segments.is_empty() => {
            Some(TrackSource::Link { url: url.to_string() })
        }
        _ => {
            let path = url.path().to_ascii_lowercase();
            AUDIO_EXTENSIONS
                .iter()
                .any(|ext| path.ends_with(ext))
                .then(|| TrackSource::Link { url: url.to_string() })
        }
    }
}

fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// Fetches `total` items in pages of `page_size` with at most `concurrency`
/// requests in flight and returns them in page order.
///
/// Pages complete in any order; each result is tagged with its page index
/// and the merge sorts on that index, never on arrival.
pub async fn fetch_paged<T, F, Fut>(
    total: usize,
    page_size: usize,
    concurrency: usize,
    fetch: F,
) -> Result<Vec<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let pages = total.div_ceil(page_size);

    let mut fetched: Vec<(usize, Vec<T>)> = stream::iter(0..pages)
        .map(|index| {
            let page = fetch(index * page_size);
            async move { page.await.map(|items| (index, items)) }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    fetched.sort_by_key(|(index, _)| *index);
    Ok(fetched.into_iter().flat_map(|(_, items)| items).collect())
}

/// Stateless query resolver over the catalog adapters.
pub struct TrackResolver {
    video: Arc<dyn VideoCatalog>,
    music: Option<Arc<dyn MusicCatalog>>,
    concurrency: usize,
    max_tracks: usize,
}

impl TrackResolver {
    pub fn new(
        video: Arc<dyn VideoCatalog>,
        music: Option<Arc<dyn MusicCatalog>>,
        concurrency: usize,
        max_tracks: usize,
    ) -> Self {
        Self {
            video,
            music,
            concurrency: concurrency.max(1),
            max_tracks: max_tracks.max(1),
        }
    }

    pub async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Resolved> {
        let source = classify(query)?;
        debug!("🔍 Query clasificada como {:?}", source);

        let (tracks, collection) = match &source {
            TrackSource::YouTubeVideo { url } | TrackSource::Link { url } => {
                (vec![self.video.video(url).await?], None)
            }
            TrackSource::Search { query } => (vec![self.video.search(query).await?], None),
            TrackSource::YouTubePlaylist { id } => {
                let collection = self.video.playlist(id).await?;
                (collection.tracks, Some(collection.info))
            }
            TrackSource::SpotifyTrack { id } => (vec![self.music()?.track(id).await?], None),
            TrackSource::SpotifyAlbum { id } => self.paged_collection(CollectionKind::Album, id).await?,
            TrackSource::SpotifyPlaylist { id } => {
                self.paged_collection(CollectionKind::Playlist, id).await?
            }
        };

        if tracks.is_empty() {
            return Err(PlaybackError::NotFound(format!("tracks for `{}`", query.trim())));
        }

        let source_type = source.source_type();
        let fallback_thumbnail = collection.as_ref().and_then(|c| c.thumbnail.clone());
        let tracks: Vec<TrackDescriptor> = tracks
            .into_iter()
            .take(self.max_tracks)
            .map(|mut track| {
                if track.thumbnail.is_none() {
                    track.thumbnail = fallback_thumbnail.clone();
                }
                TrackDescriptor::from_catalog(track, source_type, requested_by)
            })
            .collect();

        info!(
            "📥 Resueltas {} canciones desde {}",
            tracks.len(),
            source_type.as_str()
        );

        Ok(Resolved { source, tracks, collection })
    }

    fn music(&self) -> Result<&Arc<dyn MusicCatalog>> {
        self.music.as_ref().ok_or_else(|| {
            PlaybackError::UnsupportedQuery(
                "Spotify links need SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET".into(),
            )
        })
    }

    async fn paged_collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<(Vec<CatalogTrack>, Option<CollectionInfo>)> {
        let music = self.music()?;
        let info = music.collection(kind, id).await?;
        let wanted = info.total.min(self.max_tracks);
        let page_size = music.page_size(kind);

        let mut tracks = fetch_paged(wanted, page_size, self.concurrency, |offset| {
            music.collection_page(kind, id, offset, page_size)
        })
        .await?;
        tracks.truncate(wanted);

        Ok((tracks, Some(info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn catalog_track(id: &str) -> CatalogTrack {
        CatalogTrack {
            id: id.to_string(),
            title: format!("title {}", id),
            artist: None,
            thumbnail: None,
            duration: Some(Duration::from_secs(200)),
            lookup_key: format!("ytsearch1:{}", id),
        }
    }

    #[test]
    fn classifies_video_platform_urls() {
        assert_eq!(
            classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            TrackSource::YouTubeVideo { url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into() }
        );
        assert_eq!(
            classify("https://youtu.be/dQw4w9WgXcQ?t=10").unwrap(),
            TrackSource::YouTubeVideo { url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into() }
        );
        assert_eq!(
            classify("https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RDAMVM").unwrap(),
            TrackSource::YouTubeVideo { url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into() }
        );
        assert_eq!(
            classify("https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG").unwrap(),
            TrackSource::YouTubePlaylist { id: "PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG".into() }
        );
    }

    #[test]
    fn classifies_music_platform_links_and_uris() {
        assert_eq!(
            classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").unwrap(),
            TrackSource::SpotifyTrack { id: "4uLU6hMCjMI75M1A2tKUQC".into() }
        );
        assert_eq!(
            classify("https://open.spotify.com/intl-es/album/1DFixLWuPkv3KT3TnV35m3").unwrap(),
            TrackSource::SpotifyAlbum { id: "1DFixLWuPkv3KT3TnV35m3".into() }
        );
        assert_eq!(
            classify("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap(),
            TrackSource::SpotifyPlaylist { id: "37i9dQZF1DXcBWIGoYBM5M".into() }
        );
    }

    #[test]
    fn text_is_a_search_and_unknown_urls_are_rejected() {
        assert_eq!(
            classify("  queen: bohemian rhapsody ").unwrap(),
            TrackSource::Search { query: "queen: bohemian rhapsody".into() }
        );
        assert_eq!(
            classify("https://soundcloud.com/artist/song").unwrap().source_type(),
            SourceType::Link
        );
        assert_eq!(
            classify("https://cdn.example.com/audio/theme.MP3").unwrap().source_type(),
            SourceType::Link
        );
        assert!(matches!(
            classify("https://example.com/blog/post"),
            Err(PlaybackError::UnsupportedQuery(_))
        ));
        assert!(matches!(
            classify("https://www.youtube.com/watch?v=short"),
            Err(PlaybackError::UnsupportedQuery(_))
        ));
        assert!(matches!(classify("   "), Err(PlaybackError::UnsupportedQuery(_))));
    }

    #[tokio::test]
    async fn paged_fetch_keeps_catalog_order_when_pages_race() {
        // Later pages finish first.
        let tracks = fetch_paged(10, 3, 4, |offset| async move {
            tokio::time::sleep(Duration::from_millis(40 - offset as u64 * 4)).await;
            Ok((offset..(offset + 3).min(10)).map(|i| i.to_string()).collect::<Vec<_>>())
        })
        .await
        .unwrap();

        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(tracks, expected);
    }

    #[tokio::test]
    async fn paged_fetch_fails_when_any_page_fails() {
        let result: Result<Vec<u32>> = fetch_paged(6, 2, 2, |offset| async move {
            if offset == 2 {
                Err(PlaybackError::Catalog("rate limited".into()))
            } else {
                Ok(vec![offset as u32])
            }
        })
        .await;
        assert_eq!(result, Err(PlaybackError::Catalog("rate limited".into())));
    }

    #[tokio::test]
    async fn search_resolves_through_video_catalog() {
        let mut video = MockVideoCatalog::new();
        video
            .expect_search()
            .withf(|q| q == "daft punk one more time")
            .times(1)
            .returning(|_| Ok(catalog_track("yt:abc")));

        let resolver = TrackResolver::new(Arc::new(video), None, 2, 50);
        let resolved = resolver
            .resolve("daft punk one more time", UserId::new(7))
            .await
            .unwrap();

        assert_eq!(resolved.source.source_type(), SourceType::Search);
        assert_eq!(resolved.tracks.len(), 1);
        assert_eq!(resolved.tracks[0].requested_by(), UserId::new(7));
        assert_eq!(resolved.tracks[0].lookup_key(), "ytsearch1:yt:abc");
    }

    #[tokio::test]
    async fn music_links_without_credentials_are_unsupported() {
        let resolver = TrackResolver::new(Arc::new(MockVideoCatalog::new()), None, 2, 50);
        let err = resolver
            .resolve("spotify:track:4uLU6hMCjMI75M1A2tKUQC", UserId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::UnsupportedQuery(_)));
    }

    struct PagedCatalog {
        pages: HashMap<usize, Vec<CatalogTrack>>,
    }

    #[async_trait]
    impl MusicCatalog for PagedCatalog {
        async fn track(&self, id: &str) -> Result<CatalogTrack> {
            Err(PlaybackError::NotFound(id.to_string()))
        }

        async fn collection(&self, _kind: CollectionKind, _id: &str) -> Result<CollectionInfo> {
            Ok(CollectionInfo {
                name: "Road trip".into(),
                thumbnail: Some("https://img/cover.jpg".into()),
                total: 5,
            })
        }

        async fn collection_page(
            &self,
            _kind: CollectionKind,
            _id: &str,
            offset: usize,
            _limit: usize,
        ) -> Result<Vec<CatalogTrack>> {
            // First page is the slowest.
            tokio::time::sleep(Duration::from_millis(if offset == 0 { 30 } else { 1 })).await;
            Ok(self.pages.get(&offset).cloned().unwrap_or_default())
        }

        fn page_size(&self, _kind: CollectionKind) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn collections_are_capped_and_ordered() {
        let pages = HashMap::from([
            (0, vec![catalog_track("a"), catalog_track("b")]),
            (2, vec![catalog_track("c"), catalog_track("d")]),
            (4, vec![catalog_track("e")]),
        ]);
        let resolver = TrackResolver::new(
            Arc::new(MockVideoCatalog::new()),
            Some(Arc::new(PagedCatalog { pages })),
            3,
            4,
        );

        let resolved = resolver
            .resolve("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M", UserId::new(3))
            .await
            .unwrap();

        let ids: Vec<&str> = resolved.tracks.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(resolved.collection.unwrap().name, "Road trip");
        assert_eq!(resolved.tracks[0].thumbnail(), Some("https://img/cover.jpg"));
    }
}
