use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CatalogTrack, CollectionInfo, CollectionKind, MusicCatalog};
use crate::error::{PlaybackError, Result};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

const ALBUM_PAGE_SIZE: usize = 50;
const PLAYLIST_PAGE_SIZE: usize = 100;

// Renew a bit before the token actually expires
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    http: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    duration_ms: Option<u64>,
    album: Option<SpotifyAlbumRef>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbumRef {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct AlbumHeader {
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    total_tracks: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistHeader {
    name: String,
    #[serde(default)]
    images: Option<Vec<SpotifyImage>>,
    tracks: PlaylistTotal,
}

#[derive(Debug, Deserialize)]
struct PlaylistTotal {
    total: usize,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    // Removed tracks and podcast episodes come back as null
    track: Option<SpotifyTrack>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("guild-jukebox/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() {
                return Ok(current.value.clone());
            }
        }

        debug!("🔑 Renovando token de Spotify");
        let basic = B64.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .http
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlaybackError::Catalog(format!(
                "Spotify rejected the client credentials ({})",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_MARGIN);
        *token = Some(AccessToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}{}", API_BASE, path))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(PlaybackError::NotFound(what.to_string()))
            }
            status if !status.is_success() => Err(PlaybackError::Catalog(format!(
                "Spotify returned {} for {}",
                status, what
            ))),
            _ => Ok(response.json().await?),
        }
    }
}

fn collection_path(kind: CollectionKind, id: &str) -> String {
    match kind {
        CollectionKind::Album => format!("/albums/{}", id),
        CollectionKind::Playlist => format!("/playlists/{}", id),
    }
}

/// Maps an API track to a catalog entry whose lookup key is a
/// "take first search result" directive for the fetch pipeline.
fn map_track(track: SpotifyTrack) -> Option<CatalogTrack> {
    let id = track.id?;
    let artists = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let thumbnail = track
        .album
        .and_then(|album| album.images.into_iter().next())
        .map(|image| image.url);

    let lookup_key = if artists.is_empty() {
        format!("ytsearch1:{}", track.name)
    } else {
        format!("ytsearch1:{} - {}", artists, track.name)
    };

    Some(CatalogTrack {
        id: format!("spotify:{}", id),
        title: track.name,
        artist: (!artists.is_empty()).then_some(artists),
        thumbnail,
        duration: track.duration_ms.map(Duration::from_millis),
        lookup_key,
    })
}

#[async_trait]
impl MusicCatalog for SpotifyClient {
    async fn track(&self, id: &str) -> Result<CatalogTrack> {
        let track: SpotifyTrack = self
            .get(&format!("/tracks/{}", id), &format!("Spotify track `{}`", id))
            .await?;
        map_track(track).ok_or_else(|| PlaybackError::NotFound(format!("Spotify track `{}`", id)))
    }

    async fn collection(&self, kind: CollectionKind, id: &str) -> Result<CollectionInfo> {
        let what = match kind {
            CollectionKind::Album => format!("Spotify album `{}`", id),
            CollectionKind::Playlist => format!("Spotify playlist `{}`", id),
        };
        let info = match kind {
            CollectionKind::Album => {
                let header: AlbumHeader = self.get(&collection_path(kind, id), &what).await?;
                CollectionInfo {
                    name: header.name,
                    thumbnail: header.images.into_iter().next().map(|i| i.url),
                    total: header.total_tracks,
                }
            }
            CollectionKind::Playlist => {
                let path = format!(
                    "{}?fields=name,images,tracks.total",
                    collection_path(kind, id)
                );
                let header: PlaylistHeader = self.get(&path, &what).await?;
                CollectionInfo {
                    name: header.name,
                    thumbnail: header
                        .images
                        .and_then(|images| images.into_iter().next())
                        .map(|i| i.url),
                    total: header.tracks.total,
                }
            }
        };

        info!("📀 {} ({} canciones)", info.name, info.total);
        Ok(info)
    }

    async fn collection_page(
        &self,
        kind: CollectionKind,
        id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>> {
        let path = format!(
            "{}/tracks?offset={}&limit={}",
            collection_path(kind, id),
            offset,
            limit
        );
        let what = format!("page {} of `{}`", offset / limit.max(1), id);

        let tracks = match kind {
            CollectionKind::Album => {
                let page: Paging<SpotifyTrack> = self.get(&path, &what).await?;
                page.items.into_iter().filter_map(map_track).collect()
            }
            CollectionKind::Playlist => {
                let page: Paging<PlaylistItem> = self.get(&path, &what).await?;
                page.items
                    .into_iter()
                    .filter_map(|item| item.track)
                    .filter_map(map_track)
                    .collect()
            }
        };
        Ok(tracks)
    }

    fn page_size(&self, kind: CollectionKind) -> usize {
        match kind {
            CollectionKind::Album => ALBUM_PAGE_SIZE,
            CollectionKind::Playlist => PLAYLIST_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn track_maps_to_search_directive() {
        let json = r#"{
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "artists": [{"name": "Rick Astley"}],
            "duration_ms": 213573,
            "album": {"images": [{"url": "https://i.scdn.co/image/big"}, {"url": "https://i.scdn.co/image/small"}]}
        }"#;
        let track: SpotifyTrack = serde_json::from_str(json).unwrap();
        let mapped = map_track(track).unwrap();

        assert_eq!(mapped.id, "spotify:4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(mapped.lookup_key, "ytsearch1:Rick Astley - Never Gonna Give You Up");
        assert_eq!(mapped.artist.as_deref(), Some("Rick Astley"));
        assert_eq!(mapped.thumbnail.as_deref(), Some("https://i.scdn.co/image/big"));
        assert_eq!(mapped.duration, Some(Duration::from_millis(213573)));
    }

    #[test]
    fn local_tracks_without_id_are_skipped() {
        let json = r#"{"items": [
            {"track": {"id": null, "name": "local file", "artists": []}},
            {"track": null},
            {"track": {"id": "abc", "name": "Intro", "artists": [{"name": "A"}, {"name": "B"}]}}
        ]}"#;
        let page: Paging<PlaylistItem> = serde_json::from_str(json).unwrap();
        let tracks: Vec<CatalogTrack> = page
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(map_track)
            .collect();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].lookup_key, "ytsearch1:A, B - Intro");
    }

    #[test]
    fn playlist_header_tolerates_missing_images() {
        let json = r#"{"name": "Road trip", "images": null, "tracks": {"total": 240}}"#;
        let header: PlaylistHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.tracks.total, 240);
        assert!(header.images.is_none());
    }
}
