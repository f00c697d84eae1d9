use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};

use super::{CatalogCollection, CatalogTrack, CollectionInfo, VideoCatalog};
use crate::error::{PlaybackError, Result};

/// Metadata client for the video platform, backed by `yt-dlp`.
///
/// yt-dlp also understands SoundCloud pages and plain audio links, so the
/// same client serves [`super::TrackSource::Link`] lookups.
pub struct YouTubeClient {
    ytdlp: PathBuf,
    // Limit concurrent yt-dlp processes to avoid rate limiting
    rate_limiter: Semaphore,
}

/// Subset of the JSON yt-dlp prints with `--dump-json`.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
    webpage_url: Option<String>,
    url: Option<String>,
    extractor_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtDlpThumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    id: String,
    title: Option<String>,
    #[serde(default)]
    entries: Vec<Option<YtDlpInfo>>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
}

impl YouTubeClient {
    pub fn new(ytdlp: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| PlaybackError::Catalog(e.to_string()))?;

        debug!("🔧 yt-dlp {}", args.join(" "));

        let output = Command::new(&self.ytdlp)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PlaybackError::Catalog(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Maps yt-dlp's error output to a typed failure.
fn classify_failure(stderr: &str) -> PlaybackError {
    let lower = stderr.to_lowercase();
    let missing = ["video unavailable", "does not exist", "http error 404", "private video", "unable to extract"]
        .iter()
        .any(|needle| lower.contains(needle));

    let last_line = stderr.lines().last().unwrap_or("unknown error").trim().to_string();
    if missing {
        PlaybackError::NotFound(last_line)
    } else {
        warn!("❌ yt-dlp falló: {}", last_line);
        PlaybackError::Catalog(last_line)
    }
}

fn info_to_track(info: YtDlpInfo, fallback_url: Option<&str>) -> CatalogTrack {
    let extractor = info
        .extractor_key
        .as_deref()
        .unwrap_or("youtube")
        .to_lowercase();
    let lookup_key = info
        .webpage_url
        .or_else(|| info.url.filter(|u| u.starts_with("http")))
        .or_else(|| fallback_url.map(str::to_string))
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", info.id));
    let thumbnail = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().last().map(|t| t.url));

    CatalogTrack {
        id: format!("{}:{}", extractor, info.id),
        title: info.title.unwrap_or_else(|| "Unknown title".to_string()),
        artist: info.uploader.or(info.channel),
        thumbnail,
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64),
        lookup_key,
    }
}

fn parse_playlist(json: &str) -> Result<CatalogCollection> {
    let playlist: YtDlpPlaylist = serde_json::from_str(json)
        .map_err(|e| PlaybackError::Catalog(format!("bad playlist json: {}", e)))?;

    // Deleted or private entries come back as null
    let tracks: Vec<CatalogTrack> = playlist
        .entries
        .into_iter()
        .flatten()
        .map(|entry| info_to_track(entry, None))
        .collect();

    Ok(CatalogCollection {
        info: CollectionInfo {
            name: playlist.title.unwrap_or(playlist.id),
            thumbnail: playlist.thumbnails.into_iter().last().map(|t| t.url),
            total: tracks.len(),
        },
        tracks,
    })
}

#[async_trait]
impl VideoCatalog for YouTubeClient {
    async fn video(&self, url: &str) -> Result<CatalogTrack> {
        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--skip-download", "--no-warnings", url])
            .await?;

        let info: YtDlpInfo = serde_json::from_str(stdout.trim())
            .map_err(|e| PlaybackError::Catalog(format!("bad video json: {}", e)))?;
        Ok(info_to_track(info, Some(url)))
    }

    async fn playlist(&self, id: &str) -> Result<CatalogCollection> {
        info!("📋 Cargando playlist de YouTube {}", id);
        let url = format!("https://www.youtube.com/playlist?list={}", id);
        let stdout = self
            .run(&["--flat-playlist", "--dump-single-json", "--no-warnings", &url])
            .await?;
        parse_playlist(&stdout)
    }

    async fn search(&self, query: &str) -> Result<CatalogTrack> {
        info!("🔍 Buscando en YouTube: {}", query);
        let search = format!("ytsearch1:{}", query);
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", "--skip-download", "--no-warnings", &search])
            .await?;

        stdout
            .lines()
            .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .map(|info| info_to_track(info, None))
            .ok_or_else(|| PlaybackError::NotFound(format!("results for `{}`", query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn video_json_maps_to_catalog_track() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212.0,
            "uploader": "Rick Astley",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "extractor_key": "Youtube"
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let track = info_to_track(info, None);

        assert_eq!(
            track,
            CatalogTrack {
                id: "youtube:dQw4w9WgXcQ".into(),
                title: "Never Gonna Give You Up".into(),
                artist: Some("Rick Astley".into()),
                thumbnail: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg".into()),
                duration: Some(Duration::from_secs(212)),
                lookup_key: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            }
        );
    }

    #[test]
    fn flat_playlist_keeps_order_and_skips_null_entries() {
        let json = r#"{
            "id": "PL123",
            "title": "Mix",
            "entries": [
                {"id": "aaaaaaaaaaa", "title": "One", "url": "https://www.youtube.com/watch?v=aaaaaaaaaaa"},
                null,
                {"id": "bbbbbbbbbbb", "title": "Two", "thumbnails": [{"url": "small"}, {"url": "large"}]}
            ]
        }"#;
        let collection = parse_playlist(json).unwrap();

        assert_eq!(collection.info.name, "Mix");
        assert_eq!(collection.info.total, 2);
        assert_eq!(collection.tracks[0].lookup_key, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert_eq!(collection.tracks[1].lookup_key, "https://www.youtube.com/watch?v=bbbbbbbbbbb");
        assert_eq!(collection.tracks[1].thumbnail.as_deref(), Some("large"));
        assert_eq!(collection.tracks[1].duration, None);
    }

    #[test]
    fn missing_videos_are_not_found() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] xyz: Video unavailable"),
            PlaybackError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: unable to download webpage: timed out"),
            PlaybackError::Catalog(_)
        ));
    }
}
