use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{PlaybackError, Result};

/// An encoded track ready for the voice transport.
///
/// Owns the scoped work directory the file lives in; dropping the value
/// deletes both.
#[derive(Debug)]
pub struct EncodedAudio {
    path: PathBuf,
    _workdir: TempDir,
}

impl EncodedAudio {
    pub fn new(path: PathBuf, workdir: TempDir) -> Self {
        Self { path, _workdir: workdir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Downloads the audio for a lookup key into `dir`.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn fetch(&self, token: &CancellationToken, lookup_key: &str, dir: &Path) -> Result<PathBuf>;
}

/// Encodes a downloaded file into the transport's frame format.
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    async fn encode(&self, token: &CancellationToken, input: &Path, output: &Path) -> Result<()>;
}

#[async_trait]
pub trait MediaPipeline: Send + Sync {
    async fn fetch_and_encode(&self, token: &CancellationToken, lookup_key: &str) -> Result<EncodedAudio>;
}

/// Download then encode, inside one temporary directory per track.
pub struct FetchEncodePipeline {
    resolver: Arc<dyn MediaResolver>,
    encoder: Arc<dyn AudioEncoder>,
    work_root: PathBuf,
}

impl FetchEncodePipeline {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        encoder: Arc<dyn AudioEncoder>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            encoder,
            work_root: work_root.into(),
        }
    }
}

#[async_trait]
impl MediaPipeline for FetchEncodePipeline {
    async fn fetch_and_encode(&self, token: &CancellationToken, lookup_key: &str) -> Result<EncodedAudio> {
        if token.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }

        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| PlaybackError::FetchFailed(format!("cache dir: {}", e)))?;
        // Removed on drop, whichever way this function exits
        let workdir = tempfile::Builder::new()
            .prefix("track-")
            .tempdir_in(&self.work_root)
            .map_err(|e| PlaybackError::FetchFailed(format!("temp dir: {}", e)))?;

        let source = self.resolver.fetch(token, lookup_key, workdir.path()).await?;
        debug!("📥 Descargado {}", source.display());

        let output = workdir.path().join("audio.ogg");
        self.encoder.encode(token, &source, &output).await?;

        if let Err(e) = tokio::fs::remove_file(&source).await {
            debug!("No se pudo borrar {}: {}", source.display(), e);
        }

        Ok(EncodedAudio::new(output, workdir))
    }
}

/// Runs an external tool to completion, killing it if `token` fires first.
async fn run_tool(
    command: &mut Command,
    token: &CancellationToken,
    fail: fn(String) -> PlaybackError,
) -> Result<()> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| fail(format!("could not start process: {}", e)))?;

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.map_err(|e| fail(e.to_string()))?;
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("exited with an error")
                    .trim()
                    .to_string();
                Err(fail(reason))
            }
        }
        _ = token.cancelled() => Err(PlaybackError::Cancelled),
    }
}

/// True for lookup keys that can expand to several items, of which only
/// the first is wanted.
pub fn is_multi_item(lookup_key: &str) -> bool {
    lookup_key.starts_with("ytsearch")
        || lookup_key.contains("list=")
        || lookup_key.contains("/sets/")
}

/// Downloads audio-only content with yt-dlp.
pub struct YtDlpResolver {
    binary: PathBuf,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn download_args(lookup_key: &str, dir: &Path) -> Vec<String> {
        let template = dir.join("source.%(ext)s");
        let mut args = vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-part".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        if is_multi_item(lookup_key) {
            args.extend(["--playlist-items".to_string(), "1".to_string()]);
        } else {
            args.push("--no-playlist".to_string());
        }
        args.push(lookup_key.to_string());
        args
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn fetch(&self, token: &CancellationToken, lookup_key: &str, dir: &Path) -> Result<PathBuf> {
        info!("⬇️ Descargando audio: {}", lookup_key);
        run_tool(
            Command::new(&self.binary).args(Self::download_args(lookup_key, dir)),
            token,
            PlaybackError::FetchFailed,
        )
        .await?;

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PlaybackError::FetchFailed(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlaybackError::FetchFailed(e.to_string()))?
        {
            if entry.file_name().to_string_lossy().starts_with("source.") {
                return Ok(entry.path());
            }
        }

        Err(PlaybackError::FetchFailed(format!("no audio downloaded for {}", lookup_key)))
    }
}

/// Encodes to 48 kHz stereo Ogg/Opus with ffmpeg.
pub struct FfmpegEncoder {
    binary: PathBuf,
    bitrate_kbps: u32,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>, bitrate_kbps: u32) -> Self {
        Self {
            binary: binary.into(),
            bitrate_kbps,
        }
    }

    fn encode_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-nostdin".to_string(),
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            "-b:a".to_string(),
            format!("{}k", self.bitrate_kbps),
            "-ar".to_string(),
            "48000".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-f".to_string(),
            "ogg".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl AudioEncoder for FfmpegEncoder {
    async fn encode(&self, token: &CancellationToken, input: &Path, output: &Path) -> Result<()> {
        debug!("🎛️ Codificando {} a Opus {}k", input.display(), self.bitrate_kbps);
        run_tool(
            Command::new(&self.binary).args(self.encode_args(input, output)),
            token,
            PlaybackError::EncodeFailed,
        )
        .await
    }
}

/// Checks that yt-dlp and ffmpeg can be executed.
pub async fn verify_tools(ytdlp: &Path, ffmpeg: &Path) -> anyhow::Result<()> {
    let checks = [(ytdlp, "--version", "yt-dlp"), (ffmpeg, "-version", "ffmpeg")];

    for (binary, flag, name) in checks {
        match Command::new(binary).arg(flag).output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                let first_line = version.lines().next().unwrap_or_default();
                info!("✅ {} disponible: {}", name, first_line.trim());
            }
            _ => {
                error!("❌ {} no encontrado en {}", name, binary.display());
                anyhow::bail!("{} not available", name);
            }
        }
    }

    Ok(())
}
