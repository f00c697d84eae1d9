use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub opus_bitrate: u32, // kbps
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Rendimiento
    pub fetch_concurrency: usize,
    pub playlist_cache_ttl: Duration,

    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,

    // APIs (Opcionales)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;
        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("No se pudo crear {}", config.cache_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from any key lookup. Blank values count as
    /// unset.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está configurado")?,
            application_id: var("APPLICATION_ID")
                .context("APPLICATION_ID no está configurado")?
                .trim()
                .parse()
                .context("APPLICATION_ID debe ser numérico")?,
            guild_id: var("GUILD_ID").map(|s| parse("GUILD_ID", &s)).transpose()?,

            // Audio
            opus_bitrate: parse_or(&var, "OPUS_BITRATE", defaults.opus_bitrate)?,
            max_queue_size: parse_or(&var, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_playlist_size: parse_or(&var, "MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,

            // Rendimiento
            fetch_concurrency: parse_or(&var, "FETCH_CONCURRENCY", defaults.fetch_concurrency)?,
            playlist_cache_ttl: match var("PLAYLIST_CACHE_TTL") {
                Some(value) => humantime::parse_duration(value.trim())
                    .with_context(|| format!("PLAYLIST_CACHE_TTL inválido: {}", value))?,
                None => defaults.playlist_cache_ttl,
            },

            // Paths
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            cache_dir: var("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            ytdlp_path: var("YTDLP_PATH").map(PathBuf::from).unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: var("FFMPEG_PATH").map(PathBuf::from).unwrap_or(defaults.ffmpeg_path),

            // APIs
            spotify_client_id: var("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: var("SPOTIFY_CLIENT_SECRET"),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// - Opus bitrate between 8 and 510 kbps
    /// - Queue, playlist and concurrency limits greater than 0
    /// - Playlist cache TTL under ten minutes
    pub fn validate(&self) -> Result<()> {
        if !(8..=510).contains(&self.opus_bitrate) {
            anyhow::bail!(
                "Opus bitrate must be between 8 and 510 kbps, got: {}",
                self.opus_bitrate
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.fetch_concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be greater than 0");
        }

        if self.playlist_cache_ttl.is_zero() || self.playlist_cache_ttl >= Duration::from_secs(600) {
            anyhow::bail!(
                "Playlist cache TTL must be between 1s and 10m, got: {}",
                humantime::format_duration(self.playlist_cache_ttl)
            );
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        Ok(())
    }

    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        self.spotify_client_id
            .clone()
            .zip(self.spotify_client_secret.clone())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and secrets are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}kbps Opus, {} queue, {} playlist tracks\n  \
            Fetch: {} concurrent pages, playlist cache {}\n  \
            Paths: data={}, cache={}\n  \
            Spotify: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.opus_bitrate,
            self.max_queue_size,
            self.max_playlist_size,
            self.fetch_concurrency,
            humantime::format_duration(self.playlist_cache_ttl),
            self.data_dir.display(),
            self.cache_dir.display(),
            if self.spotify_credentials().is_some() { "enabled" } else { "disabled" },
        )
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} inválido: {}", key, value))
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            opus_bitrate: 128,
            max_queue_size: 1000,
            max_playlist_size: 100,

            // Performance defaults
            fetch_concurrency: num_cpus::get(),
            playlist_cache_ttl: Duration::from_secs(30),

            // Path defaults
            data_dir: "/app/data".into(),
            cache_dir: "/app/cache".into(),
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),

            spotify_client_id: None,
            spotify_client_secret: None,
        }
    }
}
