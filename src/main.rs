use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use guild_jukebox::{
    audio::{
        dispatcher::Dispatcher,
        pipeline::{self, FetchEncodePipeline, FfmpegEncoder, YtDlpResolver},
        player::AudioPlayer,
    },
    bot::JukeboxBot,
    config::Config,
    sources::{spotify::SpotifyClient, youtube::YouTubeClient, MusicCatalog, TrackResolver},
    storage::{JsonPlaylistStore, PlaylistLibrary},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        pipeline::verify_tools(&config.ytdlp_path, &config.ffmpeg_path).await?;
        println!("OK");
        return Ok(());
    }

    info!("{}", config.summary());
    if let Err(e) = pipeline::verify_tools(&config.ytdlp_path, &config.ffmpeg_path).await {
        error!("⚠️ Dependencias de audio incompletas: {:?}", e);
    }

    // Catálogos
    let music: Option<Arc<dyn MusicCatalog>> = config.spotify_credentials().map(|(id, secret)| {
        info!("🎧 Spotify habilitado");
        Arc::new(SpotifyClient::new(id, secret)) as Arc<dyn MusicCatalog>
    });
    let resolver = Arc::new(TrackResolver::new(
        Arc::new(YouTubeClient::new(config.ytdlp_path.clone())),
        music,
        config.fetch_concurrency,
        config.max_playlist_size,
    ));

    // Playlists guardadas
    let store = JsonPlaylistStore::new(config.data_dir.clone()).await?;
    let library = Arc::new(PlaylistLibrary::new(Arc::new(store), config.playlist_cache_ttl));
    let cache_cleanup = library.spawn_cleanup();

    // Motor de reproducción
    let media = Arc::new(FetchEncodePipeline::new(
        Arc::new(YtDlpResolver::new(config.ytdlp_path.clone())),
        Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone(), config.opus_bitrate)),
        config.cache_dir.clone(),
    ));
    let dispatcher = Dispatcher::new(media);
    let dispatch_loop = dispatcher.start();
    let player = Arc::new(AudioPlayer::new(
        dispatcher,
        resolver,
        library,
        config.max_queue_size,
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), player.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let shutdown_player = player.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    if let Some(handle) = dispatch_loop {
        handle.abort();
    }
    cache_cleanup.abort();
    Ok(())
}
