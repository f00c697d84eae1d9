use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::queue::{Appended, QueuePage, QueueSnapshot, VoiceState},
    sources::{CollectionInfo, SourceType, TrackDescriptor},
    storage::PlaylistSummary,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

pub const QUEUE_PAGE_SIZE: usize = 10;

fn source_label(source: SourceType) -> &'static str {
    match source {
        SourceType::YouTube => "YouTube",
        SourceType::Spotify => "Spotify",
        SourceType::Link => "Enlace",
        SourceType::Search => "Búsqueda",
    }
}

/// Crea el embed de "reproduciendo ahora" a partir del estado de la cola
pub fn now_playing_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let Some(track) = &snapshot.current else {
        return CreateEmbed::default()
            .title("⏹️ Nada en reproducción")
            .description("💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    };

    let (title, color) = match snapshot.state {
        VoiceState::Paused => ("⏸️ En pausa", colors::WARNING_ORANGE),
        _ => ("🎵 Reproduciendo Ahora", colors::SUCCESS_GREEN),
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .color(color)
        .field("🎤 Artista", track.artist().unwrap_or("Desconocido"), true)
        .field("⏱️ Duración", duration_label(track.duration()), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by()), true)
        .field("🔗 Fuente", source_label(track.source_type()), true);

    if let Some(next) = snapshot.upcoming.first() {
        embed = embed.field("⏭️ Siguiente", next.display_name(), false);
    }
    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }
    if track.lookup_key().starts_with("http") {
        embed = embed.url(track.lookup_key());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "{} en cola • {}",
            snapshot.upcoming.len(),
            STANDARD_FOOTER
        )))
}

/// Crea un embed para mostrar que se agregaron canciones
pub fn tracks_added_embed(
    first: &TrackDescriptor,
    appended: &Appended,
    collection: Option<&CollectionInfo>,
) -> CreateEmbed {
    let mut embed = match collection {
        Some(info) => CreateEmbed::default()
            .title("📋 Playlist Agregada Exitosamente")
            .description(format!(
                "Se agregaron **{} canciones** de **{}** a la cola",
                appended.added, info.name
            ))
            .color(colors::MUSIC_PURPLE),
        None => CreateEmbed::default()
            .title("✅ Canción Agregada Exitosamente")
            .description(format!("**{}** se ha agregado a la cola", first.display_name()))
            .field("⏱️ Duración", duration_label(first.duration()), true)
            .color(colors::SUCCESS_GREEN),
    };

    embed = embed.field("📍 Posición", appended.position.to_string(), true);
    if appended.truncated > 0 {
        embed = embed.field(
            "⚠️ Cola llena",
            format!("{} canciones no se agregaron", appended.truncated),
            false,
        );
    }

    let thumbnail = collection
        .and_then(|info| info.thumbnail.as_deref())
        .or(first.thumbnail());
    if let Some(thumbnail) = thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    let Some(current) = &snapshot.current else {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    };

    let status = if snapshot.state == VoiceState::Paused { "⏸️" } else { "▶️" };
    embed = embed.field(
        format!("{} Reproduciendo", status),
        format!("**1**. {}", current.display_name()),
        false,
    );

    let queue_page = snapshot.page(page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        embed = embed.field("Próximas canciones", queue_lines(&queue_page), false);
    }

    let mut info = format!("**Total:** {} canciones", snapshot.upcoming.len() + 1);
    if snapshot.total_duration > Duration::ZERO {
        info.push_str(&format!(" • **Duración:** {}", format_duration(snapshot.total_duration)));
    }
    if snapshot.played > 0 {
        info.push_str(&format!(" • **Reproducidas:** {}", snapshot.played));
    }
    embed = embed.field("Información", info, false);

    let footer = if queue_page.total_pages > 1 {
        format!(
            "Página {} de {} • {}",
            queue_page.current_page, queue_page.total_pages, STANDARD_FOOTER
        )
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed.footer(CreateEmbedFooter::new(footer)).timestamp(Timestamp::now())
}

fn queue_lines(page: &QueuePage) -> String {
    page.items
        .iter()
        .map(|(position, track)| {
            let duration = track
                .duration()
                .map(|d| format!(" `[{}]`", format_duration(d)))
                .unwrap_or_default();
            format!("**{}**. {}{}\n", position, track.display_name(), duration)
        })
        .collect()
}

pub fn playlists_embed(playlists: &[PlaylistSummary]) -> CreateEmbed {
    let description = if playlists.is_empty() {
        "No tienes playlists guardadas.\n💡 Usa `/playlist-save <nombre>` para guardar la cola actual"
            .to_string()
    } else {
        playlists
            .iter()
            .map(|p| format!("• **{}** ({} canciones)\n", p.name, p.tracks))
            .collect()
    };

    CreateEmbed::default()
        .title("💾 Tus Playlists")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn duration_label(duration: Option<Duration>) -> String {
    duration.map(format_duration).unwrap_or_else(|| "🔴 En vivo".to_string())
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
