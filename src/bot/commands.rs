use anyhow::{anyhow, Result};
use serenity::{
    builder::{
        CreateCommand, CreateCommandOption, CreateEmbed, CreateInteractionResponse,
        CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, CommandOptionType},
        id::GuildId,
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    bot::JukeboxBot,
    error::PlaybackError,
    ui::{embeds, view::MessageView},
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        CreateCommand::new("skip").description("Salta a la siguiente canción"),
        CreateCommand::new("rewind").description("Vuelve a la canción anterior"),
        CreateCommand::new("pause").description("Pausa la reproducción actual"),
        CreateCommand::new("resume").description("Reanuda la reproducción pausada"),
        CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola"),
        queue_command(),
        CreateCommand::new("nowplaying").description("Muestra la canción actual en este canal"),
        CreateCommand::new("shuffle").description("Mezcla las próximas canciones"),
        CreateCommand::new("clear").description("Elimina las próximas canciones de la cola"),
        remove_command(),
        swap_command(),
        CreateCommand::new("spice").description("Reproduce ya una canción al azar de tus playlists"),
        playlist_name_command("playlist-save", "Guarda la cola actual como playlist"),
        playlist_name_command("playlist-load", "Agrega una playlist guardada a la cola"),
        playlist_name_command("playlist-delete", "Elimina una playlist guardada"),
        CreateCommand::new("playlists").description("Lista tus playlists guardadas"),
        CreateCommand::new("join").description("Conecta el bot a tu canal de voz"),
        CreateCommand::new("leave").description("Desconecta el bot del canal de voz"),
    ]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL o término de búsqueda")
                .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn position_option(name: &str, description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Integer, name, description)
        .min_int_value(1)
        .required(true)
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Elimina una canción de la cola")
        .add_option(position_option("position", "Posición en la cola (1 es la actual)"))
}

fn swap_command() -> CreateCommand {
    CreateCommand::new("swap")
        .description("Intercambia dos canciones de la cola")
        .add_option(position_option("first", "Primera posición"))
        .add_option(position_option("second", "Segunda posición"))
}

fn playlist_name_command(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name).description(description).add_option(
        CreateCommandOption::new(CommandOptionType::String, "name", "Nombre de la playlist")
            .required(true),
    )
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // These may hit catalogs or disk before answering
    let slow = matches!(
        command.data.name.as_str(),
        "play" | "spice" | "playlist-save" | "playlist-load"
    );
    if slow {
        command.defer(&ctx.http).await?;
    }

    let (embed, ephemeral) = match run_command(ctx, &command, bot, guild_id).await {
        Ok(embed) => (embed, false),
        Err(e) => (failure_embed(guild_id, &command.data.name, e), true),
    };

    match reply_mode(slow, ephemeral) {
        Reply::Edit => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
        }
        Reply::Followup => {
            // A deferred reply is public: swap it for a private follow-up
            command.delete_response(&ctx.http).await?;
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new().embed(embed).ephemeral(true),
                )
                .await?;
        }
        Reply::Create => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(embed)
                            .ephemeral(ephemeral),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Create,
    Edit,
    Followup,
}

fn reply_mode(deferred: bool, ephemeral: bool) -> Reply {
    match (deferred, ephemeral) {
        (false, _) => Reply::Create,
        (true, false) => Reply::Edit,
        (true, true) => Reply::Followup,
    }
}

fn failure_embed(guild_id: GuildId, name: &str, e: anyhow::Error) -> CreateEmbed {
    match e.downcast_ref::<PlaybackError>() {
        Some(playback) if playback.is_notice() => {
            embeds::error_embed("No se pudo completar", &playback.to_string())
        }
        _ => {
            error!(guild_id = %guild_id, "Error en /{}: {:?}", name, e);
            embeds::error_embed("Error", &format!("{}", e))
        }
    }
}

async fn run_command(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<CreateEmbed> {
    let player = &bot.player;
    let user = command.user.id;

    let embed = match command.data.name.as_str() {
        "play" => {
            let query = string_option(command, "query")?;
            bot.connect(ctx, guild_id, user, command.channel_id).await?;
            let queued = player.play(guild_id, query, user).await?;
            embeds::tracks_added_embed(&queued.first, &queued.appended, queued.collection.as_ref())
        }
        "skip" => {
            let track = player.skip(guild_id)?;
            embeds::success_embed("Saltada", &format!("Ahora: **{}**", track.display_name()))
        }
        "rewind" => {
            let track = player.rewind(guild_id)?;
            embeds::success_embed("Anterior", &format!("Ahora: **{}**", track.display_name()))
        }
        "pause" => {
            player.pause(guild_id)?;
            embeds::success_embed("Pausado", "⏸️ Reproducción pausada")
        }
        "resume" => {
            player.resume(guild_id)?;
            embeds::success_embed("Reanudado", "▶️ Reproducción reanudada")
        }
        "stop" => {
            let dropped = player.stop(guild_id)?;
            embeds::success_embed("Detenido", &format!("⏹️ Se quitaron {} canciones", dropped))
        }
        "queue" => {
            let page = integer_option(command, "page").unwrap_or(1);
            embeds::queue_embed(&player.snapshot(guild_id)?, usize::try_from(page).unwrap_or(1))
        }
        "nowplaying" => {
            let snapshot = player.snapshot(guild_id)?;
            let view = MessageView::post(ctx.http.clone(), command.channel_id, &snapshot).await?;
            player.attach_view(guild_id, Arc::new(view))?;
            embeds::success_embed("Vista creada", "🎵 El mensaje se actualizará con cada canción")
        }
        "shuffle" => {
            let shuffled = player.shuffle(guild_id)?;
            embeds::success_embed("Mezclado", &format!("🔀 {} canciones mezcladas", shuffled))
        }
        "clear" => {
            let cleared = player.clear(guild_id)?;
            embeds::success_embed("Cola limpiada", &format!("🗑️ Se quitaron {} canciones", cleared))
        }
        "remove" => {
            let position = position(command, "position")?;
            let track = player.remove(guild_id, position)?;
            embeds::success_embed("Eliminada", &format!("❌ **{}**", track.display_name()))
        }
        "swap" => {
            let first = position(command, "first")?;
            let second = position(command, "second")?;
            player.swap(guild_id, first, second)?;
            embeds::success_embed("Intercambiadas", &format!("🔄 Posiciones {} y {}", first, second))
        }
        "spice" => {
            bot.connect(ctx, guild_id, user, command.channel_id).await?;
            let track = player.spice(guild_id, user).await?;
            embeds::success_embed("Spice", &format!("🌶️ **{}**", track.display_name()))
        }
        "playlist-save" => {
            let name = string_option(command, "name")?;
            let saved = player.save_playlist(guild_id, user, name).await?;
            embeds::success_embed("Playlist guardada", &format!("💾 **{}** ({} canciones)", name, saved))
        }
        "playlist-load" => {
            let name = string_option(command, "name")?;
            bot.connect(ctx, guild_id, user, command.channel_id).await?;
            let appended = player.load_playlist(guild_id, user, name).await?;
            embeds::success_embed(
                "Playlist cargada",
                &format!("📋 {} canciones agregadas desde la posición {}", appended.added, appended.position),
            )
        }
        "playlist-delete" => {
            let name = string_option(command, "name")?;
            player.delete_playlist(user, name).await?;
            embeds::success_embed("Playlist eliminada", &format!("🗑️ **{}**", name))
        }
        "playlists" => embeds::playlists_embed(&player.list_playlists(user).await?),
        "join" => {
            bot.connect(ctx, guild_id, user, command.channel_id).await?;
            embeds::success_embed("Conectado", "🔊 Listo para reproducir")
        }
        "leave" => {
            bot.disconnect(ctx, guild_id).await?;
            embeds::success_embed("Desconectado", "👋 Hasta luego")
        }
        other => return Err(anyhow!("Comando no reconocido: {}", other)),
    };

    Ok(embed)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Result<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow!("Opción `{}` no proporcionada", name))
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn position(command: &CommandInteraction, name: &str) -> Result<usize> {
    let value = integer_option(command, name).ok_or_else(|| anyhow!("Opción `{}` no proporcionada", name))?;
    // Non-positive values surface as an invalid position from the queue
    Ok(usize::try_from(value).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn command_names_are_unique_and_discord_safe() {
        let commands = all_commands();
        let names: Vec<String> = commands
            .iter()
            .map(|c| serde_json::to_value(c).unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        let unique: HashSet<&String> = names.iter().collect();

        assert_eq!(unique.len(), names.len());
        assert!(names
            .iter()
            .all(|n| n.len() <= 32 && n.chars().all(|c| c.is_ascii_lowercase() || c == '-')));
    }

    #[test]
    fn deferred_failures_are_sent_privately() {
        assert_eq!(reply_mode(true, true), Reply::Followup);
        assert_eq!(reply_mode(true, false), Reply::Edit);
        assert_eq!(reply_mode(false, true), Reply::Create);
        assert_eq!(reply_mode(false, false), Reply::Create);
    }

    #[test]
    fn notices_are_rendered_without_the_error_prefix() {
        let embed = failure_embed(
            GuildId::new(1),
            "skip",
            PlaybackError::conflict("there is no next track").into(),
        );
        let json = serde_json::to_value(embed).unwrap();
        assert_eq!(json["description"], "there is no next track");
    }
}
