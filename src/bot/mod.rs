//! # Bot Module
//!
//! Discord glue around the playback engine:
//! - Slash command registration and handling
//! - Voice connection management through songbird
//! - Session teardown when the bot is disconnected or left alone
//!
//! The [`JukeboxBot`] struct implements Serenity's [`EventHandler`] trait
//! and forwards every command to the [`AudioPlayer`].

use anyhow::{anyhow, Result};
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod voice;

use crate::{
    audio::player::AudioPlayer,
    config::Config,
    error::PlaybackError,
    ui::view::ChannelAnnouncer,
};
use voice::SongbirdTransport;

/// Main Discord event handler.
pub struct JukeboxBot {
    config: Arc<Config>,
    pub player: Arc<AudioPlayer>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, player: Arc<AudioPlayer>) -> Self {
        Self { config, player }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow!("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow!("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Joins the user's voice channel and opens the room's session.
    ///
    /// Does nothing when the bot is already connected in this guild.
    pub async fn connect(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
        text_channel: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow!("Songbird no inicializado"))?;

        if self.player.has_session(guild_id) && manager.get(guild_id).is_some() {
            return Ok(());
        }

        let voice_channel = user_voice_channel(ctx, guild_id, user_id)?;
        manager.join(guild_id, voice_channel).await.map_err(|e| {
            error!("Error al conectar al canal de voz: {:?}", e);
            anyhow!("Error al conectar al canal de voz")
        })?;

        let transport = Arc::new(SongbirdTransport::new(manager, guild_id));
        let announcer = Arc::new(ChannelAnnouncer::new(ctx.http.clone(), text_channel));
        self.player.open_session(guild_id, transport, announcer);

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(())
    }

    /// Closes the room's session and leaves the voice channel.
    pub async fn disconnect(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        self.player.close_session(guild_id).await;

        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow!("Songbird no inicializado"))?;
        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = commands::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Tears the session down when the bot is disconnected or left alone.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        if new.user_id == bot_id {
            if old.is_some() && new.channel_id.is_none() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                if let Err(e) = self.disconnect(&ctx, guild_id).await {
                    warn!("Error limpiando la sesión: {:?}", e);
                }
            }
            return;
        }

        if !self.player.has_session(guild_id) {
            return;
        }

        if humans_with_bot(&ctx, guild_id, bot_id) == Some(0) {
            info!("🚪 Canal de voz vacío, saliendo de guild {}", guild_id);
            if let Err(e) = self.disconnect(&ctx, guild_id).await {
                warn!("Error en auto-desconexión: {:?}", e);
            }
        }
    }
}

/// Number of non-bot users sharing the bot's voice channel, if the bot is in one.
fn humans_with_bot(ctx: &Context, guild_id: GuildId, bot_id: UserId) -> Option<usize> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    let channel = guild.voice_states.get(&bot_id)?.channel_id?;

    let humans = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
        .filter(|state| !state.member.as_ref().is_some_and(|m| m.user.bot))
        .count();
    debug!("👥 {} usuarios en el canal {} de guild {}", humans, channel, guild_id);
    Some(humans)
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow!("Guild no encontrada en caché"))?;

    let channel = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| PlaybackError::conflict("Debes estar en un canal de voz"))?;
    Ok(channel)
}
