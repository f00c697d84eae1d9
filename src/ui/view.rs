use async_trait::async_trait;
use serenity::{
    all::{ChannelId, MessageId},
    builder::{CreateMessage, EditMessage},
    http::Http,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audio::queue::QueueSnapshot;
use crate::ui::embeds;

/// Something on screen showing what a room is playing.
#[async_trait]
pub trait NowPlayingView: Send + Sync {
    async fn refresh(&self, snapshot: &QueueSnapshot);

    async fn destroy(&self);
}

/// User-visible notices raised by the playback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    TrackFailed { title: String, reason: String },
    RunCrashed,
}

#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, notice: Notice);
}

/// A now-playing embed kept up to date in a text channel.
pub struct MessageView {
    http: Arc<Http>,
    channel_id: ChannelId,
    message_id: MessageId,
}

impl MessageView {
    /// Posts the initial embed and returns the view wrapping it.
    pub async fn post(
        http: Arc<Http>,
        channel_id: ChannelId,
        snapshot: &QueueSnapshot,
    ) -> serenity::Result<Self> {
        let message = channel_id
            .send_message(&*http, CreateMessage::new().embed(embeds::now_playing_embed(snapshot)))
            .await?;

        Ok(Self {
            http,
            channel_id,
            message_id: message.id,
        })
    }
}

#[async_trait]
impl NowPlayingView for MessageView {
    async fn refresh(&self, snapshot: &QueueSnapshot) {
        let edit = EditMessage::new().embed(embeds::now_playing_embed(snapshot));
        if let Err(e) = self
            .channel_id
            .edit_message(&*self.http, self.message_id, edit)
            .await
        {
            warn!("No se pudo actualizar el mensaje de reproducción: {}", e);
        }
    }

    async fn destroy(&self) {
        if let Err(e) = self.channel_id.delete_message(&*self.http, self.message_id).await {
            debug!("Mensaje de reproducción ya eliminado: {}", e);
        }
    }
}

/// Posts notices to the text channel the session was started from.
pub struct ChannelAnnouncer {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn announce(&self, notice: Notice) {
        let embed = match notice {
            Notice::TrackFailed { title, reason } => embeds::error_embed(
                "No se pudo reproducir",
                &format!("**{}**\n`{}`\n\nUsa `/skip` para pasar a la siguiente.", title, reason),
            ),
            Notice::RunCrashed => embeds::error_embed(
                "Error inesperado",
                "La reproducción se detuvo por un error interno. Usa `/play` o `/skip` para continuar.",
            ),
        };

        if let Err(e) = self
            .channel_id
            .send_message(&*self.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!("No se pudo enviar el aviso: {}", e);
        }
    }
}
