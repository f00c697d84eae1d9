use std::sync::Arc;
use tracing::{debug, error, info};

use crate::audio::{
    pipeline::MediaPipeline,
    session::{GuildSession, RunEnd, RunPlan},
    transport::{Interrupts, StreamControl, StreamEnd},
};
use crate::error::PlaybackError;
use crate::ui::view::Notice;

/// One playback run for a room: fetch the track at the cursor, stream it,
/// then hand the outcome back to the session.
pub async fn run(session: Arc<GuildSession>, pipeline: Arc<dyn MediaPipeline>) {
    let mut interrupts = session.lock_interrupts().await;

    let Some(plan) = session.begin_run(&mut interrupts) else {
        debug!(guild_id = %session.guild_id(), "Nada que reproducir");
        return;
    };

    session.refresh_view();
    let end = play(&session, pipeline.as_ref(), &plan, &mut interrupts).await;
    debug!(guild_id = %session.guild_id(), "Ejecución terminada: {:?}", end);

    session.finish_run(end, &mut interrupts);
}

async fn play(
    session: &GuildSession,
    pipeline: &dyn MediaPipeline,
    plan: &RunPlan,
    interrupts: &mut Interrupts,
) -> RunEnd {
    let guild_id = session.guild_id();
    let title = plan.track.display_name();
    let token = &plan.token;

    info!(guild_id = %guild_id, "🎵 Preparando: {}", title);

    // Dropping the fetch kills the external tool and removes its work dir
    let fetched = tokio::select! {
        result = pipeline.fetch_and_encode(token, plan.track.lookup_key()) => result,
        Some(()) = interrupts.recv() => {
            debug!(guild_id = %guild_id, "⏭️ Descarga cancelada por interrupción");
            return RunEnd::Interrupted;
        }
        _ = token.cancelled() => return RunEnd::Cancelled,
    };

    let audio = match fetched {
        Ok(audio) => audio,
        Err(PlaybackError::Cancelled) => return RunEnd::Cancelled,
        Err(e) => {
            error!(guild_id = %guild_id, track = %title, "❌ Error preparando pista: {}", e);
            session.announce(Notice::TrackFailed {
                title,
                reason: e.to_string(),
            });
            return RunEnd::Failed;
        }
    };

    info!(guild_id = %guild_id, "▶️ Reproduciendo: {}", title);
    let control = StreamControl {
        interrupts,
        paused: session.paused(),
    };

    let streamed = tokio::select! {
        result = session.transport().stream(audio, control) => result,
        _ = token.cancelled() => return RunEnd::Cancelled,
    };

    match streamed {
        Ok(StreamEnd::Finished) => RunEnd::Completed,
        Ok(StreamEnd::Interrupted) => RunEnd::Interrupted,
        Err(e) => {
            error!(guild_id = %guild_id, track = %title, "❌ Error de transmisión: {}", e);
            session.announce(Notice::TrackFailed {
                title,
                reason: e.to_string(),
            });
            RunEnd::Failed
        }
    }
}
