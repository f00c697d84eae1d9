//! # Audio Module
//!
//! Per-guild playback engine.
//!
//! ## Architecture
//!
//! ### [`queue`] - Playback Queue
//! - Ordered tracks with a cursor on the current one
//! - Positions are 1-based and relative to the cursor
//!
//! ### [`session`] - Guild Session
//! - Queue plus run bookkeeping behind one mutex per room
//! - Decides on every mutation whether to dispatch or interrupt
//!
//! ### [`dispatcher`] and [`worker`] - Dispatch Engine
//! - One loop turns dispatch signals into worker runs
//! - A run fetches, encodes and streams exactly one track
//! - Panicking runs are contained and the room goes back to idle
//!
//! ### [`pipeline`] - Fetch & Encode
//! - yt-dlp download and ffmpeg Ogg/Opus encode in a scoped temp dir
//!
//! ### [`player`] - Command façade
//! - Session registry and the operation set used by slash commands
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use guild_jukebox::audio::player::AudioPlayer;
//! # use serenity::all::{GuildId, UserId};
//! # async fn example(player: &AudioPlayer) -> guild_jukebox::error::Result<()> {
//! let guild_id = GuildId::new(123456789);
//!
//! player.play(guild_id, "daft punk one more time", UserId::new(1)).await?;
//! player.pause(guild_id)?;
//! player.resume(guild_id)?;
//! player.skip(guild_id)?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod session;
pub mod transport;
pub mod worker;
