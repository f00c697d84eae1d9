//! # Guild Jukebox
//!
//! Per-guild Discord music playback: a cursor-based queue per room, a
//! dispatch engine that runs one interruptible worker per room, and a
//! yt-dlp/ffmpeg pipeline feeding songbird.

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;
