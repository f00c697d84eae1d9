//! Discord-facing presentation: embeds and the now-playing view.

pub mod embeds;
pub mod view;
