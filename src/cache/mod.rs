//! # Cache Module
//!
//! Small in-memory caches used in front of slower collaborators.
//!
//! [`TtlCache`] is a concurrent map whose entries expire after a fixed
//! time-to-live. The playlist library keeps one per user so repeated
//! `/playlists` and `/spice` calls do not hit the disk every time.

pub mod ttl_cache;

pub use ttl_cache::TtlCache;
