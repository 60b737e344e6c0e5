//! telecast-core: the per-channel playback engine behind 24/7 linear
//! HLS channels.
//!
//! Each channel runs an independent controller that alternates two
//! transcoder slots: the active slot feeds the published playlist while
//! the next queued movie preloads on the other, and an ad loops
//! whenever the queue is empty. Readiness is observed from the
//! filesystem; the public playlist is republished by byte-copy at every
//! transition.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod logging;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod schedule;
pub mod transcoder;

mod error;

pub use config::{load_config, Config};
pub use error::{Error, Result};
