//! # EtherWave Audio Engine
//!
//! Streaming playback engine: bytes from [`ewstream`] are parsed into
//! encoded audio packets, buffered through a fixed slot ring, and fed
//! to a hardware output queue.
//!
//! The central type is [`Streamer`]: one instance plays one URL from
//! connect to done. It handles frame sync, bitrate estimation, seeking,
//! reconnect-with-backoff after connection resets, and a stall watchdog.
//! Playback hardware sits behind the [`output::OutputQueue`] trait, with
//! a cpal backend for real devices and a simulated backend for tests.
//!
//! ```no_run
//! use ewaudio::output::CpalOutputFactory;
//! use ewaudio::{PlayerConfig, Streamer};
//! use ewstream::NetworkConfig;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(PlayerConfig::default());
//! let net = NetworkConfig::new(&config)?;
//! let streamer = Streamer::new(
//!     "https://radio.example/stream.mp3",
//!     Arc::clone(&config),
//!     net,
//!     Arc::new(CpalOutputFactory),
//!     1.0,
//! );
//! streamer.play().await;
//! # Ok(())
//! # }
//! ```

pub mod bitrate;
pub mod buffer;
mod error;
pub mod events;
pub mod output;
pub mod parser;
pub mod supervisor;
mod streamer;

pub use error::AudioError;
pub use ewconfig::PlayerConfig;
pub use streamer::{
    DoneReason, PlaybackProgress, Streamer, StreamerEvent, StreamerId, StreamerState,
};
