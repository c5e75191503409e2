//! Hardware output seam
//!
//! The streamer talks to playback hardware through [`OutputQueue`]:
//! filled slots go in, typed events come back on a channel. Slots are
//! identified by ring index, and the output echoes that index back in
//! [`OutputEvent::SlotConsumed`] once the slot's audio has been played,
//! which is what releases the slot in the ring.
//!
//! [`CpalOutput`] is the real backend; [`SimulatedOutput`] lets tests
//! drive consumption deterministically without a sound card.

use crate::buffer::SlotSubmission;
use crate::parser::StreamFormat;
use tokio::sync::mpsc;

mod cpal_backend;
mod simulated;

pub use cpal_backend::{CpalOutput, CpalOutputFactory};
pub use simulated::{SimulatedOutput, SimulatedOutputDriver, SimulatedOutputFactory};

/// Hardware or decoder failure; fatal for the current streamer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    /// Device-level failure with the backend status code
    #[error("output device failure ({code}): {message}")]
    Device { code: i32, message: String },

    /// A packet could not be decoded
    #[error("decode failure: {0}")]
    Decode(String),

    /// The output was closed and can accept nothing further
    #[error("output queue closed")]
    Closed,
}

/// Events reported by an output backend
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// The slot with this ring index finished playing
    SlotConsumed(usize),
    /// Audio started or stopped flowing to the device
    Running(bool),
    /// The backend died asynchronously
    Failed(OutputError),
}

/// Playback queue for filled slots
pub trait OutputQueue: Send {
    /// Hand a filled slot to the backend
    fn submit(&mut self, slot: SlotSubmission) -> Result<(), OutputError>;

    /// Begin playback; called once enough slots are buffered
    fn start(&mut self) -> Result<(), OutputError>;

    fn set_paused(&mut self, paused: bool) -> Result<(), OutputError>;

    /// Playback gain, 0.0 to 1.0
    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError>;

    /// Take the event channel; yields once
    fn take_events(&mut self) -> Option<mpsc::Receiver<OutputEvent>>;
}

/// Builds an output queue once the stream format is known
pub trait OutputFactory: Send + Sync {
    fn create(
        &self,
        format: StreamFormat,
        volume: f32,
    ) -> Result<Box<dyn OutputQueue>, OutputError>;
}
