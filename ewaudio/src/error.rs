//! Error taxonomy for the playback engine
//!
//! Four families, with different handling policies (matching the retry
//! supervisor and the queue's advancement rules):
//!
//! - transport errors (`Connect`, `Network`, `Timeout`): resets are
//!   retried with backoff up to a cap, then escalate; timeouts and
//!   exhausted retries surface as stream errors
//! - format errors (`Parse`, `NoAudioData`): fatal for the streamer,
//!   never retried by re-parsing
//! - hardware errors (`Output`): fatal, carrying the originating status
//!   code for diagnostics
//! - usage errors (`PacketTooLarge`, `SeekNotReady`, `SeekInFlight`):
//!   rejected synchronously with no state change

use crate::output::OutputError;
use crate::parser::ParseError;

/// Terminal failure of one streamer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    /// Opening the network connection failed
    #[error("failed to connect: {0}")]
    Connect(String),

    /// Network failure after connecting, including exhausted reconnects
    #[error("network failure: {0}")]
    Network(String),

    /// No I/O events within the watchdog window
    #[error("connection timed out")]
    Timeout,

    /// The parser rejected the byte stream
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Stream ended before any audio packet was parsed
    #[error("stream contains no audio data")]
    NoAudioData,

    /// Hardware output queue failure
    #[error(transparent)]
    Output(#[from] OutputError),

    /// A single packet exceeds the slot capacity; configuration error
    #[error("packet of {size} bytes exceeds slot capacity {capacity}")]
    PacketTooLarge { size: usize, capacity: usize },

    /// Seek requested before bitrate and stream length are known
    #[error("seek requires a known bitrate and stream length")]
    SeekNotReady,

    /// Seek requested while another seek is still in flight
    #[error("another seek is in flight")]
    SeekInFlight,
}

impl AudioError {
    /// True for failures the queue should surface as a stream-error
    /// signal (caller decides between retry and skip); format and
    /// hardware errors also surface but are never worth re-parsing.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AudioError::Connect(_) | AudioError::Network(_) | AudioError::Timeout
        )
    }
}
