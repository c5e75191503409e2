//! Incremental audio frame parsing
//!
//! Parsers consume raw bytes as they arrive and demultiplex them into
//! whole encoded packets plus stream properties. They keep partial-frame
//! state across calls; a `discontinuous` parse drops that state and
//! re-acquires frame sync, which is how the streamer resumes after a
//! seek or a reconnect.

use bytes::Bytes;

mod adts;
mod mpeg;

pub use adts::AdtsParser;
pub use mpeg::MpegParser;

/// Supported packet codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Mp3,
    AacAdts,
}

impl Codec {
    /// Pick a codec from the content type, falling back to the URL
    /// extension and finally to MP3 when nothing matches.
    pub fn from_hint(content_type: Option<&str>, url: &str) -> Self {
        if let Some(ct) = content_type {
            let ct = ct.split(';').next().unwrap_or(ct).trim();
            match ct {
                "audio/mpeg" | "audio/mp3" | "audio/mpa" => return Codec::Mp3,
                "audio/aac" | "audio/aacp" | "audio/x-aac" => return Codec::AacAdts,
                _ => {}
            }
        }
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit('.').next() {
            Some("aac") => Codec::AacAdts,
            Some("mp3") => Codec::Mp3,
            _ => Codec::Mp3,
        }
    }

    /// Build the frame parser for this codec
    pub fn parser(self) -> Box<dyn FrameParser> {
        match self {
            Codec::Mp3 => Box::new(MpegParser::new()),
            Codec::AacAdts => Box::new(AdtsParser::new()),
        }
    }
}

/// Stream properties discovered by a parser
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub codec: Codec,
    pub sample_rate: u32,
    pub frames_per_packet: u32,
}

impl StreamFormat {
    /// Playback duration of one packet in seconds
    pub fn packet_duration_secs(&self) -> f64 {
        self.frames_per_packet as f64 / self.sample_rate as f64
    }
}

/// Incremental parse output, emitted in discovery order: `DataOffset`
/// and `Format` precede `Ready`, which precedes the first `Packet`.
#[derive(Debug, Clone)]
pub enum ParserEvent {
    /// Byte offset of the first audio frame in the stream (after any
    /// leading tag data)
    DataOffset(u64),
    /// Codec properties became known
    Format(StreamFormat),
    /// Parser is ready to produce packets
    Ready,
    /// One whole encoded frame
    Packet(Bytes),
}

/// Packet-boundary alignment of a seek target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekAlignment {
    /// Aligned byte offset
    pub offset: u64,
    /// When true the alignment is only an estimate and the caller should
    /// keep its own proportional target instead
    pub estimated: bool,
}

/// Reason a parse failed; carried in the error as the underlying status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserStatus {
    /// No frame sync found within the resync budget
    LostSync,
    /// A frame header decoded to reserved or impossible field values
    BadHeader,
}

/// Parse failure; fatal for the current streamer (reconnecting is the
/// only recovery, never re-parsing the same bytes)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse failure: {status:?} at byte {at}")]
pub struct ParseError {
    pub status: ParserStatus,
    /// Absolute stream position where parsing gave up
    pub at: u64,
}

/// Push-based incremental frame parser
pub trait FrameParser: Send {
    /// Feed bytes in; returns packets and property updates in order.
    ///
    /// `discontinuous` must be true on the first call after a seek or a
    /// reconnect: partial-frame state is dropped and sync re-acquired.
    fn parse(&mut self, input: &[u8], discontinuous: bool) -> Result<Vec<ParserEvent>, ParseError>;

    /// Align an estimated byte offset to a packet boundary. When the
    /// stream layout makes exact alignment impossible the result is
    /// flagged as an estimate.
    fn align_seek(&self, approx_offset: u64) -> SeekAlignment;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_prefers_content_type() {
        assert_eq!(
            Codec::from_hint(Some("audio/aac"), "http://x/stream.mp3"),
            Codec::AacAdts
        );
        assert_eq!(
            Codec::from_hint(Some("audio/mpeg; charset=binary"), "http://x/s"),
            Codec::Mp3
        );
    }

    #[test]
    fn hint_falls_back_to_extension_then_default() {
        assert_eq!(Codec::from_hint(None, "http://x/a.aac?sid=1"), Codec::AacAdts);
        assert_eq!(Codec::from_hint(None, "http://x/a.mp3"), Codec::Mp3);
        assert_eq!(Codec::from_hint(Some("application/octet-stream"), "http://x/stream"), Codec::Mp3);
    }

    #[test]
    fn packet_duration_follows_format() {
        let format = StreamFormat {
            codec: Codec::Mp3,
            sample_rate: 44100,
            frames_per_packet: 1152,
        };
        assert!((format.packet_duration_secs() - 0.0261224).abs() < 1e-6);
    }
}
