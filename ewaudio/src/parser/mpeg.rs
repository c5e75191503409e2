//! MPEG audio (Layer III) frame parser
//!
//! Demultiplexes an MP3 byte stream into whole frames: skips a leading
//! ID3v2 tag (reporting the audio data offset), acquires frame sync by
//! requiring two consecutive valid headers, then slices frames using the
//! length derived from each header. Frames are the engine's packets.

use super::{
    Codec, FrameParser, ParseError, ParserEvent, ParserStatus, SeekAlignment, StreamFormat,
};
use bytes::Bytes;
use tracing::{debug, trace};

/// Garbage tolerated while hunting for frame sync before the stream is
/// declared unparseable
const RESYNC_BUDGET: usize = 64 * 1024;

const MPEG1_BITRATES_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
    0, // index 15 is invalid
];
const MPEG2_BITRATES_KBPS: [u32; 16] =
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];
const MPEG1_SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 32_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    version: Version,
    bitrate_index: u8,
    sample_rate: u32,
    frame_len: usize,
}

impl FrameHeader {
    fn samples_per_frame(&self) -> u32 {
        match self.version {
            Version::Mpeg1 => 1152,
            _ => 576,
        }
    }
}

/// Decode a 4-byte MPEG audio frame header; `None` for anything that is
/// not a valid Layer III header with a determinate frame length.
fn decode_header(b: &[u8]) -> Option<FrameHeader> {
    if b.len() < 4 || b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = match (b[1] >> 3) & 0x3 {
        0 => Version::Mpeg25,
        2 => Version::Mpeg2,
        3 => Version::Mpeg1,
        _ => return None, // reserved
    };
    // Layer III only; 0b01 encodes Layer III
    if (b[1] >> 1) & 0x3 != 0b01 {
        return None;
    }
    let bitrate_index = (b[2] >> 4) & 0xF;
    let bitrate_kbps = match version {
        Version::Mpeg1 => MPEG1_BITRATES_KBPS[bitrate_index as usize],
        _ => MPEG2_BITRATES_KBPS[bitrate_index as usize],
    };
    if bitrate_kbps == 0 {
        // free-format and invalid indices have no determinate length
        return None;
    }
    let sr_index = (b[2] >> 2) & 0x3;
    if sr_index == 3 {
        return None;
    }
    let sample_rate = {
        let base = MPEG1_SAMPLE_RATES[sr_index as usize];
        match version {
            Version::Mpeg1 => base,
            Version::Mpeg2 => base / 2,
            Version::Mpeg25 => base / 4,
        }
    };
    let padding = ((b[2] >> 1) & 0x1) as usize;
    let factor = match version {
        Version::Mpeg1 => 144_000,
        _ => 72_000,
    };
    let frame_len = (factor * bitrate_kbps as usize) / sample_rate as usize + padding;
    if frame_len < 4 {
        return None;
    }
    Some(FrameHeader {
        version,
        bitrate_index,
        sample_rate,
        frame_len,
    })
}

#[derive(Debug)]
enum State {
    /// Stream start: check for an ID3v2 tag
    Start,
    /// Skipping the remainder of an ID3v2 tag
    SkipId3 { remaining: usize },
    /// Hunting for two consecutive valid frame headers
    Sync,
    /// Locked: slicing frames
    Stream,
}

/// Incremental MP3 frame parser
pub struct MpegParser {
    pending: Vec<u8>,
    /// Absolute stream position of `pending[0]`
    abs_pos: u64,
    state: State,
    format: Option<StreamFormat>,
    data_offset: Option<u64>,
    /// Total length of every frame seen so far, when they all agree;
    /// exact seek alignment is only possible for such streams
    uniform_len: Option<usize>,
    varied: bool,
    garbage: usize,
}

impl MpegParser {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            abs_pos: 0,
            state: State::Start,
            format: None,
            data_offset: None,
            uniform_len: None,
            varied: false,
            garbage: 0,
        }
    }

    fn note_frame(&mut self, len: usize) {
        match self.uniform_len {
            None => self.uniform_len = Some(len),
            Some(known) if known != len => self.varied = true,
            _ => {}
        }
    }

    /// A header at `pos` counts as sync only when the header right after
    /// the frame it describes is also valid (or not yet available).
    fn confirmed_at(&self, pos: usize) -> Confirmation {
        let Some(header) = decode_header(&self.pending[pos..]) else {
            return Confirmation::No;
        };
        let next = pos + header.frame_len;
        if next + 4 > self.pending.len() {
            return Confirmation::NeedMoreData;
        }
        if decode_header(&self.pending[next..]).is_some() {
            Confirmation::Yes(header)
        } else {
            Confirmation::No
        }
    }
}

enum Confirmation {
    Yes(FrameHeader),
    No,
    NeedMoreData,
}

impl Default for MpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser for MpegParser {
    fn parse(&mut self, input: &[u8], discontinuous: bool) -> Result<Vec<ParserEvent>, ParseError> {
        if discontinuous {
            trace!(dropped = self.pending.len(), "discontinuity, re-acquiring sync");
            self.abs_pos += self.pending.len() as u64;
            self.pending.clear();
            self.garbage = 0;
            if !matches!(self.state, State::Start) {
                self.state = State::Sync;
            }
        }
        self.pending.extend_from_slice(input);

        let mut events = Vec::new();
        let mut pos = 0usize;

        loop {
            match self.state {
                State::Start => {
                    if self.pending.len() - pos < 10 {
                        break;
                    }
                    if &self.pending[pos..pos + 3] == b"ID3" {
                        let b = &self.pending[pos + 6..pos + 10];
                        let size = ((b[0] as usize & 0x7F) << 21)
                            | ((b[1] as usize & 0x7F) << 14)
                            | ((b[2] as usize & 0x7F) << 7)
                            | (b[3] as usize & 0x7F);
                        debug!(size, "skipping ID3v2 tag");
                        pos += 10;
                        self.state = State::SkipId3 { remaining: size };
                    } else {
                        self.state = State::Sync;
                    }
                }
                State::SkipId3 { remaining } => {
                    let available = self.pending.len() - pos;
                    let skip = remaining.min(available);
                    pos += skip;
                    if skip == remaining {
                        self.state = State::Sync;
                    } else {
                        self.state = State::SkipId3 {
                            remaining: remaining - skip,
                        };
                        break;
                    }
                }
                State::Sync => {
                    let mut found = None;
                    let mut need_more = false;
                    let mut scan = pos;
                    while scan + 4 <= self.pending.len() {
                        match self.confirmed_at(scan) {
                            Confirmation::Yes(header) => {
                                found = Some((scan, header));
                                break;
                            }
                            Confirmation::NeedMoreData => {
                                need_more = true;
                                break;
                            }
                            Confirmation::No => {
                                scan += 1;
                                self.garbage += 1;
                                if self.garbage > RESYNC_BUDGET {
                                    return Err(ParseError {
                                        status: ParserStatus::LostSync,
                                        at: self.abs_pos + scan as u64,
                                    });
                                }
                            }
                        }
                    }
                    match found {
                        Some((at, header)) => {
                            pos = at;
                            self.garbage = 0;
                            if self.data_offset.is_none() {
                                let offset = self.abs_pos + at as u64;
                                self.data_offset = Some(offset);
                                events.push(ParserEvent::DataOffset(offset));
                            }
                            if self.format.is_none() {
                                let format = StreamFormat {
                                    codec: Codec::Mp3,
                                    sample_rate: header.sample_rate,
                                    frames_per_packet: header.samples_per_frame(),
                                };
                                self.format = Some(format);
                                events.push(ParserEvent::Format(format));
                                events.push(ParserEvent::Ready);
                            }
                            self.state = State::Stream;
                        }
                        None => {
                            if !need_more {
                                // Everything scanned was garbage; drop it
                                pos = self.pending.len().saturating_sub(3).max(pos);
                            } else {
                                pos = scan;
                            }
                            break;
                        }
                    }
                }
                State::Stream => {
                    if self.pending.len() - pos < 4 {
                        break;
                    }
                    let Some(header) = decode_header(&self.pending[pos..]) else {
                        // Lost sync mid-stream; hunt again
                        self.state = State::Sync;
                        continue;
                    };
                    if pos + header.frame_len > self.pending.len() {
                        break;
                    }
                    let frame = Bytes::copy_from_slice(&self.pending[pos..pos + header.frame_len]);
                    self.note_frame(header.frame_len);
                    events.push(ParserEvent::Packet(frame));
                    pos += header.frame_len;
                }
            }
        }

        self.pending.drain(..pos);
        self.abs_pos += pos as u64;
        Ok(events)
    }

    fn align_seek(&self, approx_offset: u64) -> SeekAlignment {
        match (self.data_offset, self.uniform_len) {
            (Some(doff), Some(len)) if !self.varied => {
                let len = len as u64;
                let offset = if approx_offset <= doff {
                    doff
                } else {
                    doff + ((approx_offset - doff) / len) * len
                };
                SeekAlignment {
                    offset,
                    estimated: false,
                }
            }
            _ => SeekAlignment {
                offset: approx_offset,
                estimated: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 128 kbit/s, 44.1 kHz, MPEG-1 Layer III, no padding: 417 bytes
    const TEST_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
    const TEST_FRAME_LEN: usize = 417;

    fn frame() -> Vec<u8> {
        let mut f = vec![0u8; TEST_FRAME_LEN];
        f[..4].copy_from_slice(&TEST_HEADER);
        f
    }

    fn frames(n: usize) -> Vec<u8> {
        (0..n).flat_map(|_| frame()).collect()
    }

    fn packets(events: &[ParserEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ParserEvent::Packet(_)))
            .count()
    }

    #[test]
    fn header_table_produces_expected_length() {
        let header = decode_header(&TEST_HEADER).unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.frame_len, TEST_FRAME_LEN);
        assert_eq!(header.samples_per_frame(), 1152);
    }

    #[test]
    fn emits_properties_then_packets() {
        let mut parser = MpegParser::new();
        let events = parser.parse(&frames(3), false).unwrap();

        assert!(matches!(events[0], ParserEvent::DataOffset(0)));
        assert!(matches!(
            events[1],
            ParserEvent::Format(StreamFormat {
                codec: Codec::Mp3,
                sample_rate: 44_100,
                frames_per_packet: 1152,
            })
        ));
        assert!(matches!(events[2], ParserEvent::Ready));
        assert_eq!(packets(&events), 3);

        let more = parser.parse(&frames(1), false).unwrap();
        assert_eq!(packets(&more), 1);
    }

    #[test]
    fn arbitrary_chunking_reassembles_frames() {
        let data = frames(5);
        let mut parser = MpegParser::new();
        let mut total = 0;
        for chunk in data.chunks(97) {
            total += packets(&parser.parse(chunk, false).unwrap());
        }
        assert_eq!(total, 5);
        // A trailing partial frame stays pending
        let partial = parser.parse(&frame()[..100], false).unwrap();
        assert_eq!(packets(&partial), 0);
    }

    #[test]
    fn id3v2_tag_is_skipped_and_offset_reported() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ID3\x04\x00\x00");
        // syncsafe size 0x80 = 128 tag bytes after the 10-byte header
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        data.extend_from_slice(&vec![0xAA; 128]);
        data.extend_from_slice(&frames(3));

        let mut parser = MpegParser::new();
        let events = parser.parse(&data, false).unwrap();
        assert!(matches!(events[0], ParserEvent::DataOffset(138)));
        assert_eq!(packets(&events), 3);
    }

    #[test]
    fn leading_garbage_is_scanned_past() {
        let mut data = vec![0x12u8; 300];
        data.extend_from_slice(&frames(3));

        let mut parser = MpegParser::new();
        let events = parser.parse(&data, false).unwrap();
        assert!(matches!(events[0], ParserEvent::DataOffset(300)));
        assert_eq!(packets(&events), 3);
    }

    #[test]
    fn unparseable_stream_reports_lost_sync() {
        let mut parser = MpegParser::new();
        let garbage = vec![0x55u8; RESYNC_BUDGET + 4096];
        let result = parser.parse(&garbage, false);
        assert!(matches!(
            result,
            Err(ParseError {
                status: ParserStatus::LostSync,
                ..
            })
        ));
    }

    #[test]
    fn discontinuity_drops_partial_state_and_resyncs() {
        let mut parser = MpegParser::new();
        // Feed two and a half frames
        let data = frames(3);
        parser.parse(&data[..TEST_FRAME_LEN * 2 + 100], false).unwrap();

        // Resume somewhere else in the stream, mid-frame
        let resumed = frames(4);
        let events = parser.parse(&resumed[50..], true).unwrap();
        let sizes: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Packet(p) => Some(p.len()),
                _ => None,
            })
            .collect();
        // First partial frame skipped, remaining whole frames recovered
        assert!(!sizes.is_empty());
        assert!(sizes.iter().all(|&s| s == TEST_FRAME_LEN));
    }

    #[test]
    fn align_seek_snaps_to_frame_boundaries_for_uniform_streams() {
        let mut parser = MpegParser::new();
        parser.parse(&frames(6), false).unwrap();

        let aligned = parser.align_seek(1000);
        assert!(!aligned.estimated);
        assert_eq!(aligned.offset, (1000 / TEST_FRAME_LEN as u64) * TEST_FRAME_LEN as u64);

        // Before the data region clamps to the data start
        let aligned = parser.align_seek(3);
        assert_eq!(aligned.offset, 0);
    }

    #[test]
    fn align_seek_is_estimate_before_sync() {
        let parser = MpegParser::new();
        let aligned = parser.align_seek(5000);
        assert!(aligned.estimated);
        assert_eq!(aligned.offset, 5000);
    }
}
