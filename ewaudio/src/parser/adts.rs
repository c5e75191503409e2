//! AAC ADTS frame parser
//!
//! Each ADTS frame carries its own length in the header, so slicing is
//! straightforward once sync is acquired. ADTS frames are not required
//! to share a length, so seek alignment is always an estimate.

use super::{
    Codec, FrameParser, ParseError, ParserEvent, ParserStatus, SeekAlignment, StreamFormat,
};
use bytes::Bytes;
use tracing::trace;

const RESYNC_BUDGET: usize = 64 * 1024;

/// Samples per ADTS frame (one AAC access unit)
const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Minimum bytes needed to decode an ADTS header
const HEADER_LEN: usize = 7;

#[derive(Debug, Clone, Copy)]
struct AdtsHeader {
    sample_rate: u32,
    frame_len: usize,
}

fn decode_header(b: &[u8]) -> Option<AdtsHeader> {
    if b.len() < HEADER_LEN || b[0] != 0xFF || b[1] & 0xF0 != 0xF0 {
        return None;
    }
    // Layer bits must be zero for ADTS
    if b[1] & 0x06 != 0 {
        return None;
    }
    let sr_index = ((b[2] >> 2) & 0xF) as usize;
    if sr_index >= SAMPLE_RATES.len() {
        return None;
    }
    let frame_len =
        (((b[3] & 0x03) as usize) << 11) | ((b[4] as usize) << 3) | ((b[5] as usize) >> 5);
    if frame_len < HEADER_LEN {
        return None;
    }
    Some(AdtsHeader {
        sample_rate: SAMPLE_RATES[sr_index],
        frame_len,
    })
}

/// Incremental ADTS frame parser
pub struct AdtsParser {
    pending: Vec<u8>,
    abs_pos: u64,
    synced: bool,
    format: Option<StreamFormat>,
    data_offset: Option<u64>,
    garbage: usize,
}

impl AdtsParser {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            abs_pos: 0,
            synced: false,
            format: None,
            data_offset: None,
            garbage: 0,
        }
    }

    fn confirmed_at(&self, pos: usize) -> Option<Option<AdtsHeader>> {
        // Outer None: not a header. Inner None: need more bytes.
        let header = decode_header(&self.pending[pos..])?;
        let next = pos + header.frame_len;
        if next + HEADER_LEN > self.pending.len() {
            return Some(None);
        }
        if decode_header(&self.pending[next..]).is_some() {
            Some(Some(header))
        } else {
            None
        }
    }
}

impl Default for AdtsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser for AdtsParser {
    fn parse(&mut self, input: &[u8], discontinuous: bool) -> Result<Vec<ParserEvent>, ParseError> {
        if discontinuous {
            trace!(dropped = self.pending.len(), "discontinuity, re-acquiring sync");
            self.abs_pos += self.pending.len() as u64;
            self.pending.clear();
            self.synced = false;
            self.garbage = 0;
        }
        self.pending.extend_from_slice(input);

        let mut events = Vec::new();
        let mut pos = 0usize;

        loop {
            if !self.synced {
                let mut acquired = None;
                while pos + HEADER_LEN <= self.pending.len() {
                    match self.confirmed_at(pos) {
                        Some(Some(header)) => {
                            acquired = Some(header);
                            break;
                        }
                        Some(None) => break, // candidate, awaiting confirmation bytes
                        None => {
                            pos += 1;
                            self.garbage += 1;
                            if self.garbage > RESYNC_BUDGET {
                                return Err(ParseError {
                                    status: ParserStatus::LostSync,
                                    at: self.abs_pos + pos as u64,
                                });
                            }
                        }
                    }
                }
                let Some(header) = acquired else { break };
                self.garbage = 0;
                self.synced = true;
                if self.data_offset.is_none() {
                    let offset = self.abs_pos + pos as u64;
                    self.data_offset = Some(offset);
                    events.push(ParserEvent::DataOffset(offset));
                }
                if self.format.is_none() {
                    let format = StreamFormat {
                        codec: Codec::AacAdts,
                        sample_rate: header.sample_rate,
                        frames_per_packet: SAMPLES_PER_FRAME,
                    };
                    self.format = Some(format);
                    events.push(ParserEvent::Format(format));
                    events.push(ParserEvent::Ready);
                }
            }

            if self.pending.len() - pos < HEADER_LEN {
                break;
            }
            let Some(header) = decode_header(&self.pending[pos..]) else {
                self.synced = false;
                continue;
            };
            if pos + header.frame_len > self.pending.len() {
                break;
            }
            events.push(ParserEvent::Packet(Bytes::copy_from_slice(
                &self.pending[pos..pos + header.frame_len],
            )));
            pos += header.frame_len;
        }

        self.pending.drain(..pos);
        self.abs_pos += pos as u64;
        Ok(events)
    }

    fn align_seek(&self, approx_offset: u64) -> SeekAlignment {
        // Variable frame lengths rule out exact byte alignment
        SeekAlignment {
            offset: approx_offset,
            estimated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize) -> Vec<u8> {
        // 44.1 kHz (index 4), AAC LC, frame length embedded in the header
        let mut f = vec![0u8; len];
        f[0] = 0xFF;
        f[1] = 0xF1;
        f[2] = 0x50;
        f[3] = ((len >> 11) & 0x03) as u8;
        f[4] = ((len >> 3) & 0xFF) as u8;
        f[5] = ((len & 0x07) as u8) << 5;
        f[6] = 0xFC;
        f
    }

    fn packets(events: &[ParserEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Packet(p) => Some(p.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn slices_variable_length_frames() {
        let mut data = Vec::new();
        for len in [200usize, 340, 180, 512] {
            data.extend_from_slice(&frame(len));
        }
        data.extend_from_slice(&frame(100)); // confirms the 512-byte frame

        let mut parser = AdtsParser::new();
        let events = parser.parse(&data, false).unwrap();
        assert!(matches!(events[0], ParserEvent::DataOffset(0)));
        assert!(matches!(
            events[1],
            ParserEvent::Format(StreamFormat {
                codec: Codec::AacAdts,
                sample_rate: 44_100,
                frames_per_packet: 1024,
            })
        ));
        assert!(matches!(events[2], ParserEvent::Ready));
        assert_eq!(packets(&events), vec![200, 340, 180, 512, 100]);
    }

    #[test]
    fn skips_leading_garbage() {
        let mut data = vec![0xABu8; 77];
        data.extend_from_slice(&frame(256));
        data.extend_from_slice(&frame(256));
        data.extend_from_slice(&frame(256));

        let mut parser = AdtsParser::new();
        let events = parser.parse(&data, false).unwrap();
        assert!(matches!(events[0], ParserEvent::DataOffset(77)));
        assert_eq!(packets(&events), vec![256, 256, 256]);
    }

    #[test]
    fn seek_alignment_is_always_an_estimate() {
        let mut parser = AdtsParser::new();
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&frame(300));
        }
        parser.parse(&data, false).unwrap();
        assert!(parser.align_seek(12345).estimated);
    }

    #[test]
    fn pure_noise_reports_lost_sync() {
        let mut parser = AdtsParser::new();
        let noise = vec![0x42u8; RESYNC_BUDGET + 1024];
        assert!(parser.parse(&noise, false).is_err());
    }
}
