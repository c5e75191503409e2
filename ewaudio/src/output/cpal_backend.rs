//! cpal playback backend
//!
//! Owns the audio device on a dedicated worker thread (cpal streams are
//! not `Send` on every platform, so the stream never crosses threads).
//! Submitted slots are decoded with symphonia into interleaved f32
//! samples feeding the device callback; a boundary table maps consumed
//! sample frames back to slot indices so `SlotConsumed` events fire in
//! submission order.

use super::{OutputError, OutputEvent, OutputFactory, OutputQueue};
use crate::buffer::SlotSubmission;
use crate::parser::{Codec, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const EVENT_CHANNEL_SIZE: usize = 64;

/// Synthetic status codes carried in `OutputError::Device`
const CODE_NO_DEVICE: i32 = -1;
const CODE_CONFIG: i32 = -2;
const CODE_STREAM: i32 = -3;

enum Command {
    Submit(SlotSubmission),
    Start,
    SetPaused(bool),
    SetVolume(f32),
    Close,
}

/// Sample queue shared with the device callback. Samples are stored as
/// interleaved stereo frames regardless of the device channel layout.
struct Shared {
    samples: VecDeque<f32>,
    /// (slot index, exclusive end frame) in submission order
    boundaries: VecDeque<(usize, u64)>,
    frames_consumed: u64,
    running_reported: bool,
}

pub struct CpalOutput {
    commands: std::sync::mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<OutputEvent>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new(format: StreamFormat, volume: f32) -> Self {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let worker = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || worker_loop(format, volume, cmd_rx, event_tx))
            .ok();
        Self {
            commands: cmd_tx,
            events: Some(event_rx),
            worker,
        }
    }

    fn send(&self, command: Command) -> Result<(), OutputError> {
        self.commands.send(command).map_err(|_| OutputError::Closed)
    }
}

impl OutputQueue for CpalOutput {
    fn submit(&mut self, slot: SlotSubmission) -> Result<(), OutputError> {
        self.send(Command::Submit(slot))
    }

    fn start(&mut self) -> Result<(), OutputError> {
        self.send(Command::Start)
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), OutputError> {
        self.send(Command::SetPaused(paused))
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError> {
        self.send(Command::SetVolume(volume))
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<OutputEvent>> {
        self.events.take()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    format: StreamFormat,
    volume: f32,
    commands: std::sync::mpsc::Receiver<Command>,
    events: mpsc::Sender<OutputEvent>,
) {
    let volume = Arc::new(AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()));
    let shared = Arc::new(Mutex::new(Shared {
        samples: VecDeque::new(),
        boundaries: VecDeque::new(),
        frames_consumed: 0,
        running_reported: false,
    }));

    let stream = match build_stream(&shared, &volume, &events) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.try_send(OutputEvent::Failed(err));
            return;
        }
    };
    // Hold the device idle until the start threshold is reached
    let _ = stream.pause();

    let mut decoder = match make_decoder(&format) {
        Ok(decoder) => decoder,
        Err(err) => {
            let _ = events.try_send(OutputEvent::Failed(err));
            return;
        }
    };

    let mut next_ts: u64 = 0;
    let mut frames_pushed: u64 = 0;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Submit(slot) => {
                for desc in &slot.packets {
                    let data = &slot.data[desc.offset..desc.offset + desc.len];
                    let payload = match format.codec {
                        Codec::Mp3 => data,
                        Codec::AacAdts => strip_adts_header(data),
                    };
                    let packet = Packet::new_from_slice(
                        0,
                        next_ts,
                        format.frames_per_packet as u64,
                        payload,
                    );
                    next_ts += format.frames_per_packet as u64;
                    match decoder.decode(&packet) {
                        Ok(decoded) => {
                            let spec = *decoded.spec();
                            let mut buf =
                                SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                            buf.copy_interleaved_ref(decoded);
                            let channels = spec.channels.count().max(1);
                            if let Ok(mut state) = shared.lock() {
                                for frame in buf.samples().chunks(channels) {
                                    let left = frame[0];
                                    let right = if channels > 1 { frame[1] } else { left };
                                    state.samples.push_back(left);
                                    state.samples.push_back(right);
                                    frames_pushed += 1;
                                }
                            }
                        }
                        // A single corrupt frame is skipped, not fatal
                        Err(SymphoniaError::DecodeError(e)) => {
                            warn!(error = %e, "skipping undecodable packet");
                        }
                        Err(e) => {
                            let _ = events
                                .try_send(OutputEvent::Failed(OutputError::Decode(e.to_string())));
                            return;
                        }
                    }
                }
                if let Ok(mut state) = shared.lock() {
                    state.boundaries.push_back((slot.index, frames_pushed));
                }
            }
            Command::Start => {
                debug!("starting device stream");
                if let Err(e) = stream.play() {
                    let _ = events.try_send(OutputEvent::Failed(OutputError::Device {
                        code: CODE_STREAM,
                        message: e.to_string(),
                    }));
                    return;
                }
            }
            Command::SetPaused(true) => {
                let _ = stream.pause();
                if let Ok(mut state) = shared.lock() {
                    state.running_reported = false;
                }
                let _ = events.try_send(OutputEvent::Running(false));
            }
            Command::SetPaused(false) => {
                if let Err(e) = stream.play() {
                    let _ = events.try_send(OutputEvent::Failed(OutputError::Device {
                        code: CODE_STREAM,
                        message: e.to_string(),
                    }));
                    return;
                }
            }
            Command::SetVolume(v) => {
                volume.store(v.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            }
            Command::Close => break,
        }
    }
}

fn build_stream(
    shared: &Arc<Mutex<Shared>>,
    volume: &Arc<AtomicU32>,
    events: &mpsc::Sender<OutputEvent>,
) -> Result<cpal::Stream, OutputError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OutputError::Device {
        code: CODE_NO_DEVICE,
        message: "no default output device".into(),
    })?;
    let supported = device
        .default_output_config()
        .map_err(|e| OutputError::Device {
            code: CODE_CONFIG,
            message: e.to_string(),
        })?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(OutputError::Device {
            code: CODE_CONFIG,
            message: format!("unsupported sample format {:?}", supported.sample_format()),
        });
    }
    let config: cpal::StreamConfig = supported.into();
    let device_channels = config.channels.max(1) as usize;

    let shared = Arc::clone(shared);
    let volume = Arc::clone(volume);
    let events = events.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let gain = f32::from_bits(volume.load(Ordering::Relaxed));
                let Ok(mut state) = shared.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(device_channels) {
                    if state.samples.len() >= 2 {
                        let left = state.samples.pop_front().unwrap_or(0.0) * gain;
                        let right = state.samples.pop_front().unwrap_or(0.0) * gain;
                        frame[0] = left;
                        if device_channels > 1 {
                            frame[1] = right;
                        }
                        for sample in frame.iter_mut().skip(2) {
                            *sample = 0.0;
                        }
                        state.frames_consumed += 1;
                        if !state.running_reported {
                            state.running_reported = true;
                            let _ = events.try_send(OutputEvent::Running(true));
                        }
                    } else {
                        frame.fill(0.0);
                    }
                }
                while let Some(&(index, end)) = state.boundaries.front() {
                    if end > state.frames_consumed {
                        break;
                    }
                    state.boundaries.pop_front();
                    let _ = events.try_send(OutputEvent::SlotConsumed(index));
                }
            },
            |e| warn!(error = %e, "device stream error"),
            None,
        )
        .map_err(|e| OutputError::Device {
            code: CODE_STREAM,
            message: e.to_string(),
        })?;
    Ok(stream)
}

fn make_decoder(format: &StreamFormat) -> Result<Box<dyn Decoder>, OutputError> {
    let codec = match format.codec {
        Codec::Mp3 => CODEC_TYPE_MP3,
        Codec::AacAdts => CODEC_TYPE_AAC,
    };
    let mut params = CodecParameters::new();
    params.for_codec(codec).with_sample_rate(format.sample_rate);
    symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| OutputError::Decode(e.to_string()))
}

/// ADTS frames carry their own 7-byte header (9 with CRC); the decoder
/// wants the raw access unit.
fn strip_adts_header(frame: &[u8]) -> &[u8] {
    if frame.len() < 7 {
        return frame;
    }
    let header_len = if frame[1] & 0x01 == 0 { 9 } else { 7 };
    frame.get(header_len..).unwrap_or(&[])
}

/// Creates a [`CpalOutput`] per stream
pub struct CpalOutputFactory;

impl OutputFactory for CpalOutputFactory {
    fn create(
        &self,
        format: StreamFormat,
        volume: f32,
    ) -> Result<Box<dyn OutputQueue>, OutputError> {
        Ok(Box::new(CpalOutput::new(format, volume)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adts_header_length_follows_crc_flag() {
        // protection_absent set: 7-byte header
        let no_crc = [0xFF, 0xF1, 0x50, 0x00, 0x20, 0x00, 0xFC, 0xAA, 0xBB];
        assert_eq!(strip_adts_header(&no_crc), &[0xAA, 0xBB]);

        // protection_absent clear: CRC adds two bytes
        let with_crc = [0xFF, 0xF0, 0x50, 0x00, 0x20, 0x00, 0xFC, 0x00, 0x00, 0xAA, 0xBB];
        assert_eq!(strip_adts_header(&with_crc), &[0xAA, 0xBB]);
    }

    #[test]
    fn short_frame_is_left_alone() {
        let short = [0xFF, 0xF1, 0x50];
        assert_eq!(strip_adts_header(&short), &short);
    }
}
