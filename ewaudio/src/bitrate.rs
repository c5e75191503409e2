//! Streaming bitrate estimation
//!
//! The average encoded packet size together with the packet playback
//! duration gives the stream bitrate. The estimate stabilizes after a
//! configurable number of packets; before that it is withheld, because
//! seek targets and duration derived from a noisy estimate are worse
//! than none.

use crate::parser::StreamFormat;

pub struct BitrateEstimator {
    window_packets: u64,
    packets: u64,
    bytes: u64,
    packet_duration_secs: Option<f64>,
}

impl BitrateEstimator {
    pub fn new(window_packets: u32) -> Self {
        Self {
            window_packets: window_packets.max(1) as u64,
            packets: 0,
            bytes: 0,
            packet_duration_secs: None,
        }
    }

    /// Called once the parser reports the stream format
    pub fn set_format(&mut self, format: &StreamFormat) {
        self.packet_duration_secs = Some(format.packet_duration_secs());
    }

    /// Account one parsed packet
    pub fn record(&mut self, packet_len: usize) {
        self.packets += 1;
        self.bytes += packet_len as u64;
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets
    }

    /// Estimated stream bitrate in bits per second; `None` until enough
    /// packets have been seen and the packet duration is known
    pub fn bitrate_bps(&self) -> Option<f64> {
        let duration = self.packet_duration_secs?;
        if self.packets < self.window_packets || duration <= 0.0 {
            return None;
        }
        let avg_packet_bytes = self.bytes as f64 / self.packets as f64;
        Some(avg_packet_bytes * 8.0 / duration)
    }

    /// Total playback duration implied by the audio payload length
    pub fn duration_secs(&self, total_len: u64, data_offset: u64) -> Option<f64> {
        let bitrate = self.bitrate_bps()?;
        let payload = total_len.saturating_sub(data_offset);
        Some(payload as f64 * 8.0 / bitrate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Codec;

    fn mp3_format() -> StreamFormat {
        StreamFormat {
            codec: Codec::Mp3,
            sample_rate: 44_100,
            frames_per_packet: 1152,
        }
    }

    #[test]
    fn withheld_until_window_fills() {
        let mut estimator = BitrateEstimator::new(50);
        estimator.set_format(&mp3_format());
        for _ in 0..49 {
            estimator.record(417);
        }
        assert!(estimator.bitrate_bps().is_none());
        estimator.record(417);
        assert!(estimator.bitrate_bps().is_some());
    }

    #[test]
    fn withheld_without_a_format() {
        let mut estimator = BitrateEstimator::new(1);
        estimator.record(417);
        assert!(estimator.bitrate_bps().is_none());
    }

    #[test]
    fn estimates_cbr_mp3_close_to_nominal() {
        let mut estimator = BitrateEstimator::new(50);
        estimator.set_format(&mp3_format());
        for _ in 0..100 {
            estimator.record(417);
        }
        // 417-byte frames at 44.1 kHz are nominally 128 kbit/s
        let bitrate = estimator.bitrate_bps().unwrap();
        assert!((bitrate - 128_000.0).abs() < 1_000.0, "bitrate {bitrate}");
    }

    #[test]
    fn duration_excludes_leading_tag_bytes() {
        let mut estimator = BitrateEstimator::new(50);
        estimator.set_format(&mp3_format());
        for _ in 0..100 {
            estimator.record(417);
        }
        let bitrate = estimator.bitrate_bps().unwrap();
        // 1000 frames of payload after a 5000-byte tag
        let total = 5_000 + 417_000u64;
        let duration = estimator.duration_secs(total, 5_000).unwrap();
        let expected = 417_000.0 * 8.0 / bitrate;
        assert!((duration - expected).abs() < 1e-9);
    }
}
