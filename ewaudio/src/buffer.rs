//! Slot ring between the parser and the hardware output
//!
//! A fixed arena of equally sized slots, addressed by index. Parsed
//! packets accumulate into the write slot; when the next packet would
//! overflow it (or the per-slot packet ceiling is hit) the slot is
//! submitted to the output and marked in use until the output reports it
//! consumed. When the ring wraps onto a slot still in use, new packets
//! are queued in arrival order and replayed verbatim as slots free up,
//! so packet order is preserved across backpressure.

use crate::error::AudioError;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::trace;

/// Ring geometry, taken from the player configuration
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub slot_count: usize,
    pub slot_size: usize,
    pub max_packets_per_slot: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slot_count: 16,
            slot_size: 2048,
            max_packets_per_slot: 512,
        }
    }
}

/// Location of one packet inside a submitted slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDesc {
    pub offset: usize,
    pub len: usize,
}

/// A filled slot handed to the output queue
#[derive(Debug, Clone)]
pub struct SlotSubmission {
    /// Slot index; the output echoes it back when the slot is consumed
    pub index: usize,
    pub data: Bytes,
    pub packets: Vec<PacketDesc>,
}

/// Result of pushing one packet
#[derive(Debug)]
pub enum PushOutcome {
    /// Appended to the write slot
    Buffered,
    /// The write slot was submitted and the packet started a fresh one
    Submitted(SlotSubmission),
    /// As `Submitted`, but the ring has wrapped onto a busy slot; until
    /// a slot completes, further packets will be queued
    SubmittedAndBlocked(SlotSubmission),
    /// Ring blocked; packet held in the backlog
    Queued,
}

/// Slots released by a completion, replayed from the backlog
#[derive(Debug, Default)]
pub struct Replay {
    pub submissions: Vec<SlotSubmission>,
    /// True when the backlog drained and the ring accepts direct pushes
    /// again
    pub unblocked: bool,
}

pub struct SlotRing {
    config: RingConfig,
    in_use: Vec<bool>,
    write_index: usize,
    fill: Vec<u8>,
    fill_packets: Vec<PacketDesc>,
    backlog: VecDeque<Bytes>,
    blocked: bool,
}

impl SlotRing {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            in_use: vec![false; config.slot_count],
            write_index: 0,
            fill: Vec::with_capacity(config.slot_size),
            fill_packets: Vec::new(),
            backlog: VecDeque::new(),
            blocked: false,
        }
    }

    /// Number of slots currently held by the output
    pub fn slots_in_use(&self) -> usize {
        self.in_use.iter().filter(|u| **u).count()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Feed one parsed packet through the ring
    pub fn push(&mut self, packet: Bytes) -> Result<PushOutcome, AudioError> {
        if packet.len() > self.config.slot_size {
            return Err(AudioError::PacketTooLarge {
                size: packet.len(),
                capacity: self.config.slot_size,
            });
        }
        if self.blocked {
            self.backlog.push_back(packet);
            return Ok(PushOutcome::Queued);
        }
        Ok(self.push_direct(packet))
    }

    fn push_direct(&mut self, packet: Bytes) -> PushOutcome {
        let overflows = self.fill.len() + packet.len() > self.config.slot_size
            || self.fill_packets.len() >= self.config.max_packets_per_slot;
        if !overflows {
            self.append(&packet);
            return PushOutcome::Buffered;
        }

        let submission = self.seal_write_slot();
        self.append(&packet);
        if self.in_use[self.write_index] {
            self.blocked = true;
            trace!(slot = self.write_index, "ring wrapped onto a busy slot");
            PushOutcome::SubmittedAndBlocked(submission)
        } else {
            PushOutcome::Submitted(submission)
        }
    }

    fn append(&mut self, packet: &Bytes) {
        self.fill_packets.push(PacketDesc {
            offset: self.fill.len(),
            len: packet.len(),
        });
        self.fill.extend_from_slice(packet);
    }

    fn seal_write_slot(&mut self) -> SlotSubmission {
        let index = self.write_index;
        self.in_use[index] = true;
        let data = Bytes::from(std::mem::replace(
            &mut self.fill,
            Vec::with_capacity(self.config.slot_size),
        ));
        let packets = std::mem::take(&mut self.fill_packets);
        self.write_index = (index + 1) % self.config.slot_count;
        SlotSubmission {
            index,
            data,
            packets,
        }
    }

    /// The output finished a slot; replay any backlog in order
    pub fn complete(&mut self, index: usize) -> Replay {
        let mut replay = Replay::default();
        if index >= self.in_use.len() || !self.in_use[index] {
            return replay;
        }
        self.in_use[index] = false;

        if self.blocked && !self.in_use[self.write_index] {
            self.blocked = false;
            while let Some(packet) = self.backlog.pop_front() {
                match self.push_direct(packet) {
                    PushOutcome::Buffered => {}
                    PushOutcome::Submitted(sub) => replay.submissions.push(sub),
                    PushOutcome::SubmittedAndBlocked(sub) => {
                        replay.submissions.push(sub);
                        break;
                    }
                    // push_direct never queues; the ring is unblocked here
                    PushOutcome::Queued => break,
                }
            }
            replay.unblocked = !self.blocked;
        }
        replay
    }

    /// Submit the partial write slot at end of stream. Returns `None`
    /// when there is nothing to flush or the write slot is still busy;
    /// in the latter case the caller flushes again after a completion.
    pub fn flush(&mut self) -> Option<SlotSubmission> {
        if self.fill.is_empty() || self.blocked || self.in_use[self.write_index] {
            return None;
        }
        Some(self.seal_write_slot())
    }

    /// Drop everything not yet handed to the output: the partial write
    /// slot and the backlog. Slots already submitted keep playing.
    /// Used on seek, where unplayed buffered data belongs to the old
    /// position.
    pub fn discard_unsubmitted(&mut self) {
        self.fill.clear();
        self.fill_packets.clear();
        self.backlog.clear();
        self.blocked = self.in_use[self.write_index];
    }

    /// True once no data remains anywhere in the ring
    pub fn is_drained(&self) -> bool {
        self.fill.is_empty() && self.backlog.is_empty() && self.slots_in_use() == 0
    }
}
