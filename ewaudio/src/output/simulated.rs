//! In-memory output backend for tests
//!
//! Buffers submissions and consumes nothing on its own; the paired
//! [`SimulatedOutputDriver`] lets a test play the role of the hardware,
//! consuming slots one at a time and injecting failures.

use super::{OutputError, OutputEvent, OutputFactory, OutputQueue};
use crate::buffer::SlotSubmission;
use crate::parser::StreamFormat;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_CHANNEL_SIZE: usize = 256;

struct SimState {
    pending: VecDeque<SlotSubmission>,
    started: bool,
    paused: bool,
    volume: f32,
    closed: bool,
    events: mpsc::Sender<OutputEvent>,
}

pub struct SimulatedOutput {
    state: Arc<Mutex<SimState>>,
    events: Option<mpsc::Receiver<OutputEvent>>,
}

impl SimulatedOutput {
    pub fn new(volume: f32) -> (Self, SimulatedOutputDriver) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let state = Arc::new(Mutex::new(SimState {
            pending: VecDeque::new(),
            started: false,
            paused: false,
            volume,
            closed: false,
            events: event_tx,
        }));
        (
            Self {
                state: Arc::clone(&state),
                events: Some(event_rx),
            },
            SimulatedOutputDriver { state },
        )
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> Result<R, OutputError> {
        let mut state = self.state.lock().map_err(|_| OutputError::Closed)?;
        if state.closed {
            return Err(OutputError::Closed);
        }
        Ok(f(&mut state))
    }
}

impl OutputQueue for SimulatedOutput {
    fn submit(&mut self, slot: SlotSubmission) -> Result<(), OutputError> {
        self.with_state(|s| s.pending.push_back(slot))
    }

    fn start(&mut self) -> Result<(), OutputError> {
        self.with_state(|s| {
            s.started = true;
            let _ = s.events.try_send(OutputEvent::Running(true));
        })
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), OutputError> {
        self.with_state(|s| {
            s.paused = paused;
            if s.started {
                let _ = s.events.try_send(OutputEvent::Running(!paused));
            }
        })
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError> {
        self.with_state(|s| s.volume = volume)
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<OutputEvent>> {
        self.events.take()
    }
}

/// Test-side handle acting as the hardware
#[derive(Clone)]
pub struct SimulatedOutputDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedOutputDriver {
    /// Consume the oldest pending slot, reporting it played
    pub fn consume_next(&self) -> Option<SlotSubmission> {
        let mut state = self.state.lock().ok()?;
        let slot = state.pending.pop_front()?;
        let _ = state.events.try_send(OutputEvent::SlotConsumed(slot.index));
        Some(slot)
    }

    /// Consume every pending slot in order
    pub fn consume_all(&self) -> Vec<SlotSubmission> {
        let mut consumed = Vec::new();
        while let Some(slot) = self.consume_next() {
            consumed.push(slot);
        }
        consumed
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().map(|s| s.started).unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().map(|s| s.paused).unwrap_or(false)
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().map(|s| s.volume).unwrap_or(0.0)
    }

    /// Inject an asynchronous backend failure
    pub fn fail(&self, error: OutputError) {
        if let Ok(state) = self.state.lock() {
            let _ = state.events.try_send(OutputEvent::Failed(error));
        }
    }
}

/// Factory handing each created output's driver to the test
pub struct SimulatedOutputFactory {
    drivers: mpsc::UnboundedSender<SimulatedOutputDriver>,
}

impl SimulatedOutputFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SimulatedOutputDriver>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { drivers: tx }, rx)
    }
}

impl OutputFactory for SimulatedOutputFactory {
    fn create(
        &self,
        _format: StreamFormat,
        volume: f32,
    ) -> Result<Box<dyn OutputQueue>, OutputError> {
        let (output, driver) = SimulatedOutput::new(volume);
        let _ = self.drivers.send(driver);
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PacketDesc;
    use bytes::Bytes;

    fn slot(index: usize) -> SlotSubmission {
        SlotSubmission {
            index,
            data: Bytes::from_static(b"abcd"),
            packets: vec![PacketDesc { offset: 0, len: 4 }],
        }
    }

    #[tokio::test]
    async fn consumption_echoes_slot_indices_in_order() {
        let (mut output, driver) = SimulatedOutput::new(1.0);
        let mut events = output.take_events().unwrap();

        output.submit(slot(3)).unwrap();
        output.submit(slot(4)).unwrap();
        output.start().unwrap();

        assert_eq!(events.recv().await, Some(OutputEvent::Running(true)));
        driver.consume_all();
        assert_eq!(events.recv().await, Some(OutputEvent::SlotConsumed(3)));
        assert_eq!(events.recv().await, Some(OutputEvent::SlotConsumed(4)));
    }

    #[tokio::test]
    async fn pause_reports_not_running() {
        let (mut output, _driver) = SimulatedOutput::new(1.0);
        let mut events = output.take_events().unwrap();
        output.start().unwrap();
        output.set_paused(true).unwrap();

        assert_eq!(events.recv().await, Some(OutputEvent::Running(true)));
        assert_eq!(events.recv().await, Some(OutputEvent::Running(false)));
    }
}
