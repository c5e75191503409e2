//! Single-stream playback engine
//!
//! A [`Streamer`] owns one URL for its whole life: connect, parse, fill
//! the slot ring, feed the output, then finish exactly once with a
//! [`DoneReason`]. The handle is a thin command front end; all state
//! lives in an actor task that multiplexes reader events, output events,
//! reconnect backoff and the stall watchdog in one `select!` loop.
//!
//! State is published on a `watch` channel so observers (the playback
//! queue above all) follow transitions without polling.

use crate::bitrate::BitrateEstimator;
use crate::buffer::{PushOutcome, RingConfig, SlotRing, SlotSubmission};
use crate::error::AudioError;
use crate::events::{EngineEvent, EventPublisher};
use crate::output::{OutputEvent, OutputFactory, OutputQueue};
use crate::parser::{Codec, FrameParser, ParserEvent, StreamFormat};
use crate::supervisor::{RetryPolicy, Watchdog};
use ewconfig::PlayerConfig;
use ewstream::{ByteStreamReader, NetworkConfig, ReaderEvent};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_SIZE: usize = 16;

/// Interval at which the watchdog is polled
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

static NEXT_STREAMER_ID: AtomicU64 = AtomicU64::new(1);

pub type StreamerId = u64;

/// Why a streamer finished
#[derive(Debug, Clone, PartialEq)]
pub enum DoneReason {
    /// Stopped on request (or the handle was dropped)
    Stopped,
    /// The stream played to its natural end
    EndOfFile,
    /// A terminal failure; see [`AudioError`] for the taxonomy
    Error(AudioError),
}

/// Lifecycle of one streamer. `Done` is terminal; every other state can
/// only move forward.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerState {
    /// Created, not yet connected
    Initialized,
    /// Connected, buffering until the start threshold is reached
    WaitingForData,
    /// Output told to start, waiting for audio to actually flow
    WaitingForQueueToStart,
    Playing,
    Paused,
    Done(DoneReason),
}

impl StreamerState {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamerState::Done(_))
    }
}

/// Out-of-band notifications from one streamer. State transitions
/// travel on the watch channel instead; this carries the signals that
/// are not states.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerEvent {
    /// The bitrate estimate settled for the first time; seek and
    /// duration queries work from here on
    BitrateReady { id: StreamerId, bitrate_bps: f64 },
}

impl EngineEvent for StreamerEvent {}

/// Position and stream properties, as currently known
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackProgress {
    /// Seconds of audio played, relative to the stream start
    pub position_secs: f64,
    /// Total duration; known only for finite streams with a settled
    /// bitrate estimate
    pub duration_secs: Option<f64>,
    /// Estimated stream bitrate in bits per second
    pub bitrate_bps: Option<f64>,
}

#[derive(Default)]
struct Metrics {
    base_secs: f64,
    bytes_played: u64,
    bitrate_bps: Option<f64>,
    duration_secs: Option<f64>,
}

enum Wake {
    Command(Option<Command>),
    Reader(Option<ReaderEvent>),
    Output(Option<OutputEvent>),
    Backoff,
    Tick,
}

enum Command {
    Play,
    Pause,
    Resume,
    Stop,
    SetVolume(f32),
    Seek {
        to_secs: f64,
        reply: oneshot::Sender<Result<(), AudioError>>,
    },
}

/// Handle to one playback engine instance
#[derive(Clone)]
pub struct Streamer {
    id: StreamerId,
    url: String,
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<StreamerState>,
    metrics: Arc<Mutex<Metrics>>,
    events: Arc<Mutex<EventPublisher<StreamerEvent>>>,
}

impl Streamer {
    /// Create a streamer for `url` and spawn its actor. Nothing touches
    /// the network until [`play`](Streamer::play).
    pub fn new(
        url: impl Into<String>,
        config: Arc<PlayerConfig>,
        net: NetworkConfig,
        output_factory: Arc<dyn OutputFactory>,
        volume: f32,
    ) -> Self {
        let url = url.into();
        let id = NEXT_STREAMER_ID.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(StreamerState::Initialized);
        let metrics = Arc::new(Mutex::new(Metrics::default()));
        let events = Arc::new(Mutex::new(EventPublisher::new()));

        let actor = Actor::new(
            id,
            url.clone(),
            config,
            net,
            output_factory,
            volume,
            state_tx,
            Arc::clone(&metrics),
            Arc::clone(&events),
        );
        tokio::spawn(actor.run(cmd_rx));

        Self {
            id,
            url,
            commands: cmd_tx,
            state_rx,
            metrics,
            events,
        }
    }

    pub fn id(&self) -> StreamerId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> StreamerState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel following every state transition
    pub fn watch_state(&self) -> watch::Receiver<StreamerState> {
        self.state_rx.clone()
    }

    /// Register a subscriber for [`StreamerEvent`] notifications
    pub fn subscribe(&self, tx: mpsc::Sender<StreamerEvent>) {
        if let Ok(mut publisher) = self.events.lock() {
            publisher.subscribe(tx);
        }
    }

    pub fn progress(&self) -> PlaybackProgress {
        let Ok(metrics) = self.metrics.lock() else {
            return PlaybackProgress::default();
        };
        let played = match metrics.bitrate_bps {
            Some(bitrate) if bitrate > 0.0 => metrics.bytes_played as f64 * 8.0 / bitrate,
            _ => 0.0,
        };
        let mut position = metrics.base_secs + played;
        if let Some(duration) = metrics.duration_secs {
            position = position.min(duration);
        }
        PlaybackProgress {
            position_secs: position,
            duration_secs: metrics.duration_secs,
            bitrate_bps: metrics.bitrate_bps,
        }
    }

    /// Connect and start buffering; playback begins once the start
    /// threshold is reached. Idempotent after the first call.
    pub async fn play(&self) {
        let _ = self.commands.send(Command::Play).await;
    }

    pub async fn pause(&self) {
        let _ = self.commands.send(Command::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.commands.send(Command::Resume).await;
    }

    /// Finish with [`DoneReason::Stopped`]. Idempotent.
    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Stop).await;
    }

    pub async fn set_volume(&self, volume: f32) {
        let _ = self
            .commands
            .send(Command::SetVolume(volume.clamp(0.0, 1.0)))
            .await;
    }

    /// Jump to an absolute position in seconds, clamped to the stream.
    ///
    /// Fails with [`AudioError::SeekNotReady`] until both the bitrate
    /// estimate and the total length are known, and with
    /// [`AudioError::SeekInFlight`] while a previous seek has not yet
    /// delivered data.
    pub async fn seek(&self, to_secs: f64) -> Result<(), AudioError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Seek { to_secs, reply })
            .await
            .map_err(|_| AudioError::SeekNotReady)?;
        response.await.unwrap_or(Err(AudioError::SeekNotReady))
    }
}

struct Actor {
    id: StreamerId,
    url: String,
    config: Arc<PlayerConfig>,
    net: NetworkConfig,
    output_factory: Arc<dyn OutputFactory>,
    volume: f32,

    state_tx: watch::Sender<StreamerState>,
    metrics: Arc<Mutex<Metrics>>,
    events: Arc<Mutex<EventPublisher<StreamerEvent>>>,

    reader: Option<ByteStreamReader>,
    reader_events: Option<mpsc::Receiver<ReaderEvent>>,
    parser: Option<Box<dyn FrameParser>>,
    ring: SlotRing,
    estimator: BitrateEstimator,
    retry: RetryPolicy,
    watchdog: Watchdog,
    output: Option<Box<dyn OutputQueue>>,
    output_events: Option<mpsc::Receiver<OutputEvent>>,
    backoff: Option<Pin<Box<tokio::time::Sleep>>>,

    format: Option<StreamFormat>,
    total_length: Option<u64>,
    data_offset: u64,
    /// Absolute byte position of the next byte expected from the network
    stream_pos: u64,
    /// Bytes of each submitted slot, indexed by ring slot
    slot_sizes: Vec<usize>,
    slots_submitted: usize,
    output_started: bool,
    bitrate_announced: bool,
    pause_requested: bool,
    /// Next parse call must drop partial-frame state
    pending_discontinuous: bool,
    seek_in_flight: bool,
    eos: bool,
}

impl Actor {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: StreamerId,
        url: String,
        config: Arc<PlayerConfig>,
        net: NetworkConfig,
        output_factory: Arc<dyn OutputFactory>,
        volume: f32,
        state_tx: watch::Sender<StreamerState>,
        metrics: Arc<Mutex<Metrics>>,
        events: Arc<Mutex<EventPublisher<StreamerEvent>>>,
    ) -> Self {
        let ring = SlotRing::new(RingConfig {
            slot_count: config.buffer_count,
            slot_size: config.buffer_size,
            max_packets_per_slot: config.max_packets_per_slot,
        });
        let estimator = BitrateEstimator::new(config.bitrate_window_packets as u32);
        let retry = RetryPolicy::new(config.max_auto_retries);
        let mut watchdog = Watchdog::new(config.timeout());
        // Nothing is expected from the network before play
        watchdog.suspend();
        let slot_sizes = vec![0; config.buffer_count];

        Self {
            id,
            url,
            config,
            net,
            output_factory,
            volume,
            state_tx,
            metrics,
            events,
            reader: None,
            reader_events: None,
            parser: None,
            ring,
            estimator,
            retry,
            watchdog,
            output: None,
            output_events: None,
            backoff: None,
            format: None,
            total_length: None,
            data_offset: 0,
            stream_pos: 0,
            slot_sizes,
            slots_submitted: 0,
            output_started: false,
            bitrate_announced: false,
            pause_requested: false,
            pending_discontinuous: false,
            seek_in_flight: false,
            eos: false,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(WATCHDOG_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.is_done() {
            // Wait first, dispatch after: the branches only borrow their
            // own channel while the handlers need the whole actor.
            let wake = {
                let reader_events = &mut self.reader_events;
                let output_events = &mut self.output_events;
                let backoff = &mut self.backoff;
                let backoff_armed = backoff.is_some();
                tokio::select! {
                    command = commands.recv() => Wake::Command(command),
                    event = next_event(reader_events) => Wake::Reader(event),
                    event = next_event(output_events) => Wake::Output(event),
                    () = async {
                        if let Some(sleep) = backoff.as_mut() {
                            sleep.await;
                        }
                    }, if backoff_armed => Wake::Backoff,
                    _ = ticker.tick() => Wake::Tick,
                }
            };
            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                // Every handle dropped; stop cleanly
                Wake::Command(None) => self.finish(DoneReason::Stopped),
                Wake::Reader(Some(event)) => self.handle_reader_event(event),
                Wake::Reader(None) => self.reader_events = None,
                Wake::Output(Some(event)) => self.handle_output_event(event),
                Wake::Output(None) => self.output_events = None,
                Wake::Backoff => {
                    self.backoff = None;
                    self.reconnect().await;
                }
                Wake::Tick => {
                    if self.watchdog.expired() {
                        warn!(id = self.id, "no stream activity within the watchdog window");
                        self.finish(DoneReason::Error(AudioError::Timeout));
                    }
                }
            }
        }
        debug!(id = self.id, state = ?self.state(), "streamer finished");
    }

    fn state(&self) -> StreamerState {
        self.state_tx.borrow().clone()
    }

    fn is_done(&self) -> bool {
        self.state().is_done()
    }

    fn set_state(&self, next: StreamerState) {
        // Done is terminal
        if self.is_done() {
            return;
        }
        if *self.state_tx.borrow() != next {
            debug!(id = self.id, next = ?next, "state transition");
            let _ = self.state_tx.send(next);
        }
    }

    fn finish(&mut self, reason: DoneReason) {
        if self.is_done() {
            return;
        }
        match &reason {
            DoneReason::Error(e) => warn!(id = self.id, error = %e, "stream failed"),
            reason => info!(id = self.id, reason = ?reason, "stream done"),
        }
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.reader_events = None;
        self.output = None;
        self.output_events = None;
        self.backoff = None;
        self.set_state(StreamerState::Done(reason));
    }

    fn fail(&mut self, error: AudioError) {
        self.finish(DoneReason::Error(error));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play => {
                if matches!(self.state(), StreamerState::Initialized) {
                    self.connect().await;
                }
            }
            Command::Pause => {
                if matches!(self.state(), StreamerState::Playing) {
                    self.pause_requested = true;
                    self.watchdog.suspend();
                    if let Some(output) = self.output.as_mut() {
                        if let Err(e) = output.set_paused(true) {
                            self.fail(e.into());
                        }
                    }
                }
            }
            Command::Resume => {
                if matches!(self.state(), StreamerState::Paused) {
                    self.pause_requested = false;
                    if !self.ring.is_blocked() && !self.eos {
                        self.watchdog.resume();
                    }
                    if let Some(output) = self.output.as_mut() {
                        if let Err(e) = output.set_paused(false) {
                            self.fail(e.into());
                        }
                    }
                }
            }
            Command::Stop => self.finish(DoneReason::Stopped),
            Command::SetVolume(volume) => {
                self.volume = volume;
                if let Some(output) = self.output.as_mut() {
                    if let Err(e) = output.set_volume(volume) {
                        self.fail(e.into());
                    }
                }
            }
            Command::Seek { to_secs, reply } => {
                let result = self.handle_seek(to_secs).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn connect(&mut self) {
        self.set_state(StreamerState::WaitingForData);
        match ByteStreamReader::open(&self.url, 0, &self.net).await {
            Ok(mut reader) => {
                let codec =
                    Codec::from_hint(reader.headers().content_type.as_deref(), &self.url);
                info!(id = self.id, url = %self.url, codec = ?codec, "stream connected");
                self.parser = Some(codec.parser());
                self.total_length = reader.total_length();
                self.reader_events = reader.take_events();
                self.reader = Some(reader);
                self.watchdog.resume();
            }
            Err(e) => self.fail(AudioError::Connect(e.to_string())),
        }
    }

    fn handle_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Data(bytes) => {
                self.watchdog.touch();
                self.stream_pos += bytes.len() as u64;
                let discontinuous = std::mem::take(&mut self.pending_discontinuous);
                if discontinuous {
                    // Seek or reconnect completed: data is flowing again
                    self.seek_in_flight = false;
                }
                let Some(parser) = self.parser.as_mut() else {
                    return;
                };
                match parser.parse(&bytes, discontinuous) {
                    Ok(events) => self.apply_parser_events(events),
                    Err(e) => self.fail(e.into()),
                }
            }
            ReaderEvent::End => {
                debug!(id = self.id, "stream body ended");
                self.eos = true;
                self.reader = None;
                self.reader_events = None;
                self.watchdog.suspend();
                if self.format.is_none() || self.estimator.packets_seen() == 0 {
                    self.fail(AudioError::NoAudioData);
                    return;
                }
                if let Some(slot) = self.ring.flush() {
                    self.submit_slot(slot);
                }
                self.maybe_start();
                self.check_end_of_stream();
            }
            ReaderEvent::Failed(e) => {
                if e.is_connection_reset() {
                    self.schedule_retry();
                } else {
                    self.fail(AudioError::Network(e.to_string()));
                }
            }
        }
    }

    fn apply_parser_events(&mut self, events: Vec<ParserEvent>) {
        for event in events {
            if self.is_done() {
                return;
            }
            match event {
                ParserEvent::DataOffset(offset) => {
                    debug!(id = self.id, offset, "audio data offset");
                    self.data_offset = offset;
                }
                ParserEvent::Format(format) => {
                    info!(
                        id = self.id,
                        sample_rate = format.sample_rate,
                        codec = ?format.codec,
                        "stream format detected"
                    );
                    self.format = Some(format);
                    self.estimator.set_format(&format);
                    match self.output_factory.create(format, self.volume) {
                        Ok(mut output) => {
                            self.output_events = output.take_events();
                            self.output = Some(output);
                        }
                        Err(e) => self.fail(e.into()),
                    }
                }
                ParserEvent::Ready => {}
                ParserEvent::Packet(packet) => {
                    self.estimator.record(packet.len());
                    match self.ring.push(packet) {
                        Ok(outcome) => self.apply_push_outcome(outcome),
                        Err(e) => self.fail(e),
                    }
                }
            }
        }
        self.update_metrics();
        self.maybe_start();
    }

    fn apply_push_outcome(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Buffered | PushOutcome::Queued => {}
            PushOutcome::Submitted(slot) => self.submit_slot(slot),
            PushOutcome::SubmittedAndBlocked(slot) => {
                self.submit_slot(slot);
                if !self.config.unbounded_buffering {
                    if let Some(reader) = self.reader.as_ref() {
                        reader.pause();
                    }
                    // Deliberately idle; a stall here is backpressure,
                    // not a dead connection
                    self.watchdog.suspend();
                }
            }
        }
    }

    fn submit_slot(&mut self, slot: SlotSubmission) {
        self.slot_sizes[slot.index] = slot.data.len();
        self.slots_submitted += 1;
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.submit(slot) {
                self.fail(e.into());
                return;
            }
        }
        // After a seek the output is already running; the first
        // refilled slot ends the waiting period
        if self.output_started && matches!(self.state(), StreamerState::WaitingForData) {
            let next = if self.pause_requested {
                StreamerState::Paused
            } else {
                StreamerState::Playing
            };
            self.set_state(next);
        }
    }

    /// Start the output once enough slots are buffered, or at end of
    /// stream regardless of the threshold.
    fn maybe_start(&mut self) {
        if self.output_started || self.is_done() {
            return;
        }
        if self.slots_submitted == 0 && !self.eos {
            return;
        }
        if self.slots_submitted >= self.config.start_threshold_slots || self.eos {
            let Some(output) = self.output.as_mut() else {
                return;
            };
            match output.start() {
                Ok(()) => {
                    self.output_started = true;
                    if matches!(self.state(), StreamerState::WaitingForData) {
                        self.set_state(StreamerState::WaitingForQueueToStart);
                    }
                }
                Err(e) => self.fail(e.into()),
            }
        }
    }

    fn handle_output_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::SlotConsumed(index) => {
                if let Some(size) = self.slot_sizes.get(index).copied() {
                    if let Ok(mut metrics) = self.metrics.lock() {
                        metrics.bytes_played += size as u64;
                    }
                }
                let replay = self.ring.complete(index);
                for slot in replay.submissions {
                    self.submit_slot(slot);
                }
                if replay.unblocked && !self.eos {
                    if let Some(reader) = self.reader.as_ref() {
                        reader.resume();
                    }
                    if !self.pause_requested {
                        self.watchdog.resume();
                    }
                }
                if self.eos {
                    if let Some(slot) = self.ring.flush() {
                        self.submit_slot(slot);
                    }
                    self.check_end_of_stream();
                }
            }
            OutputEvent::Running(true) => {
                if matches!(
                    self.state(),
                    StreamerState::WaitingForQueueToStart | StreamerState::Paused
                ) {
                    self.set_state(StreamerState::Playing);
                }
            }
            OutputEvent::Running(false) => {
                if self.pause_requested && matches!(self.state(), StreamerState::Playing) {
                    self.set_state(StreamerState::Paused);
                }
            }
            OutputEvent::Failed(e) => self.fail(e.into()),
        }
    }

    fn check_end_of_stream(&mut self) {
        if self.eos && self.ring.is_drained() {
            self.finish(DoneReason::EndOfFile);
        }
    }

    fn schedule_retry(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.reader_events = None;
        self.watchdog.suspend();
        match self.retry.next_backoff() {
            Some(delay) => {
                warn!(
                    id = self.id,
                    attempt = self.retry.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "connection reset, reconnecting"
                );
                self.backoff = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => self.fail(AudioError::Network(
                "connection reset, retries exhausted".into(),
            )),
        }
    }

    async fn reconnect(&mut self) {
        match ByteStreamReader::open(&self.url, self.stream_pos, &self.net).await {
            Ok(mut reader) => {
                // A 206 resumes at the exact byte we left off, so frame
                // state carries over; anything else restarts the body
                // from the top and sync must be re-acquired.
                let exact = reader.headers().status == 206 || self.stream_pos == 0;
                self.pending_discontinuous = !exact;
                if !exact {
                    warn!(
                        id = self.id,
                        ignored_offset = self.stream_pos,
                        "server ignored the range, body restarts from byte 0"
                    );
                    self.stream_pos = 0;
                    self.total_length = reader.total_length();
                }
                debug!(id = self.id, offset = self.stream_pos, exact, "reconnected");
                self.reader_events = reader.take_events();
                self.reader = Some(reader);
                if self.ring.is_blocked() && !self.config.unbounded_buffering {
                    if let Some(reader) = self.reader.as_ref() {
                        reader.pause();
                    }
                } else if !self.pause_requested {
                    self.watchdog.resume();
                }
            }
            Err(e) => {
                if e.is_connection_reset() {
                    self.schedule_retry();
                } else {
                    self.fail(AudioError::Network(e.to_string()));
                }
            }
        }
    }

    async fn handle_seek(&mut self, to_secs: f64) -> Result<(), AudioError> {
        if self.seek_in_flight {
            return Err(AudioError::SeekInFlight);
        }
        let (Some(bitrate), Some(total)) = (self.estimator.bitrate_bps(), self.total_length)
        else {
            return Err(AudioError::SeekNotReady);
        };
        let Some(parser) = self.parser.as_ref() else {
            return Err(AudioError::SeekNotReady);
        };
        if self.eos || self.is_done() {
            return Err(AudioError::SeekNotReady);
        }
        let duration = match self.estimator.duration_secs(total, self.data_offset) {
            Some(secs) if secs > 0.0 => secs,
            _ => return Err(AudioError::SeekNotReady),
        };

        let fraction = (to_secs / duration).clamp(0.0, 1.0);
        let payload = total.saturating_sub(self.data_offset);
        let approx = self.data_offset + (fraction * payload as f64) as u64;
        // Leave at least two slots of trailing data so playback has
        // something to restart on
        let trailing = (2 * self.config.buffer_size) as u64;
        let ceiling = total.saturating_sub(trailing).max(self.data_offset);
        let aligned = parser.align_seek(approx.min(ceiling));

        info!(
            id = self.id,
            to_secs,
            offset = aligned.offset,
            estimated = aligned.estimated,
            "seeking"
        );

        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.reader_events = None;
        self.ring.discard_unsubmitted();

        match ByteStreamReader::open(&self.url, aligned.offset, &self.net).await {
            Ok(mut reader) => {
                self.pending_discontinuous = true;
                self.seek_in_flight = true;
                self.stream_pos = aligned.offset;
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.base_secs =
                        aligned.offset.saturating_sub(self.data_offset) as f64 * 8.0 / bitrate;
                    metrics.bytes_played = 0;
                }
                self.reader_events = reader.take_events();
                self.reader = Some(reader);
                if !self.pause_requested {
                    self.watchdog.resume();
                }
                // Playback resumes once the ring refills
                self.set_state(StreamerState::WaitingForData);
                Ok(())
            }
            Err(e) => {
                let error = AudioError::Connect(e.to_string());
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    fn update_metrics(&mut self) {
        let bitrate = self.estimator.bitrate_bps();
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.bitrate_bps = bitrate;
            metrics.duration_secs = self
                .total_length
                .and_then(|total| self.estimator.duration_secs(total, self.data_offset));
        }
        if !self.bitrate_announced {
            if let Some(bitrate_bps) = bitrate {
                self.bitrate_announced = true;
                debug!(id = self.id, bitrate_bps, "bitrate estimate settled");
                if let Ok(publisher) = self.events.lock() {
                    publisher.publish(StreamerEvent::BitrateReady {
                        id: self.id,
                        bitrate_bps,
                    });
                }
            }
        }
    }
}

/// Await the next item of an optional receiver; pends forever on `None`
/// so it can sit in a `select!` without a guard.
async fn next_event<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
