//! # EtherWave Playback Queue
//!
//! Song-level orchestration above [`ewaudio::Streamer`]: a FIFO of
//! URLs, one active streamer at a time, queue-owned volume, and typed
//! events for the embedding application.
//!
//! Advancement policy: the queue moves to the next song on its own only
//! when a stream reaches its natural end. Failures are surfaced as
//! [`QueueEvent::StreamError`] and the queue waits for the caller to
//! either [`retry`](PlaybackQueue::retry) or [`next`](PlaybackQueue::next);
//! skipping a song the listener may still want is worse than pausing the
//! flow.
//!
//! Each started streamer gets a monitor task tagged with the queue epoch
//! at start time. Any queue mutation bumps the epoch, so a monitor that
//! outlives its song sees the mismatch and stands down instead of
//! advancing a queue that has already moved on.

use ewaudio::events::{EngineEvent, EventPublisher};
use ewaudio::output::OutputFactory;
use ewaudio::{AudioError, DoneReason, PlayerConfig, Streamer, StreamerId, StreamerState};
use ewstream::NetworkConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Pending-count threshold below which [`QueueEvent::RunningLow`] fires
const LOW_WATER_MARK: usize = 2;

/// Events published by the queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The queue is about to build a streamer for this URL
    AttemptingNewSong { url: String },
    /// A streamer was built; `id` matches [`ewaudio::Streamer::id`]
    CreatedNewStream { id: StreamerId, url: String },
    /// A song started (or restarted after a manual retry)
    NowPlaying { url: String },
    /// The backlog dropped below the low-water mark; `remaining` counts
    /// songs still pending after the one now playing
    RunningLow { remaining: usize },
    /// Advancement found nothing left to play
    NoSongsLeft,
    /// The current song failed; the queue holds position awaiting
    /// `retry` or `next`
    StreamError { url: String, error: AudioError },
}

impl EngineEvent for QueueEvent {}

struct Context {
    config: Arc<PlayerConfig>,
    net: NetworkConfig,
    factory: Arc<dyn OutputFactory>,
}

struct Inner {
    pending: VecDeque<String>,
    current: Option<Streamer>,
    /// Manual retries spent on the current song
    manual_retries: u32,
    volume_percent: u8,
    /// Bumped on every song change; stale monitors check it and stand
    /// down
    epoch: u64,
    /// Guards against overlapping advancement (double skip)
    advancing: bool,
    publisher: EventPublisher<QueueEvent>,
}

/// FIFO of stream URLs played one after another
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Mutex<Inner>>,
    ctx: Arc<Context>,
}

impl PlaybackQueue {
    pub fn new(
        config: Arc<PlayerConfig>,
        factory: Arc<dyn OutputFactory>,
    ) -> Result<Self, ewstream::StreamError> {
        let net = NetworkConfig::new(&config)?;
        let volume_percent = (config.volume.clamp(0.0, 1.0) * 100.0).round() as u8;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: VecDeque::new(),
                current: None,
                manual_retries: 0,
                volume_percent,
                epoch: 0,
                advancing: false,
                publisher: EventPublisher::new(),
            })),
            ctx: Arc::new(Context {
                config,
                net,
                factory,
            }),
        })
    }

    /// Register a subscriber for queue events
    pub async fn subscribe(&self, tx: mpsc::Sender<QueueEvent>) {
        self.inner.lock().await.publisher.subscribe(tx);
    }

    /// Append a song to the backlog. With `play_now`, starts playback
    /// right away when nothing is currently playing; a song already in
    /// progress is never interrupted.
    pub async fn add_song(&self, url: impl Into<String>, play_now: bool) {
        let url = url.into();
        let start = {
            let mut inner = self.inner.lock().await;
            debug!(url = %url, pending = inner.pending.len() + 1, "song queued");
            inner.pending.push_back(url);
            play_now
                && inner
                    .current
                    .as_ref()
                    .map_or(true, |s| s.state().is_done())
        };
        if start {
            self.play().await;
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn current_url(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|s| s.url().to_string())
    }

    /// Queue volume as a percentage, 0 to 100
    pub async fn volume(&self) -> u8 {
        self.inner.lock().await.volume_percent
    }

    /// Set the queue volume; applies to the current song immediately and
    /// to every song started afterwards.
    pub async fn set_volume(&self, percent: u8) {
        let percent = percent.min(100);
        let current = {
            let mut inner = self.inner.lock().await;
            inner.volume_percent = percent;
            inner.current.clone()
        };
        if let Some(streamer) = current {
            streamer.set_volume(percent as f32 / 100.0).await;
        }
    }

    /// Resume the current song, or start the next one when nothing is
    /// actively playing.
    pub async fn play(&self) {
        let active = {
            let inner = self.inner.lock().await;
            inner
                .current
                .as_ref()
                .filter(|s| !s.state().is_done())
                .cloned()
        };
        match active {
            Some(streamer) => streamer.resume().await,
            None => self.advance().await,
        }
    }

    pub async fn pause(&self) {
        if let Some(streamer) = self.current().await {
            streamer.pause().await;
        }
    }

    /// Stop the current song without advancing; the backlog is kept and
    /// [`play`](PlaybackQueue::play) moves on to the next song.
    pub async fn stop(&self) {
        let current = {
            let mut inner = self.inner.lock().await;
            inner.epoch += 1;
            inner.current.take()
        };
        if let Some(streamer) = current {
            streamer.stop().await;
        }
    }

    /// Skip to the next song
    pub async fn next(&self) {
        self.advance().await;
    }

    /// Restart the current song after a failure. Bounded per song; once
    /// the budget is spent the queue gives up entirely, clearing the
    /// backlog.
    pub async fn retry(&self) {
        enum Action {
            Restart { url: String, epoch: u64, old: Option<Streamer> },
            GiveUp,
            Nothing,
        }
        let action = {
            let mut inner = self.inner.lock().await;
            match inner.current.as_ref().map(|s| s.url().to_string()) {
                None => Action::Nothing,
                Some(url) => {
                    if inner.manual_retries >= self.ctx.config.max_manual_retries {
                        warn!(url = %url, "manual retry budget spent, giving up");
                        Action::GiveUp
                    } else {
                        inner.manual_retries += 1;
                        inner.epoch += 1;
                        let epoch = inner.epoch;
                        let old = inner.current.take();
                        info!(url = %url, attempt = inner.manual_retries, "manual retry");
                        Action::Restart { url, epoch, old }
                    }
                }
            }
        };
        match action {
            Action::Nothing => {}
            Action::Restart { url, epoch, old } => {
                if let Some(old) = old {
                    old.stop().await;
                }
                self.start_song(url, epoch).await;
            }
            Action::GiveUp => {
                self.inner.lock().await.pending.clear();
                self.advance().await;
            }
        }
    }

    async fn current(&self) -> Option<Streamer> {
        self.inner.lock().await.current.clone()
    }

    /// Stop whatever is playing and start the next pending song
    async fn advance(&self) {
        let (old, next_url, epoch) = {
            let mut inner = self.inner.lock().await;
            if inner.advancing {
                debug!("advance already in flight, ignoring");
                return;
            }
            inner.advancing = true;
            inner.epoch += 1;
            inner.manual_retries = 0;
            (inner.current.take(), inner.pending.pop_front(), inner.epoch)
        };
        if let Some(old) = old {
            old.stop().await;
        }

        match next_url {
            Some(url) => {
                self.start_song(url, epoch).await;
                let mut inner = self.inner.lock().await;
                inner.advancing = false;
                let remaining = inner.pending.len();
                if remaining < LOW_WATER_MARK {
                    inner.publisher.publish(QueueEvent::RunningLow { remaining });
                }
            }
            None => {
                let mut inner = self.inner.lock().await;
                inner.advancing = false;
                info!("queue exhausted");
                inner.publisher.publish(QueueEvent::NoSongsLeft);
            }
        }
    }

    async fn start_song(&self, url: String, epoch: u64) {
        let volume = {
            let inner = self.inner.lock().await;
            inner
                .publisher
                .publish(QueueEvent::AttemptingNewSong { url: url.clone() });
            inner.volume_percent as f32 / 100.0
        };
        let streamer = Streamer::new(
            url.clone(),
            Arc::clone(&self.ctx.config),
            self.ctx.net.clone(),
            Arc::clone(&self.ctx.factory),
            volume,
        );
        streamer.play().await;
        let states = streamer.watch_state();

        {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                // Another mutation won the race; this streamer is stale
                streamer.stop().await;
                return;
            }
            inner.publisher.publish(QueueEvent::CreatedNewStream {
                id: streamer.id(),
                url: url.clone(),
            });
            inner.current = Some(streamer);
            inner
                .publisher
                .publish(QueueEvent::NowPlaying { url: url.clone() });
        }
        self.spawn_monitor(states, epoch, url);
    }

    /// Watch one streamer to completion, reacting per the advancement
    /// policy. Tagged with the start epoch so it cannot act on a queue
    /// that has moved past its song.
    fn spawn_monitor(
        &self,
        mut states: watch::Receiver<StreamerState>,
        epoch: u64,
        url: String,
    ) {
        let queue = self.clone();
        tokio::spawn(async move {
            let reason = loop {
                let state = states.borrow_and_update().clone();
                if let StreamerState::Done(reason) = state {
                    break reason;
                }
                if states.changed().await.is_err() {
                    return;
                }
            };
            {
                let inner = queue.inner.lock().await;
                if inner.epoch != epoch {
                    return;
                }
            }
            match reason {
                DoneReason::EndOfFile => {
                    debug!(url = %url, "song finished, advancing");
                    queue.advance().await;
                }
                // The queue itself initiated this; nothing to do
                DoneReason::Stopped => {}
                DoneReason::Error(error) => {
                    let mut inner = queue.inner.lock().await;
                    if inner.epoch == epoch {
                        inner
                            .publisher
                            .publish(QueueEvent::StreamError { url, error });
                    }
                }
            }
        });
    }
}
