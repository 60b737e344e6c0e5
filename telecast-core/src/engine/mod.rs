//! Per-channel playback controller.
//!
//! One long-running task per channel owns all runtime state and reads
//! typed events from a single mailbox: commands from the registry,
//! lifecycle reports from transcoder spawns, and delayed self-messages
//! that implement every back-off and retry. Each event drives one state
//! transition; there are no re-entrant callbacks.
//!
//! The engine alternates two transcoder slots: while the active slot
//! plays, the head of the queue is preloaded on the other slot, and at
//! the transition boundary the slots swap and the public playlist is
//! republished. With an empty queue the active slot loops the ad.

mod state;

pub use state::RuntimeState;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::StreamingConfig;
use crate::models::{ChannelId, ChannelStatus, Movie, Slot};
use crate::publisher::{prune_slot_files, publish_slot};
use crate::schedule::ScheduleProjector;
use crate::transcoder::{self, readiness, TranscoderRole, TranscoderSpec};

/// Everything that can land in a channel's mailbox.
#[derive(Debug)]
pub enum EngineEvent {
    /// A movie was appended to the queue.
    Enqueue(Movie),
    /// The readiness detector saw playable output on a slot.
    Ready { slot: Slot, generation: u64 },
    /// The readiness detector gave up on a slot.
    ReadinessTimeout { slot: Slot, generation: u64 },
    /// A transcoder child exited on its own.
    Exited { slot: Slot, generation: u64, code: i32 },
    /// Start (or retry) the ad loop on the active slot.
    StartAd,
    /// Attempt the transition to the queue head.
    StartNext,
    /// Preload the queue head onto the inactive slot.
    PreloadHead,
    /// Deferred cleanup of a vacated slot's files.
    PruneSlot { slot: Slot },
    Shutdown,
}

/// Handle the registry keeps per running channel.
pub struct ChannelHandle {
    pub id: ChannelId,
    tx: mpsc::UnboundedSender<EngineEvent>,
    status_rx: watch::Receiver<ChannelStatus>,
}

impl ChannelHandle {
    pub fn enqueue(&self, movie: Movie) -> crate::Result<()> {
        self.tx
            .send(EngineEvent::Enqueue(movie))
            .map_err(|_| crate::Error::Internal("channel engine stopped".to_string()))
    }

    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineEvent::Shutdown);
    }
}

pub struct ChannelEngine {
    id: ChannelId,
    name: String,
    dir: PathBuf,
    streaming: StreamingConfig,
    catalog: Arc<Catalog>,
    projector: ScheduleProjector,
    state: RuntimeState,
    /// Stamps every spawn; events carrying an older stamp are stale.
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl ChannelEngine {
    /// Spawn the engine task for an initialized channel and seed it
    /// with its first action: play the queue if there is one, the ad
    /// otherwise.
    pub async fn start(
        id: ChannelId,
        name: String,
        dir: PathBuf,
        streaming: StreamingConfig,
        catalog: Arc<Catalog>,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            name: name.clone(),
            ..ChannelStatus::default()
        });

        let seed = if catalog.queue_len(&id).await > 0 {
            EngineEvent::StartNext
        } else {
            EngineEvent::StartAd
        };
        let _ = tx.send(seed);

        let projector = ScheduleProjector::new(&streaming);
        let engine = Self {
            id: id.clone(),
            name,
            dir,
            streaming,
            catalog,
            projector,
            state: RuntimeState::new(),
            generation: 0,
            tx: tx.clone(),
            status_tx,
        };
        tokio::spawn(engine.run(rx));

        ChannelHandle { id, tx, status_rx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
        info!(channel = %self.id, "channel engine started");
        while let Some(event) = rx.recv().await {
            if matches!(event, EngineEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
            self.publish_status().await;
        }
        if let Some(current) = self.state.current.take() {
            current.kill();
        }
        if let Some(next) = self.state.next.take() {
            next.kill();
        }
        info!(channel = %self.id, "channel engine stopped");
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Enqueue(movie) => self.on_enqueue(movie).await,
            EngineEvent::Ready { slot, generation } => self.on_ready(slot, generation).await,
            EngineEvent::ReadinessTimeout { slot, generation } => {
                self.on_readiness_timeout(slot, generation).await;
            }
            EngineEvent::Exited { slot, generation, code } => {
                self.on_exited(slot, generation, code).await;
            }
            EngineEvent::StartAd => self.play_ad().await,
            EngineEvent::StartNext => self.play_next().await,
            EngineEvent::PreloadHead => {
                if self.state.is_playing
                    && !self.state.playing_ad
                    && !self.state.preload_ready
                    && !self.state.is_preloading
                {
                    self.preload_next().await;
                }
            }
            EngineEvent::PruneSlot { slot } => {
                let occupied = slot == self.state.active()
                    || self.state.next.as_ref().is_some_and(|h| h.slot == slot);
                if !occupied {
                    prune_slot_files(&self.dir, slot).await;
                }
            }
            EngineEvent::Shutdown => {}
        }
    }

    /// Send an event back to our own mailbox after a delay.
    fn delayed(&self, event: EngineEvent, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    async fn publish_status(&self) {
        let record = self.catalog.get(&self.id).await;
        let status = ChannelStatus {
            name: self.name.clone(),
            current_movie: record.as_ref().and_then(|r| r.current_movie.clone()),
            is_playing: self.state.is_playing,
            playing_ad: self.state.playing_ad,
            queue_length: record.map_or(0, |r| r.queue.len()),
            preload_ready: self.state.preload_ready,
        };
        let _ = self.status_tx.send(status);
    }

    // --- queue -----------------------------------------------------------

    async fn on_enqueue(&mut self, movie: Movie) {
        let title = movie.title.clone();
        let previous_len = match self.catalog.append_movie(&self.id, movie).await {
            Ok(len) => len,
            Err(e) => {
                error!(channel = %self.id, error = %e, "failed to persist enqueue");
                return;
            }
        };
        info!(channel = %self.id, %title, position = previous_len, "movie enqueued");
        self.regenerate_schedule().await;

        // First item while the ad holds the active slot: evict the ad
        // and bring the movie up on the other slot. In every other case
        // the running movie's own completion drives the transition.
        if previous_len == 0 && self.state.ad_occupies_active() {
            self.replace_ad().await;
        }
    }

    async fn replace_ad(&mut self) {
        if let Some(ad) = self.state.current.take() {
            info!(channel = %self.id, "evicting ad for first queued movie");
            ad.kill();
        }
        self.state.is_playing = false;
        self.state.playing_ad = false;

        // Let the kill settle before touching the slot's files.
        tokio::time::sleep(Duration::from_secs(self.streaming.transition_settle_secs)).await;
        prune_slot_files(&self.dir, self.state.active()).await;

        self.preload_next().await;
        // The Ready event completes the hand-off; this is the backstop.
        self.delayed(
            EngineEvent::StartNext,
            Duration::from_secs(self.streaming.play_next_retry_secs),
        );
    }

    // --- ad loop ---------------------------------------------------------

    async fn play_ad(&mut self) {
        if self.state.is_playing || self.state.current.is_some() {
            return;
        }
        // A queued movie always outranks the ad.
        if self.catalog.queue_len(&self.id).await > 0 {
            let _ = self.tx.send(EngineEvent::StartNext);
            return;
        }

        let slot = self.state.active();
        prune_slot_files(&self.dir, slot).await;

        let generation = self.next_generation();
        let spec = TranscoderSpec {
            input: self.streaming.ad_path.clone(),
            output_dir: self.dir.clone(),
            slot,
            role: TranscoderRole::Ad,
            title: String::new(),
            generation,
        };
        match transcoder::spawn(&self.streaming, spec, self.tx.clone()).await {
            Ok(handle) => {
                debug!(channel = %self.id, %slot, "ad transcoder warming");
                self.state.current = Some(handle);
            }
            Err(e) => {
                warn!(channel = %self.id, error = %e, "ad spawn failed, retrying");
                self.delayed(
                    EngineEvent::StartAd,
                    Duration::from_secs(self.streaming.ad_restart_failure_secs),
                );
            }
        }
    }

    // --- preload ---------------------------------------------------------

    async fn preload_next(&mut self) {
        if self.state.is_preloading || self.state.preload_ready {
            return;
        }

        loop {
            let Some(head) = self.catalog.peek_head(&self.id).await else {
                return;
            };

            let slot = self.state.next_slot();
            prune_slot_files(&self.dir, slot).await;

            let generation = self.next_generation();
            let spec = TranscoderSpec {
                input: head.file_path.clone(),
                output_dir: self.dir.clone(),
                slot,
                role: TranscoderRole::Movie,
                title: head.title.clone(),
                generation,
            };
            match transcoder::spawn(&self.streaming, spec, self.tx.clone()).await {
                Ok(handle) => {
                    info!(channel = %self.id, %slot, title = %head.title, "preloading");
                    self.state.next = Some(handle);
                    self.state.is_preloading = true;
                    return;
                }
                Err(e) if e.is_spawn_failure() => {
                    // Unplayable head: drop it and move on to the next.
                    warn!(
                        channel = %self.id,
                        title = %head.title,
                        error = %e,
                        "dropping unplayable queue head"
                    );
                    if let Err(e) = self.catalog.shift_queue(&self.id).await {
                        error!(channel = %self.id, error = %e, "failed to drop queue head");
                        return;
                    }
                    self.regenerate_schedule().await;
                    if self.catalog.queue_len(&self.id).await == 0 {
                        if !self.state.is_playing {
                            self.delayed(EngineEvent::StartAd, Duration::from_secs(0));
                        }
                        return;
                    }
                }
                Err(e) => {
                    warn!(channel = %self.id, error = %e, "preload spawn failed, retrying");
                    self.delayed(
                        EngineEvent::PreloadHead,
                        Duration::from_secs(self.streaming.play_next_retry_secs),
                    );
                    return;
                }
            }
        }
    }

    // --- readiness -------------------------------------------------------

    async fn on_ready(&mut self, slot: Slot, generation: u64) {
        if slot == self.state.active() {
            let live = self
                .state
                .current
                .as_ref()
                .is_some_and(|h| h.generation == generation);
            if live && self.state.ad_occupies_active() && !self.state.is_playing {
                self.publish_ad().await;
            }
        } else {
            let live = self
                .state
                .next
                .as_ref()
                .is_some_and(|h| h.generation == generation);
            if live && self.state.is_preloading {
                info!(channel = %self.id, %slot, "preload ready");
                self.state.is_preloading = false;
                self.state.preload_ready = true;
                if !self.state.is_playing && self.catalog.queue_len(&self.id).await > 0 {
                    self.play_next().await;
                }
            }
        }
    }

    async fn publish_ad(&mut self) {
        // The rolling window can still be thin right at readiness; give
        // it a moment before the first publish.
        tokio::time::sleep(Duration::from_secs(self.streaming.ad_stabilize_secs)).await;

        if self.try_publish().await {
            info!(channel = %self.id, slot = %self.state.active(), "ad loop on air");
            self.state.is_playing = true;
            self.state.playing_ad = true;
            if let Err(e) = self.catalog.clear_current(&self.id).await {
                warn!(channel = %self.id, error = %e, "failed to clear current movie");
            }
        } else {
            warn!(channel = %self.id, "ad publish failed, restarting ad");
            if let Some(ad) = self.state.current.take() {
                ad.kill();
            }
            self.delayed(
                EngineEvent::StartAd,
                Duration::from_secs(self.streaming.ad_restart_failure_secs),
            );
        }
    }

    async fn on_readiness_timeout(&mut self, slot: Slot, generation: u64) {
        if slot == self.state.active() {
            let live = self
                .state
                .current
                .as_ref()
                .is_some_and(|h| h.generation == generation);
            if live && self.state.ad_occupies_active() && !self.state.is_playing {
                warn!(channel = %self.id, "ad never became playable, restarting");
                if let Some(ad) = self.state.current.take() {
                    ad.kill();
                }
                self.delayed(
                    EngineEvent::StartAd,
                    Duration::from_secs(self.streaming.ad_restart_failure_secs),
                );
            }
            return;
        }

        let live = self
            .state
            .next
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if !live || !self.state.is_preloading {
            return;
        }

        // Deadline passed; trust the directory over the detector once
        // before declaring the preload dead.
        if readiness::check_playable(&self.dir, slot, self.streaming.min_segment_bytes).await {
            info!(channel = %self.id, %slot, "preload ready on manual check");
            self.state.is_preloading = false;
            self.state.preload_ready = true;
            if !self.state.is_playing && self.catalog.queue_len(&self.id).await > 0 {
                self.play_next().await;
            }
            return;
        }

        warn!(channel = %self.id, %slot, "preload readiness timeout");
        if let Some(next) = self.state.next.take() {
            next.kill();
        }
        self.state.is_preloading = false;
        self.delayed(
            EngineEvent::PreloadHead,
            Duration::from_secs(self.streaming.play_next_retry_secs),
        );
        if !self.state.is_playing {
            self.delayed(
                EngineEvent::StartNext,
                Duration::from_secs(self.streaming.play_next_retry_secs),
            );
        }
    }

    // --- exits -----------------------------------------------------------

    async fn on_exited(&mut self, slot: Slot, generation: u64, code: i32) {
        if slot == self.state.active() {
            let live = self
                .state
                .current
                .as_ref()
                .is_some_and(|h| h.generation == generation);
            if !live {
                return;
            }
            let was_ad = self
                .state
                .current
                .take()
                .is_some_and(|h| h.is_ad());
            self.state.is_playing = false;
            self.state.playing_ad = false;

            if was_ad {
                self.on_ad_exited(code).await;
            } else {
                self.on_movie_exited(code).await;
            }
            return;
        }

        let live = self
            .state
            .next
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if !live {
            return;
        }
        self.state.next = None;
        if self.state.is_preloading {
            warn!(channel = %self.id, %slot, code, "preload transcoder died");
            self.state.is_preloading = false;
            self.delayed(
                EngineEvent::PreloadHead,
                Duration::from_secs(self.streaming.play_next_retry_secs),
            );
        } else if self.state.preload_ready {
            // Warm output with no process behind it; the transition
            // will preload from scratch.
            warn!(channel = %self.id, %slot, code, "preloaded transcoder died before swap");
            self.state.preload_ready = false;
        }
    }

    async fn on_ad_exited(&mut self, code: i32) {
        if self.catalog.queue_len(&self.id).await > 0 {
            // A movie arrived right as the ad died; hand over now.
            self.preload_next().await;
            self.delayed(
                EngineEvent::StartNext,
                Duration::from_secs(self.streaming.transition_settle_secs),
            );
            return;
        }
        let backoff = if code == 0 {
            self.streaming.ad_restart_secs
        } else {
            self.streaming.ad_restart_failure_secs
        };
        debug!(channel = %self.id, code, backoff, "ad exited, restarting");
        self.delayed(EngineEvent::StartAd, Duration::from_secs(backoff));
    }

    async fn on_movie_exited(&mut self, code: i32) {
        if code != 0 {
            // A crash advances the queue just like natural completion;
            // the viewer sees a glitch, not a freeze.
            warn!(channel = %self.id, code, "movie transcoder crashed");
        }
        if let Err(e) = self.catalog.clear_current(&self.id).await {
            warn!(channel = %self.id, error = %e, "failed to clear current movie");
        }
        let follow_up = if self.catalog.queue_len(&self.id).await > 0 {
            EngineEvent::StartNext
        } else {
            EngineEvent::StartAd
        };
        self.delayed(
            follow_up,
            Duration::from_secs(self.streaming.transition_settle_secs),
        );
    }

    // --- transition ------------------------------------------------------

    async fn play_next(&mut self) {
        if self.state.is_playing && !self.state.playing_ad {
            // A movie is on air; its own exit schedules the next one.
            return;
        }
        if self.catalog.queue_len(&self.id).await == 0 {
            if !self.state.is_playing {
                let _ = self.tx.send(EngineEvent::StartAd);
            }
            return;
        }
        if self.state.playing_ad {
            self.replace_ad().await;
            return;
        }

        if !self.state.preload_ready {
            if self.state.is_preloading {
                // Already warming; look again shortly.
                self.delayed(
                    EngineEvent::StartNext,
                    Duration::from_secs(self.streaming.preload_wait_secs),
                );
            } else {
                self.preload_next().await;
                self.delayed(
                    EngineEvent::StartNext,
                    Duration::from_secs(self.streaming.play_next_retry_secs),
                );
            }
            return;
        }

        // Capture the head before any queue mutation; the shift comes
        // last so a crash mid-transition replays this movie.
        let Some(head) = self.catalog.peek_head(&self.id).await else {
            self.state.preload_ready = false;
            return;
        };
        let Some(next_handle) = self.state.next.take() else {
            self.state.preload_ready = false;
            self.delayed(
                EngineEvent::StartNext,
                Duration::from_secs(self.streaming.play_next_retry_secs),
            );
            return;
        };

        let vacated = self.state.active();
        let old = self.state.current.take();
        self.state.swap();
        if let Some(old) = old {
            if old.is_ad() {
                old.kill();
            }
        }
        self.state.current = Some(next_handle);
        self.state.preload_ready = false;

        if !self.try_publish().await {
            // Keep going; the next preload cycle republishes.
            error!(channel = %self.id, "slot publish failed after retries, continuing");
        }

        let duration = self.projector.duration_of(&head).await;
        let start = Utc::now();
        let end = start
            + chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::minutes(90));
        if let Err(e) = self.catalog.set_current(&self.id, &head.title, start, end).await {
            error!(channel = %self.id, error = %e, "failed to persist current movie");
        }
        self.regenerate_schedule_skipping_head().await;

        if let Err(e) = self.catalog.shift_queue(&self.id).await {
            error!(channel = %self.id, error = %e, "failed to shift queue");
        }

        self.state.is_playing = true;
        self.state.playing_ad = false;
        info!(
            channel = %self.id,
            title = %head.title,
            slot = %self.state.active(),
            until = %end,
            "now playing"
        );

        self.delayed(
            EngineEvent::PruneSlot { slot: vacated },
            Duration::from_secs(self.streaming.prune_delay_secs),
        );
        self.delayed(
            EngineEvent::PreloadHead,
            Duration::from_secs(self.streaming.preload_after_start_secs),
        );
    }

    /// Publish the active slot, with the configured retry spacing.
    async fn try_publish(&self) -> bool {
        for attempt in 1..=self.streaming.publish_retries {
            match publish_slot(&self.dir, self.state.active(), self.streaming.min_segment_bytes)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    warn!(channel = %self.id, attempt, error = %e, "publish not ready");
                    tokio::time::sleep(Duration::from_millis(self.streaming.publish_retry_ms))
                        .await;
                }
            }
        }
        false
    }

    // --- schedule --------------------------------------------------------

    async fn regenerate_schedule(&self) {
        let Some(record) = self.catalog.get(&self.id).await else {
            return;
        };
        let rows = self.projector.project(&record, Utc::now()).await;
        if let Err(e) = self.catalog.set_schedule(&self.id, rows).await {
            warn!(channel = %self.id, error = %e, "failed to persist schedule");
        }
    }

    /// Schedule regeneration during a transition: the head is already
    /// the current entry but has not been shifted yet, so it must not
    /// also appear as the first upcoming row.
    async fn regenerate_schedule_skipping_head(&self) {
        let Some(mut record) = self.catalog.get(&self.id).await else {
            return;
        };
        if !record.queue.is_empty() {
            record.queue.remove(0);
        }
        let rows = self.projector.project(&record, Utc::now()).await;
        if let Err(e) = self.catalog.set_schedule(&self.id, rows).await {
            warn!(channel = %self.id, error = %e, "failed to persist schedule");
        }
    }
}
