//! Chunk animation unit: one chunk's load → play → analyse → end lifecycle.
//!
//! Every resource-touching step checks the unit's state first, so a load that
//! completes after the unit was cancelled is discarded instead of played.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::audio::analyzer::{AnalysisFrame, SpectrumAnalyzer};
use crate::audio::decode::DecodedAudio;
use crate::audio::output::{AudioOutput, PlaybackHandle};
use crate::avatar::ExpressionStore;
use crate::compositor::{Compositor, MouthWeights};
use crate::config::PlaybackConfig;
use crate::error::{LipSyncError, Result};
use crate::expression::ExpressionTag;

/// Lifecycle of a chunk animation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Loading,
    Playing,
    Ended,
    Cancelled,
}

/// What the owner should do with a unit after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Keep the unit.
    Active,
    /// Playback ended and the teardown delay elapsed; remove the unit.
    Finished,
    /// The load timed out; the unit cancelled itself and should be removed.
    TimedOut,
}

struct Playing {
    audio: Arc<DecodedAudio>,
    handle: Box<dyn PlaybackHandle>,
    analyzer: SpectrumAnalyzer,
}

/// One chunk's audio and its per-tick expression driver.
pub struct ChunkUnit {
    index: u32,
    generation: u64,
    tag: Option<ExpressionTag>,
    state: ChunkState,
    created_at: Instant,
    ended_at: Option<Instant>,
    frame_count: u64,
    playing: Option<Playing>,
    cancel: CancellationToken,
}

impl ChunkUnit {
    pub fn new(index: u32, generation: u64, tag: Option<ExpressionTag>, now: Instant) -> Self {
        Self {
            index,
            generation,
            tag,
            state: ChunkState::Loading,
            created_at: now,
            ended_at: None,
            frame_count: 0,
            playing: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tag(&self) -> Option<ExpressionTag> {
        self.tag
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Token cancelled when this unit is cancelled; handed to the load task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `Loading → Playing`: connect the analyser and start playback.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Channel`] if the unit is no longer loading (the
    /// late result must be discarded), [`LipSyncError::Timeout`] if the audio
    /// arrived after the load timeout (the unit is cancelled), or the output's
    /// error if playback cannot start.
    pub fn begin_playback(
        &mut self,
        audio: DecodedAudio,
        output: &dyn AudioOutput,
        config: &PlaybackConfig,
        now: Instant,
    ) -> Result<()> {
        if self.state != ChunkState::Loading || self.cancel.is_cancelled() {
            return Err(LipSyncError::Channel(format!(
                "chunk {} is {:?}, discarding loaded audio",
                self.index, self.state
            )));
        }
        if self.load_expired(now, config) {
            self.cancel();
            return Err(self.timeout_error(config));
        }

        let audio = Arc::new(audio);
        let handle = output.start(Arc::clone(&audio), now)?;
        debug!(
            chunk_index = self.index,
            generation = self.generation,
            duration_ms = audio.duration().as_millis() as u64,
            "chunk playing"
        );
        self.playing = Some(Playing {
            audio,
            handle,
            analyzer: SpectrumAnalyzer::new(config),
        });
        self.state = ChunkState::Playing;
        Ok(())
    }

    /// Advance one scheduler tick.
    pub fn tick(
        &mut self,
        now: Instant,
        compositor: &Compositor,
        store: &mut ExpressionStore,
        config: &PlaybackConfig,
    ) -> TickStatus {
        match self.state {
            ChunkState::Loading => {
                if self.load_expired(now, config) {
                    self.cancel();
                    return TickStatus::TimedOut;
                }
                TickStatus::Active
            }
            ChunkState::Playing => {
                let Some(playing) = self.playing.as_mut() else {
                    return TickStatus::Active;
                };
                if playing.handle.is_finished(now) {
                    self.release();
                    self.state = ChunkState::Ended;
                    self.ended_at = Some(now);
                    debug!(chunk_index = self.index, "chunk playback ended");
                    return Self::teardown_status(now, now, config.end_teardown_delay());
                }

                let position = playing.handle.position(now);
                let energy = playing.analyzer.analyze(&playing.audio.samples, position);
                let frame = AnalysisFrame {
                    mean_energy: energy.mean,
                    peak_energy: energy.peak,
                    frame_count: self.frame_count,
                };
                self.frame_count += 1;

                let [primary, secondary] = compositor.mouth_names();
                let prior = MouthWeights {
                    primary: store.get(primary),
                    secondary: store.get(secondary),
                };
                let writes = compositor.compose(&frame, self.tag, prior);
                trace!(
                    chunk_index = self.index,
                    frame = frame.frame_count,
                    mean = frame.mean_energy,
                    peak = frame.peak_energy,
                    "analysis frame"
                );
                for write in writes {
                    store.set(&write.name, write.weight);
                }
                TickStatus::Active
            }
            ChunkState::Ended => match self.ended_at {
                Some(ended_at) => Self::teardown_status(ended_at, now, config.end_teardown_delay()),
                None => TickStatus::Finished,
            },
            ChunkState::Cancelled => TickStatus::Finished,
        }
    }

    fn load_expired(&self, now: Instant, config: &PlaybackConfig) -> bool {
        now.saturating_duration_since(self.created_at) >= config.load_timeout()
    }

    /// Error describing a load that missed its deadline.
    pub fn timeout_error(&self, config: &PlaybackConfig) -> LipSyncError {
        LipSyncError::Timeout(format!(
            "chunk {} audio not ready after {} ms",
            self.index, config.load_timeout_ms
        ))
    }

    fn teardown_status(ended_at: Instant, now: Instant, delay: Duration) -> TickStatus {
        if now.saturating_duration_since(ended_at) >= delay {
            TickStatus::Finished
        } else {
            TickStatus::Active
        }
    }

    /// Any state → `Cancelled`: stop audio, drop the analyser, cancel the load task.
    pub fn cancel(&mut self) {
        if self.state == ChunkState::Cancelled {
            return;
        }
        self.cancel.cancel();
        self.release();
        self.state = ChunkState::Cancelled;
        debug!(
            chunk_index = self.index,
            generation = self.generation,
            "chunk cancelled"
        );
    }

    fn release(&mut self) {
        if let Some(mut playing) = self.playing.take() {
            playing.handle.stop();
        }
    }
}

impl Drop for ChunkUnit {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.release();
    }
}
