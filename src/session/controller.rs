//! Session controller: owns the active chunk units and the expression store.
//!
//! The controller is synchronous and clock-explicit: every entry point takes
//! `now`. The runtime task feeds it control messages, load outcomes and
//! scheduler ticks; tests drive it directly.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::decode::DecodedAudio;
use crate::audio::output::AudioOutput;
use crate::avatar::ExpressionStore;
use crate::channel::protocol::{InboundMessage, OutboundMessage, first_expression};
use crate::chunk::{ChunkState, ChunkUnit, TickStatus};
use crate::compositor::Compositor;
use crate::config::{PlaybackConfig, SessionConfig};
use crate::error::{LipSyncError, Result};
use crate::expression::ExpressionTag;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No speech turn in progress.
    Idle,
    /// Chunks are being received and played.
    Active,
    /// The backend sent every chunk; waiting for the remaining units to finish.
    Draining,
}

/// Audio payload the runtime must decode for a freshly created unit.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub chunk_index: u32,
    pub generation: u64,
    pub audio_data_url: String,
    pub cancel: CancellationToken,
}

/// Result of a [`LoadRequest`], reported back to the controller.
#[derive(Debug)]
pub struct LoadOutcome {
    pub chunk_index: u32,
    pub generation: u64,
    pub result: Result<DecodedAudio>,
}

pub struct SessionController {
    session_config: SessionConfig,
    playback_config: PlaybackConfig,
    compositor: Compositor,
    store: ExpressionStore,
    output: Box<dyn AudioOutput>,
    state: SessionState,
    session_id: Option<Uuid>,
    units: BTreeMap<u32, ChunkUnit>,
    next_generation: u64,
    reset_deadline: Option<Instant>,
    pending_loads: Vec<LoadRequest>,
    outbound: Vec<OutboundMessage>,
}

impl SessionController {
    pub fn new(
        session_config: SessionConfig,
        playback_config: PlaybackConfig,
        compositor: Compositor,
        store: ExpressionStore,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        Self {
            session_config,
            playback_config,
            compositor,
            store,
            output,
            state: SessionState::Idle,
            session_id: None,
            units: BTreeMap::new(),
            next_generation: 1,
            reset_deadline: None,
            pending_loads: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Indices of units currently owned, ascending.
    pub fn active_chunks(&self) -> Vec<u32> {
        self.units.keys().copied().collect()
    }

    pub fn chunk_state(&self, chunk_index: u32) -> Option<ChunkState> {
        self.units.get(&chunk_index).map(ChunkUnit::state)
    }

    pub fn store(&self) -> &ExpressionStore {
        &self.store
    }

    /// Drain the loads requested since the last call.
    pub fn take_load_requests(&mut self) -> Vec<LoadRequest> {
        std::mem::take(&mut self.pending_loads)
    }

    /// Drain the notifications produced since the last call.
    pub fn take_outbound(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbound)
    }

    /// Apply one control message, in arrival order.
    pub fn handle_message(&mut self, msg: InboundMessage, now: Instant) {
        debug!(kind = msg.kind(), state = ?self.state, "control message");
        match msg {
            InboundMessage::TtsStarted {} => self.start_session(),
            InboundMessage::StartSpeaking {
                chunk_index,
                audio_data_url,
                expressions,
            } => {
                let tag = first_expression(&expressions);
                if tag.is_none() && expressions.iter().flatten().next().is_some() {
                    debug!(chunk_index, ?expressions, "ignoring unknown expression tags");
                }
                self.begin_chunk(chunk_index, audio_data_url, tag, now);
            }
            InboundMessage::ChunkEnded { chunk_index } => self.end_chunk(chunk_index, now),
            InboundMessage::StopSpeaking {} => self.stop_session(),
            InboundMessage::AllChunksCompleted {} => self.drain_session(),
        }
    }

    /// Transport loss: cancel everything and return to idle without notifying.
    pub fn hard_reset(&mut self) {
        if self.state != SessionState::Idle || !self.units.is_empty() {
            warn!(
                session_id = ?self.session_id,
                chunks = self.units.len(),
                "hard reset: cancelling all chunks"
            );
        }
        self.cancel_all();
        self.reset_weights();
        self.state = SessionState::Idle;
        self.session_id = None;
    }

    /// Report the result of a load task.
    pub fn on_load_complete(&mut self, outcome: LoadOutcome, now: Instant) {
        let LoadOutcome {
            chunk_index,
            generation,
            result,
        } = outcome;

        let live = self.units.get(&chunk_index).is_some_and(|unit| {
            unit.generation() == generation && unit.state() == ChunkState::Loading
        });
        if !live {
            debug!(chunk_index, generation, "discarding load result for a superseded chunk");
            return;
        }

        let started = match result {
            Ok(audio) => match self.units.get_mut(&chunk_index) {
                Some(unit) => {
                    unit.begin_playback(audio, self.output.as_ref(), &self.playback_config, now)
                }
                None => return,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = started {
            self.fail_unit(chunk_index, &e, now);
        }
    }

    /// Drop a unit whose load failed (decode error, timeout, output error).
    fn fail_unit(&mut self, chunk_index: u32, error: &LipSyncError, now: Instant) {
        warn!(chunk_index, "chunk load failed, dropping chunk: {error}");
        self.remove_unit(chunk_index, now);
    }

    /// One scheduler tick: drive every unit, then apply pending resets.
    pub fn tick(&mut self, now: Instant) {
        let mut finished = Vec::new();
        let mut failed = Vec::new();
        for (index, unit) in &mut self.units {
            match unit.tick(
                now,
                &self.compositor,
                &mut self.store,
                &self.playback_config,
            ) {
                TickStatus::Active => {}
                TickStatus::Finished => finished.push(*index),
                TickStatus::TimedOut => {
                    failed.push((*index, unit.timeout_error(&self.playback_config)));
                }
            }
        }
        for index in finished {
            self.remove_unit(index, now);
        }
        for (index, error) in failed {
            self.fail_unit(index, &error, now);
        }

        if let Some(deadline) = self.reset_deadline
            && now >= deadline
        {
            self.reset_deadline = None;
            if self.units.is_empty() {
                debug!("grace delay elapsed, resetting expression weights");
                self.reset_weights();
            }
        }

        self.store.end_frame();
    }

    fn start_session(&mut self) {
        self.cancel_all();
        self.reset_weights();
        let id = Uuid::new_v4();
        self.session_id = Some(id);
        self.state = SessionState::Active;
        info!(session_id = %id, "speech session started");
    }

    fn ensure_session(&mut self) {
        if self.state == SessionState::Idle {
            let id = Uuid::new_v4();
            self.session_id = Some(id);
            self.state = SessionState::Active;
            debug!(session_id = %id, "chunk arrived without ttsStarted, opening session");
        }
    }

    fn begin_chunk(
        &mut self,
        chunk_index: u32,
        audio_data_url: String,
        tag: Option<ExpressionTag>,
        now: Instant,
    ) {
        self.ensure_session();
        self.reset_deadline = None;

        if let Some(mut previous) = self.units.remove(&chunk_index) {
            debug!(
                chunk_index,
                generation = previous.generation(),
                "replacing chunk with the same index"
            );
            previous.cancel();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let unit = ChunkUnit::new(chunk_index, generation, tag, now);
        self.pending_loads.push(LoadRequest {
            chunk_index,
            generation,
            audio_data_url,
            cancel: unit.cancel_token(),
        });
        self.units.insert(chunk_index, unit);
        debug!(chunk_index, generation, tag = ?tag, "chunk loading");
    }

    fn end_chunk(&mut self, chunk_index: u32, now: Instant) {
        if self.units.contains_key(&chunk_index) {
            self.remove_unit(chunk_index, now);
        } else {
            debug!(chunk_index, "chunkEnded for unknown chunk, ignoring");
        }
    }

    fn stop_session(&mut self) {
        let was_running = self.state != SessionState::Idle;
        self.cancel_all();
        if was_running {
            self.complete_session();
        } else {
            self.reset_weights();
        }
    }

    fn drain_session(&mut self) {
        match self.state {
            SessionState::Idle => debug!("allChunksCompleted with no session, ignoring"),
            SessionState::Active | SessionState::Draining => {
                if self.units.is_empty() {
                    self.complete_session();
                } else {
                    debug!(chunks = self.units.len(), "session draining");
                    self.state = SessionState::Draining;
                }
            }
        }
    }

    fn remove_unit(&mut self, chunk_index: u32, now: Instant) {
        let Some(mut unit) = self.units.remove(&chunk_index) else {
            return;
        };
        unit.cancel();
        if !self.units.is_empty() {
            return;
        }
        match self.state {
            SessionState::Draining => self.complete_session(),
            SessionState::Active => {
                self.reset_deadline = Some(now + self.session_config.grace_delay());
            }
            SessionState::Idle => {}
        }
    }

    fn complete_session(&mut self) {
        self.cancel_all();
        self.reset_weights();
        info!(session_id = ?self.session_id, "speech session complete");
        self.state = SessionState::Idle;
        self.session_id = None;
        self.outbound.push(OutboundMessage::animation_complete());
    }

    fn cancel_all(&mut self) {
        for unit in self.units.values_mut() {
            unit.cancel();
        }
        self.units.clear();
        self.pending_loads.clear();
        self.reset_deadline = None;
    }

    fn reset_weights(&mut self) {
        self.store.reset_all(self.compositor.all_names());
    }
}
