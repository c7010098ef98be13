//! Session runtime task: the single owner of the [`SessionController`].
//!
//! One tokio task multiplexes control events, finished audio loads and the
//! scheduler tick, so every weight write happens on this task in tick order.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller::{LoadOutcome, LoadRequest, SessionController};
use crate::audio::decode::decode_data_url;
use crate::audio::output::AudioOutput;
use crate::avatar::{AvatarCapability, ExpressionStore};
use crate::channel::manager::ControlEvent;
use crate::channel::protocol::OutboundMessage;
use crate::compositor::Compositor;
use crate::config::LipSyncConfig;
use crate::error::LipSyncError;

pub struct SessionRuntime {
    controller: SessionController,
    tick_interval: Duration,
}

impl SessionRuntime {
    pub fn new(
        config: &LipSyncConfig,
        avatar: Box<dyn AvatarCapability>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let controller = SessionController::new(
            config.session.clone(),
            config.playback.clone(),
            Compositor::new(config.compositor.clone()),
            ExpressionStore::new(avatar),
            output,
        );
        Self::with_controller(controller, config.compositor.tick_interval())
    }

    pub fn with_controller(controller: SessionController, tick_interval: Duration) -> Self {
        Self {
            controller,
            tick_interval,
        }
    }

    /// Run until `cancel` fires or the event stream closes.
    ///
    /// Returns the controller after cancelling every active chunk, so callers
    /// can inspect the final state.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<ControlEvent>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        cancel: CancellationToken,
    ) -> SessionController {
        let Self {
            mut controller,
            tick_interval,
        } = self;

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut loads: JoinSet<Option<LoadOutcome>> = JoinSet::new();

        info!(
            tick_ms = tick_interval.as_millis() as u64,
            "session runtime started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(ControlEvent::Message(msg)) => {
                        controller.handle_message(msg, Instant::now());
                    }
                    Some(ControlEvent::Connected) => debug!("control channel connected"),
                    Some(ControlEvent::Disconnected) => controller.hard_reset(),
                    None => {
                        debug!("control event stream closed");
                        break;
                    }
                },
                Some(joined) = loads.join_next(), if !loads.is_empty() => match joined {
                    Ok(Some(outcome)) => controller.on_load_complete(outcome, Instant::now()),
                    Ok(None) => {}
                    Err(e) => warn!("chunk load task failed: {e}"),
                },
                _ = ticker.tick() => controller.tick(Instant::now()),
            }

            for request in controller.take_load_requests() {
                spawn_load(&mut loads, request);
            }
            for msg in controller.take_outbound() {
                if outbound.send(msg).is_err() {
                    debug!("outbound channel closed, dropping notification");
                }
            }
        }

        controller.hard_reset();
        loads.abort_all();
        info!("session runtime stopped");
        controller
    }
}

/// Decode a chunk's audio off the runtime task, abandoning it on cancellation.
fn spawn_load(loads: &mut JoinSet<Option<LoadOutcome>>, request: LoadRequest) {
    let LoadRequest {
        chunk_index,
        generation,
        audio_data_url,
        cancel,
    } = request;

    loads.spawn(async move {
        let decode = tokio::task::spawn_blocking(move || decode_data_url(&audio_data_url));
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(chunk_index, generation, "chunk load cancelled");
                None
            }
            joined = decode => {
                let result = joined.unwrap_or_else(|e| {
                    Err(LipSyncError::Decode(format!("decode task panicked: {e}")))
                });
                Some(LoadOutcome {
                    chunk_index,
                    generation,
                    result,
                })
            }
        }
    });
}
