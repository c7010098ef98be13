//! Playback outputs for chunk audio.
//!
//! [`DeviceOutput`] shares one cpal output device between all concurrently
//! playing chunks. The device and every per-chunk stream live on a dedicated
//! audio thread (cpal streams are not `Send`); the session runtime talks to it
//! through a command channel. A chunk whose stream cannot be opened falls back
//! to clock-driven timing so its animation still runs for the audio's length.
//! [`SilentOutput`] plays nothing and derives the
//! playback position from the clock, which keeps headless runs and tests
//! deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::decode::DecodedAudio;
use crate::config::{OutputKind, PlaybackConfig};
use crate::error::{LipSyncError, Result};

/// Starts playback of decoded chunk audio.
pub trait AudioOutput: Send {
    /// Begin playing `audio` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Audio`] if the output can no longer accept streams.
    fn start(&self, audio: Arc<DecodedAudio>, now: Instant) -> Result<Box<dyn PlaybackHandle>>;
}

/// A single chunk's playing stream.
pub trait PlaybackHandle: Send {
    /// Index of the sample currently being heard.
    fn position(&self, now: Instant) -> usize;

    /// Whether playback has run to completion (or was stopped).
    fn is_finished(&self, now: Instant) -> bool;

    /// Stop playback and release the stream. Idempotent.
    fn stop(&mut self);
}

/// Build the output selected in `config`.
///
/// # Errors
///
/// Returns an error if the device output cannot be opened.
pub fn open_output(config: &PlaybackConfig) -> Result<Box<dyn AudioOutput>> {
    match config.output {
        OutputKind::Device => Ok(Box::new(DeviceOutput::open(
            config.output_device.clone(),
        )?)),
        OutputKind::Silent => Ok(Box::new(SilentOutput)),
    }
}

// ---------------------------------------------------------------------------
// Silent (clock-driven) output
// ---------------------------------------------------------------------------

/// Output that renders nothing; position follows elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn start(&self, audio: Arc<DecodedAudio>, now: Instant) -> Result<Box<dyn PlaybackHandle>> {
        Ok(Box::new(ClockPlayback {
            started_at: now,
            len: audio.samples.len(),
            sample_rate: audio.sample_rate,
            stopped: false,
        }))
    }
}

struct ClockPlayback {
    started_at: Instant,
    len: usize,
    sample_rate: u32,
    stopped: bool,
}

impl PlaybackHandle for ClockPlayback {
    fn position(&self, now: Instant) -> usize {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let pos = (elapsed * f64::from(self.sample_rate)) as usize;
        pos.min(self.len)
    }

    fn is_finished(&self, now: Instant) -> bool {
        self.stopped || self.position(now) >= self.len
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

// ---------------------------------------------------------------------------
// Device output (shared cpal device on an audio thread)
// ---------------------------------------------------------------------------

enum DeviceCommand {
    Play {
        id: u64,
        audio: Arc<DecodedAudio>,
        progress: Arc<StreamProgress>,
    },
    Stop {
        id: u64,
    },
}

#[derive(Default)]
struct StreamProgress {
    position: AtomicUsize,
    /// Set once the device has consumed the buffer holding the last sample.
    finished: AtomicBool,
    /// The stream could not be opened; timing comes from the clock instead.
    failed: AtomicBool,
}

/// Output to the system speakers, one cpal stream per chunk.
pub struct DeviceOutput {
    commands: Sender<DeviceCommand>,
    next_id: AtomicU64,
}

impl DeviceOutput {
    /// Open the named output device (or the system default) on a new audio thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be found or the thread cannot start.
    pub fn open(device_name: Option<String>) -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        std::thread::Builder::new()
            .name("lipsync-audio".into())
            .spawn(move || {
                let device = match select_device(device_name.as_deref()) {
                    Ok(d) => {
                        let _ = ready_tx.send(Ok(()));
                        d
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                audio_thread(&device, &command_rx);
            })?;

        ready_rx
            .recv()
            .map_err(|e| LipSyncError::Audio(format!("audio thread exited during startup: {e}")))??;

        Ok(Self {
            commands,
            next_id: AtomicU64::new(1),
        })
    }
}

impl AudioOutput for DeviceOutput {
    fn start(&self, audio: Arc<DecodedAudio>, now: Instant) -> Result<Box<dyn PlaybackHandle>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let progress = Arc::new(StreamProgress::default());
        let clock = ClockPlayback {
            started_at: now,
            len: audio.samples.len(),
            sample_rate: audio.sample_rate,
            stopped: false,
        };
        if audio.is_empty() {
            progress.finished.store(true, Ordering::Release);
        } else {
            self.commands
                .send(DeviceCommand::Play {
                    id,
                    audio,
                    progress: Arc::clone(&progress),
                })
                .map_err(|e| LipSyncError::Audio(format!("audio thread is gone: {e}")))?;
        }
        Ok(Box::new(DevicePlayback {
            id,
            progress,
            clock,
            commands: self.commands.clone(),
            stopped: false,
        }))
    }
}

struct DevicePlayback {
    id: u64,
    progress: Arc<StreamProgress>,
    /// Timing used when the device stream failed to open.
    clock: ClockPlayback,
    commands: Sender<DeviceCommand>,
    stopped: bool,
}

impl DevicePlayback {
    fn stream_failed(&self) -> bool {
        self.progress.failed.load(Ordering::Acquire)
    }
}

impl PlaybackHandle for DevicePlayback {
    fn position(&self, now: Instant) -> usize {
        if self.stream_failed() {
            return self.clock.position(now);
        }
        self.progress.position.load(Ordering::Acquire)
    }

    fn is_finished(&self, now: Instant) -> bool {
        if self.stopped {
            return true;
        }
        if self.stream_failed() {
            return self.clock.is_finished(now);
        }
        self.progress.finished.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        // If the thread is gone the stream is already gone with it.
        let _ = self.commands.send(DeviceCommand::Stop { id: self.id });
    }
}

impl Drop for DevicePlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn select_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    let device = if let Some(name) = name {
        host.output_devices()
            .map_err(|e| LipSyncError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| LipSyncError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| LipSyncError::Audio("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");
    Ok(device)
}

fn audio_thread(device: &cpal::Device, commands: &Receiver<DeviceCommand>) {
    let mut streams: HashMap<u64, (cpal::Stream, Arc<StreamProgress>)> = HashMap::new();

    // Streams stay open until their handle sends Stop, so the device can
    // drain the final buffer after `finished` is raised.
    while let Ok(command) = commands.recv() {
        match command {
            DeviceCommand::Play {
                id,
                audio,
                progress,
            } => match build_stream(device, audio, Arc::clone(&progress)) {
                Ok(stream) => {
                    streams.insert(id, (stream, progress));
                }
                Err(e) => {
                    warn!(stream_id = id, "failed to start chunk stream, timing from clock: {e}");
                    progress.failed.store(true, Ordering::Release);
                }
            },
            DeviceCommand::Stop { id } => {
                if streams.remove(&id).is_some() {
                    debug!(stream_id = id, "chunk stream stopped");
                }
            }
        }
    }

    debug!("audio thread exiting");
}

fn build_stream(
    device: &cpal::Device,
    audio: Arc<DecodedAudio>,
    progress: Arc<StreamProgress>,
) -> Result<cpal::Stream> {
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: audio.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                fill_buffer(data, &audio.samples, &progress);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| LipSyncError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| LipSyncError::Audio(format!("failed to start output stream: {e}")))?;

    Ok(stream)
}

/// Copy the next samples into a device buffer, padding with silence.
///
/// The device asks for the next buffer only after the previous one has been
/// handed over, so `finished` is raised on the first request that starts past
/// the end rather than on the one that writes the last sample.
fn fill_buffer(data: &mut [f32], samples: &[f32], progress: &StreamProgress) {
    let start = progress.position.load(Ordering::Relaxed);
    if start >= samples.len() {
        data.fill(0.0);
        progress.finished.store(true, Ordering::Release);
        return;
    }

    let n = data.len().min(samples.len() - start);
    data[..n].copy_from_slice(&samples[start..start + n]);
    data[n..].fill(0.0);
    progress.position.store(start + n, Ordering::Release);
}
