//! Configuration types for the lip-sync subsystem.
//!
//! The compositor constants (trigger thresholds, gains, decay steps) were tuned
//! by ear. They are exposed as configuration defaults rather than derived.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LipSyncError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Control channel (WebSocket) settings.
    pub channel: ChannelConfig,
    /// Audio decode, playback and analysis settings.
    pub playback: PlaybackConfig,
    /// Expression compositor tuning.
    pub compositor: CompositorConfig,
    /// Session controller settings.
    pub session: SessionConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Control channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the speech backend.
    pub url: String,
    /// Interval between heartbeat messages while connected.
    pub heartbeat_interval_ms: u64,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Capacity of the inbound event queue towards the session runtime.
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/ws".to_owned(),
            heartbeat_interval_ms: 10_000,
            reconnect_delay_ms: 3_000,
            event_capacity: 256,
        }
    }
}

impl ChannelConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Where decoded chunk audio is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// System output device via cpal.
    #[default]
    Device,
    /// No sound; playback position follows the wall clock. Used headless and in tests.
    Silent,
}

/// Audio playback and analyser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output backend.
    pub output: OutputKind,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Upper bound on decoding a chunk payload.
    pub load_timeout_ms: u64,
    /// Delay between natural end of playback and unit teardown.
    pub end_teardown_delay_ms: u64,
    /// Analyser FFT size (power of two).
    pub fft_size: usize,
    /// Exponential smoothing applied to magnitudes between frames (0..1).
    pub smoothing_time_constant: f32,
    /// Magnitude in dB mapped to byte value 0.
    pub min_decibels: f32,
    /// Magnitude in dB mapped to byte value 255.
    pub max_decibels: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output: OutputKind::Device,
            output_device: None,
            load_timeout_ms: 5_000,
            end_teardown_delay_ms: 100,
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl PlaybackConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn end_teardown_delay(&self) -> Duration {
        Duration::from_millis(self.end_teardown_delay_ms)
    }
}

/// Expression compositor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Scheduler ticks per second.
    pub tick_rate_hz: u32,
    /// `intensity = meanEnergy / intensity_divisor`, clamped to [0, 1].
    pub intensity_divisor: f32,
    /// Mouth opens when intensity exceeds this...
    pub intensity_threshold: f32,
    /// ...or when peak energy exceeds this.
    pub peak_threshold: f32,
    /// Gain from intensity to the primary mouth weight.
    pub primary_gain: f32,
    /// Lower clamp of the primary mouth weight while speaking.
    pub primary_min: f32,
    /// Upper clamp of the primary mouth weight while speaking.
    pub primary_max: f32,
    /// Gain from intensity to the secondary mouth weight.
    pub secondary_gain: f32,
    /// Amplitude of the sinusoidal micro-variation on the secondary weight.
    pub oscillation_amplitude: f32,
    /// Radians per frame of the micro-variation.
    pub oscillation_rate: f32,
    /// Per-tick decay of the primary mouth weight during silence.
    pub primary_decay: f32,
    /// Per-tick decay of the secondary mouth weight during silence.
    pub secondary_decay: f32,
    /// Frames the `surprised` tag stays fully on.
    pub surprised_frames: u64,
    /// Total frames of the blink envelope.
    pub blink_frames: u64,
    /// Expression name of the primary mouth shape.
    pub primary_mouth: String,
    /// Expression name of the secondary mouth shape.
    pub secondary_mouth: String,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            intensity_divisor: 4.0,
            intensity_threshold: 0.02,
            peak_threshold: 5.0,
            primary_gain: 1.8,
            primary_min: 0.1,
            primary_max: 0.7,
            secondary_gain: 0.3,
            oscillation_amplitude: 0.1,
            oscillation_rate: 0.1,
            primary_decay: 0.05,
            secondary_decay: 0.03,
            surprised_frames: 60,
            blink_frames: 120,
            primary_mouth: "aa".to_owned(),
            secondary_mouth: "ih".to_owned(),
        }
    }
}

impl CompositorConfig {
    /// Duration of one scheduler tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

/// Session controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay before mouth weights are reset once the last chunk is gone.
    pub grace_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 200,
        }
    }
}

impl SessionConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily rolling log files (None = stderr only).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            log_dir: None,
        }
    }
}

impl LipSyncConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LipSyncError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LipSyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Reject values the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.channel.url)
            .map_err(|e| LipSyncError::Config(format!("channel.url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LipSyncError::Config(format!(
                "channel.url: unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if self.compositor.tick_rate_hz == 0 {
            return Err(LipSyncError::Config(
                "compositor.tick_rate_hz must be positive".into(),
            ));
        }
        if self.compositor.intensity_divisor <= 0.0 {
            return Err(LipSyncError::Config(
                "compositor.intensity_divisor must be positive".into(),
            ));
        }
        if self.compositor.primary_min > self.compositor.primary_max {
            return Err(LipSyncError::Config(
                "compositor.primary_min exceeds primary_max".into(),
            ));
        }
        if self.compositor.primary_decay <= 0.0 || self.compositor.secondary_decay <= 0.0 {
            return Err(LipSyncError::Config(
                "compositor decay steps must be positive".into(),
            ));
        }
        if self.playback.fft_size < 32 || !self.playback.fft_size.is_power_of_two() {
            return Err(LipSyncError::Config(format!(
                "playback.fft_size must be a power of two >= 32, got {}",
                self.playback.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.playback.smoothing_time_constant) {
            return Err(LipSyncError::Config(
                "playback.smoothing_time_constant must be in [0, 1)".into(),
            ));
        }
        if self.playback.min_decibels >= self.playback.max_decibels {
            return Err(LipSyncError::Config(
                "playback.min_decibels must be below max_decibels".into(),
            ));
        }
        Ok(())
    }
}
