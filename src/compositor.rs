//! Expression compositor: analysis frame + expression tag → weight writes.
//!
//! Energy-only lip sync flickers. Two rules keep the mouth steady during quiet
//! passages: movement needs either sustained energy or a transient peak to
//! trigger, and silence decays the mouth by fixed steps instead of snapping it
//! shut.

use crate::audio::analyzer::AnalysisFrame;
use crate::config::CompositorConfig;
use crate::expression::{ExpressionTag, TagEnvelope};

/// One named weight write produced for a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightWrite {
    pub name: String,
    pub weight: f32,
}

impl WeightWrite {
    fn new(name: impl Into<String>, weight: f32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Mouth weights as they stood before this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MouthWeights {
    pub primary: f32,
    pub secondary: f32,
}

/// Stateless mapping from per-tick analysis to avatar weight writes.
#[derive(Debug, Clone)]
pub struct Compositor {
    config: CompositorConfig,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Names of the mouth-shape weights this compositor drives.
    pub fn mouth_names(&self) -> [&str; 2] {
        [&self.config.primary_mouth, &self.config.secondary_mouth]
    }

    /// Every name the compositor can ever write.
    pub fn all_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mouth_names().to_vec();
        names.extend(ExpressionTag::ALL.iter().map(|tag| tag.as_str()));
        names
    }

    /// Compute the weight writes for one tick of one chunk.
    pub fn compose(
        &self,
        frame: &AnalysisFrame,
        tag: Option<ExpressionTag>,
        prior: MouthWeights,
    ) -> Vec<WeightWrite> {
        let mut writes = Vec::with_capacity(3);
        if let Some(tag) = tag {
            writes.push(WeightWrite::new(
                tag.as_str(),
                self.tag_weight(tag, frame.frame_count),
            ));
        }
        let mouth = self.mouth_weights(frame, prior);
        writes.push(WeightWrite::new(&self.config.primary_mouth, mouth.primary));
        writes.push(WeightWrite::new(
            &self.config.secondary_mouth,
            mouth.secondary,
        ));
        writes
    }

    /// Envelope value of `tag` at `frame_count`, independent of audio energy.
    pub fn tag_weight(&self, tag: ExpressionTag, frame_count: u64) -> f32 {
        match tag.envelope() {
            TagEnvelope::Sustained => 1.0,
            TagEnvelope::TimeBoxed => {
                if frame_count < self.config.surprised_frames {
                    1.0
                } else {
                    0.0
                }
            }
            TagEnvelope::Triangle => triangle(frame_count, self.config.blink_frames),
        }
    }

    /// Energy-driven mouth shape for this tick.
    pub fn mouth_weights(&self, frame: &AnalysisFrame, prior: MouthWeights) -> MouthWeights {
        let c = &self.config;
        let intensity = (frame.mean_energy / c.intensity_divisor).clamp(0.0, 1.0);

        if intensity > c.intensity_threshold || frame.peak_energy > c.peak_threshold {
            let oscillation =
                (frame.frame_count as f32 * c.oscillation_rate).sin() * c.oscillation_amplitude;
            MouthWeights {
                primary: (intensity * c.primary_gain).clamp(c.primary_min, c.primary_max),
                secondary: (intensity * c.secondary_gain + oscillation).clamp(0.0, 1.0),
            }
        } else {
            MouthWeights {
                primary: decay(prior.primary, c.primary_decay),
                secondary: decay(prior.secondary, c.secondary_decay),
            }
        }
    }
}

/// Step `value` towards 0 by `step`, landing on exactly 0.
fn decay(value: f32, step: f32) -> f32 {
    let next = value - step;
    // Float residue from repeated subtraction would otherwise cost an extra tick.
    if next <= step * 1e-3 { 0.0 } else { next }
}

/// Symmetric 0 → 1 → 0 ramp over `total` frames; 0 outside.
fn triangle(frame: u64, total: u64) -> f32 {
    if total == 0 || frame >= total {
        return 0.0;
    }
    let half = total as f32 / 2.0;
    let f = frame as f32;
    let w = if f <= half { f / half } else { (total as f32 - f) / half };
    w.clamp(0.0, 1.0)
}
