//! Expression tag vocabulary attached to speech chunks.

use serde::{Deserialize, Serialize};

/// Coarse mood / eye-state label carried by a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpressionTag {
    Happy,
    Angry,
    Sad,
    Neutral,
    Relaxed,
    Surprised,
    Blink,
    BlinkLeft,
    BlinkRight,
}

/// How a tag's weight evolves over the chunk's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEnvelope {
    /// Fully on for the whole playing lifetime.
    Sustained,
    /// Fully on for a fixed number of frames, then off.
    TimeBoxed,
    /// Triangular 0 → 1 → 0 ramp over a fixed number of frames.
    Triangle,
}

impl ExpressionTag {
    pub const ALL: [ExpressionTag; 9] = [
        Self::Happy,
        Self::Angry,
        Self::Sad,
        Self::Neutral,
        Self::Relaxed,
        Self::Surprised,
        Self::Blink,
        Self::BlinkLeft,
        Self::BlinkRight,
    ];

    /// Expression name written to the avatar.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
            Self::Neutral => "neutral",
            Self::Relaxed => "relaxed",
            Self::Surprised => "surprised",
            Self::Blink => "blink",
            Self::BlinkLeft => "blinkLeft",
            Self::BlinkRight => "blinkRight",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == raw.trim())
    }

    #[must_use]
    pub fn envelope(self) -> TagEnvelope {
        match self {
            Self::Happy | Self::Angry | Self::Sad | Self::Neutral | Self::Relaxed => {
                TagEnvelope::Sustained
            }
            Self::Surprised => TagEnvelope::TimeBoxed,
            Self::Blink | Self::BlinkLeft | Self::BlinkRight => TagEnvelope::Triangle,
        }
    }
}

impl std::fmt::Display for ExpressionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
