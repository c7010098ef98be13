//! Control channel wire messages (JSON, tagged by `type`).

use serde::{Deserialize, Serialize};

use crate::error::{LipSyncError, Result};
use crate::expression::ExpressionTag;

/// Messages received from the speech backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    /// A new speech turn begins.
    TtsStarted {},
    /// Begin (or replace) the chunk at `chunk_index`.
    StartSpeaking {
        chunk_index: u32,
        audio_data_url: String,
        #[serde(default)]
        expressions: Vec<Option<String>>,
    },
    /// The chunk at `chunk_index` is over.
    ChunkEnded { chunk_index: u32 },
    /// Hard stop: cancel everything.
    StopSpeaking {},
    /// The backend has sent every chunk of this turn.
    AllChunksCompleted {},
}

impl InboundMessage {
    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TtsStarted {} => "ttsStarted",
            Self::StartSpeaking { .. } => "startSpeaking",
            Self::ChunkEnded { .. } => "chunkEnded",
            Self::StopSpeaking {} => "stopSpeaking",
            Self::AllChunksCompleted {} => "allChunksCompleted",
        }
    }
}

/// First recognised expression tag in a `startSpeaking` expression list.
pub fn first_expression(expressions: &[Option<String>]) -> Option<ExpressionTag> {
    expressions
        .iter()
        .flatten()
        .find_map(|raw| ExpressionTag::parse(raw))
}

/// Messages sent to the speech backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Sent once per successful connection.
    VrmConnected { status: String },
    /// A speech session has fully drained.
    AnimationComplete { status: String },
    /// Keep-alive.
    Ping {},
}

impl OutboundMessage {
    pub fn connected() -> Self {
        Self::VrmConnected {
            status: "connected".to_owned(),
        }
    }

    pub fn animation_complete() -> Self {
        Self::AnimationComplete {
            status: "completed".to_owned(),
        }
    }
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// Returns [`LipSyncError::Protocol`] for anything that is not a known message.
pub fn decode_inbound(text: &str) -> Result<InboundMessage> {
    serde_json::from_str(text).map_err(|e| LipSyncError::Protocol(e.to_string()))
}

/// Serialize one outbound message.
///
/// # Errors
///
/// Returns [`LipSyncError::Protocol`] if serialization fails.
pub fn encode_outbound(msg: &OutboundMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| LipSyncError::Protocol(e.to_string()))
}
