//! Chunk audio: payload decoding, playback via cpal, and spectrum analysis.

pub mod analyzer;
pub mod decode;
pub mod output;

pub use analyzer::{AnalysisFrame, SpectrumAnalyzer};
pub use decode::{DecodedAudio, decode_data_url};
pub use output::{AudioOutput, PlaybackHandle, SilentOutput, open_output};
