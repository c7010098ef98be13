//! Avatar lip-sync: speech-driven mouth and expression animation.
//!
//! A speech backend streams TTS audio to this crate chunk by chunk over a
//! WebSocket control channel. Each chunk is decoded, played, and analysed in
//! real time; the resulting energy drives mouth-shape weights on an avatar
//! while the chunk's expression tag drives its emotional expression.
//!
//! # Architecture
//!
//! - **Control channel** ([`channel`]): connection manager with reconnect and
//!   heartbeat, translating JSON frames into [`channel::ControlEvent`]s
//! - **Session runtime** ([`session`]): a single task owning the session
//!   state machine, the active chunk units, and every weight write
//! - **Chunk units** ([`chunk`]): one chunk's load → play → analyse → end cycle
//! - **Audio** ([`audio`]): data-URL decoding via `symphonia`, playback via
//!   `cpal`, spectrum analysis via `rustfft`
//! - **Compositor** ([`compositor`]): analysis frame + expression tag → weights
//! - **Avatar** ([`avatar`]): the capability seam to the renderer

pub mod app_dirs;
pub mod audio;
pub mod avatar;
pub mod channel;
pub mod chunk;
pub mod compositor;
pub mod config;
pub mod error;
pub mod expression;
pub mod logging;
pub mod session;

pub use avatar::{AvatarCapability, ExpressionStore, InMemoryAvatar, JsonLinesAvatar};
pub use channel::{ChannelHandle, ConnectionState, ControlChannel, ControlEvent, control_channel};
pub use config::LipSyncConfig;
pub use error::{LipSyncError, Result};
pub use expression::ExpressionTag;
pub use session::{SessionController, SessionRuntime, SessionState};
