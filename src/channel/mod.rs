//! Control channel to the speech backend: wire protocol and connection manager.

pub mod manager;
pub mod protocol;

pub use manager::{ChannelHandle, ConnectionState, ControlChannel, ControlEvent, control_channel};
pub use protocol::{InboundMessage, OutboundMessage};
