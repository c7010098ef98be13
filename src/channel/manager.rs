//! Control channel manager: WebSocket connection to the speech backend.
//!
//! [`ControlChannel::run`] owns the socket. It reconnects after a fixed delay
//! whenever the connection drops, announces itself with `vrmConnected` on
//! every successful connect, and sends a heartbeat while connected. Inbound
//! frames are parsed and forwarded in arrival order as [`ControlEvent`]s.
//! Outbound messages are queued through a [`ChannelHandle`]; anything queued
//! while disconnected is dropped on the next connect.

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{InboundMessage, OutboundMessage, decode_inbound, encode_outbound};
use crate::config::ChannelConfig;
use crate::error::{LipSyncError, Result};

/// Connection status published by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events delivered to the session runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// A connection was established and `vrmConnected` was sent.
    Connected,
    /// A parsed inbound message.
    Message(InboundMessage),
    /// An established connection was lost.
    Disconnected,
}

/// Cloneable handle for sending messages and observing connection state.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl ChannelHandle {
    /// Queue a message for the backend.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Channel`] once the manager has stopped.
    pub fn send(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .map_err(|e| LipSyncError::Channel(format!("control channel stopped: {e}")))
    }

    /// Sender half for components that only emit notifications.
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Background connection manager. Drive it with [`ControlChannel::run`].
pub struct ControlChannel {
    config: ChannelConfig,
    events: mpsc::Sender<ControlEvent>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Create a control channel manager, its handle, and the event stream it feeds.
pub fn control_channel(
    config: ChannelConfig,
) -> (ControlChannel, ChannelHandle, mpsc::Receiver<ControlEvent>) {
    let (events, events_rx) = mpsc::channel(config.event_capacity.max(1));
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let manager = ControlChannel {
        config,
        events,
        outbound_rx,
        state_tx,
    };
    let handle = ChannelHandle {
        outbound,
        state: state_rx,
    };
    (manager, handle, events_rx)
}

/// Why a single connection attempt ended.
enum SessionEnd {
    /// Shutdown requested, or nobody is listening for events any more.
    Stopped,
    /// Connect failed or an established connection dropped.
    Lost(LipSyncError),
}

impl ControlChannel {
    /// Connect and reconnect until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(url = %self.config.url, "control channel starting");

        loop {
            self.publish(ConnectionState::Connecting);
            let end = self.connect_once(&cancel).await;

            let was_connected = self.state() == ConnectionState::Connected;
            self.publish(ConnectionState::Disconnected);

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Lost(e) => {
                    if was_connected {
                        warn!("control channel connection lost: {e}");
                        if self.events.send(ControlEvent::Disconnected).await.is_err() {
                            break;
                        }
                    } else {
                        debug!("control channel connect failed: {e}");
                    }
                }
            }

            let delay = self.config.reconnect_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("control channel stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// One connection: connect, announce, then pump frames until it ends.
    async fn connect_once(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let connect = connect_async(self.config.url.as_str());
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Stopped,
            result = connect => match result {
                Ok((ws_stream, _response)) => ws_stream,
                Err(e) => {
                    return SessionEnd::Lost(LipSyncError::Transport(format!(
                        "connect {}: {e}",
                        self.config.url
                    )));
                }
            },
        };
        let (mut write, mut read) = ws_stream.split();

        let mut stale = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "dropped messages queued while disconnected");
        }

        if let Err(e) = send_message(&mut write, &OutboundMessage::connected()).await {
            return SessionEnd::Lost(e);
        }
        self.publish(ConnectionState::Connected);
        info!(url = %self.config.url, "control channel connected");
        if self.events.send(ControlEvent::Connected).await.is_err() {
            return SessionEnd::Stopped;
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        // Skip the first immediate tick.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode_inbound(&text) {
                        Ok(msg) => {
                            if self.events.send(ControlEvent::Message(msg)).await.is_err() {
                                return SessionEnd::Stopped;
                            }
                        }
                        Err(e) => warn!("dropping malformed control message: {e}"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost(LipSyncError::Transport(
                            "connection closed by server".into(),
                        ));
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost(LipSyncError::Transport(format!("read: {e}")));
                    }
                    Some(Ok(Message::Binary(_))) => debug!("ignoring binary control frame"),
                    // Ping/Pong frames are answered by tungstenite.
                    Some(Ok(_)) => {}
                },
                Some(msg) = self.outbound_rx.recv() => {
                    if let Err(e) = send_message(&mut write, &msg).await {
                        return SessionEnd::Lost(e);
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = send_message(&mut write, &OutboundMessage::Ping {}).await {
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }
}

async fn send_message<S>(write: &mut S, msg: &OutboundMessage) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = encode_outbound(msg)?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| LipSyncError::Transport(format!("send: {e}")))
}
