//! Shared helpers for integration tests: WAV fixtures and a scripted backend.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use avatar_lipsync::config::ChannelConfig;

pub(crate) const SAMPLE_RATE: u32 = 24_000;

/// Mono 16-bit WAV of a 220 Hz tone (or silence when `amplitude` is 0).
pub(crate) fn wav_data_url(seconds: f32, amplitude: f32) -> String {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let len = (seconds * SAMPLE_RATE as f32) as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for n in 0..len {
            let t = n as f32 / SAMPLE_RATE as f32;
            let s = amplitude * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
            writer.write_sample((s * f32::from(i16::MAX)) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(cursor.into_inner());
    format!("data:audio/wav;base64,{encoded}")
}

/// A local WebSocket endpoint standing in for the speech backend.
pub(crate) struct Backend {
    listener: TcpListener,
}

pub(crate) type Socket = WebSocketStream<TcpStream>;

impl Backend {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    /// Channel config pointing at this backend, with short test timings.
    pub(crate) fn channel_config(&self) -> ChannelConfig {
        let addr = self.listener.local_addr().unwrap();
        ChannelConfig {
            url: format!("ws://{addr}/ws"),
            heartbeat_interval_ms: 100,
            reconnect_delay_ms: 50,
            ..ChannelConfig::default()
        }
    }

    pub(crate) async fn accept(&self) -> Socket {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        accept_async(stream).await.unwrap()
    }
}

pub(crate) async fn send_json(socket: &mut Socket, value: serde_json::Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

pub(crate) async fn send_raw(socket: &mut Socket, text: &str) {
    socket.send(Message::Text(text.to_owned())).await.unwrap();
}

/// Next non-heartbeat JSON message from the client.
pub(crate) async fn recv_json(socket: &mut Socket, within: Duration) -> serde_json::Value {
    tokio::time::timeout(within, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    if value["type"] != "ping" {
                        return value;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("client socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for client message")
}

/// Next JSON message from the client, heartbeats included.
pub(crate) async fn recv_any(socket: &mut Socket, within: Duration) -> serde_json::Value {
    tokio::time::timeout(within, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("client socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for client message")
}
