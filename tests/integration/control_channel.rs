//! Control channel manager against a local WebSocket backend.

use std::time::Duration;

use avatar_lipsync::channel::protocol::{InboundMessage, OutboundMessage};
use avatar_lipsync::{ConnectionState, ControlEvent, control_channel};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::{Backend, recv_any, recv_json, send_json, send_raw};

const WAIT: Duration = Duration::from_secs(3);

async fn next_event(events: &mut mpsc::Receiver<ControlEvent>) -> ControlEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for control event")
        .expect("event stream closed")
}

#[tokio::test]
async fn announces_itself_and_forwards_messages_in_order() {
    let backend = Backend::bind().await;
    let (manager, handle, mut events) = control_channel(backend.channel_config());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(manager.run(cancel.clone()));

    let mut socket = backend.accept().await;
    let hello = recv_json(&mut socket, WAIT).await;
    assert_eq!(hello, json!({"type": "vrmConnected", "status": "connected"}));
    assert_eq!(next_event(&mut events).await, ControlEvent::Connected);
    assert_eq!(handle.state(), ConnectionState::Connected);

    send_json(&mut socket, json!({"type": "ttsStarted"})).await;
    send_raw(&mut socket, "{not json").await;
    send_json(&mut socket, json!({"type": "mystery"})).await;
    send_json(&mut socket, json!({"type": "chunkEnded", "chunkIndex": 2})).await;

    assert_eq!(
        next_event(&mut events).await,
        ControlEvent::Message(InboundMessage::TtsStarted {})
    );
    assert_eq!(
        next_event(&mut events).await,
        ControlEvent::Message(InboundMessage::ChunkEnded { chunk_index: 2 })
    );

    handle.send(OutboundMessage::animation_complete()).unwrap();
    let done = recv_json(&mut socket, WAIT).await;
    assert_eq!(done, json!({"type": "animationComplete", "status": "completed"}));

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn sends_heartbeats_while_connected() {
    let backend = Backend::bind().await;
    let (manager, _handle, _events) = control_channel(backend.channel_config());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(manager.run(cancel.clone()));

    let mut socket = backend.accept().await;
    assert_eq!(recv_any(&mut socket, WAIT).await["type"], "vrmConnected");
    assert_eq!(recv_any(&mut socket, WAIT).await, json!({"type": "ping"}));
    assert_eq!(recv_any(&mut socket, WAIT).await, json!({"type": "ping"}));

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_after_drop_and_discards_stale_messages() {
    let backend = Backend::bind().await;
    let (manager, handle, mut events) = control_channel(backend.channel_config());
    let mut state = handle.watch_state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(manager.run(cancel.clone()));

    let socket = backend.accept().await;
    assert_eq!(next_event(&mut events).await, ControlEvent::Connected);
    drop(socket);

    assert_eq!(next_event(&mut events).await, ControlEvent::Disconnected);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s != ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // Queued while disconnected: must not reach the new connection.
    handle.send(OutboundMessage::animation_complete()).unwrap();

    let mut socket = backend.accept().await;
    assert_eq!(
        recv_json(&mut socket, WAIT).await,
        json!({"type": "vrmConnected", "status": "connected"})
    );
    assert_eq!(next_event(&mut events).await, ControlEvent::Connected);

    handle.send(OutboundMessage::animation_complete()).unwrap();
    assert_eq!(
        recv_json(&mut socket, WAIT).await["type"],
        "animationComplete"
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}
