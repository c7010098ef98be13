//! Full speech turns: backend → control channel → session runtime → avatar.

use std::time::Duration;

use avatar_lipsync::audio::output::SilentOutput;
use avatar_lipsync::{
    InMemoryAvatar, LipSyncConfig, SessionRuntime, SessionState, control_channel,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::helpers::{Backend, Socket, recv_json, send_json, wav_data_url};

const WAIT: Duration = Duration::from_secs(5);

struct Host {
    avatar: InMemoryAvatar,
    cancel: CancellationToken,
    runtime: JoinHandle<avatar_lipsync::SessionController>,
    channel: JoinHandle<()>,
}

impl Host {
    async fn start(backend: &Backend) -> (Self, Socket) {
        let mut config = LipSyncConfig::default();
        config.channel = backend.channel_config();

        let avatar = InMemoryAvatar::new();
        let runtime = SessionRuntime::new(&config, Box::new(avatar.clone()), Box::new(SilentOutput));
        let (manager, handle, events) = control_channel(config.channel.clone());

        let cancel = CancellationToken::new();
        let channel = tokio::spawn(manager.run(cancel.clone()));
        let runtime = tokio::spawn(runtime.run(events, handle.outbound_sender(), cancel.clone()));

        let mut socket = backend.accept().await;
        assert_eq!(recv_json(&mut socket, WAIT).await["type"], "vrmConnected");
        (
            Self {
                avatar,
                cancel,
                runtime,
                channel,
            },
            socket,
        )
    }

    async fn stop(self) -> avatar_lipsync::SessionController {
        self.cancel.cancel();
        self.channel.await.unwrap();
        self.runtime.await.unwrap()
    }
}

fn assert_all_zero(avatar: &InMemoryAvatar) {
    for (name, weight) in avatar.weights() {
        assert_eq!(weight, 0.0, "{name} was not reset");
    }
}

#[tokio::test]
async fn turn_with_two_chunks_completes_and_resets() {
    let backend = Backend::bind().await;
    let (host, mut socket) = Host::start(&backend).await;

    send_json(&mut socket, json!({"type": "ttsStarted"})).await;
    send_json(
        &mut socket,
        json!({
            "type": "startSpeaking",
            "chunkIndex": 0,
            "audioDataUrl": wav_data_url(0.4, 0.6),
            "expressions": ["happy"],
        }),
    )
    .await;
    send_json(
        &mut socket,
        json!({
            "type": "startSpeaking",
            "chunkIndex": 1,
            "audioDataUrl": wav_data_url(0.3, 0.0),
            "expressions": [null, "blink"],
        }),
    )
    .await;
    send_json(&mut socket, json!({"type": "allChunksCompleted"})).await;

    let done = recv_json(&mut socket, WAIT).await;
    assert_eq!(done, json!({"type": "animationComplete", "status": "completed"}));

    let avatar = host.avatar.clone();
    assert!(avatar.history("happy").contains(&1.0));
    assert!(avatar.history("blink").iter().any(|w| *w > 0.0));
    assert!(avatar.history("aa").iter().any(|w| *w > 0.0));
    assert_all_zero(&avatar);

    let controller = host.stop().await;
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_speaking_interrupts_long_chunk() {
    let backend = Backend::bind().await;
    let (host, mut socket) = Host::start(&backend).await;

    send_json(&mut socket, json!({"type": "ttsStarted"})).await;
    send_json(
        &mut socket,
        json!({
            "type": "startSpeaking",
            "chunkIndex": 0,
            "audioDataUrl": wav_data_url(10.0, 0.6),
            "expressions": ["angry"],
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(host.avatar.weights().get("angry").copied(), Some(1.0));

    send_json(&mut socket, json!({"type": "stopSpeaking"})).await;
    let done = recv_json(&mut socket, Duration::from_secs(1)).await;
    assert_eq!(done["type"], "animationComplete");
    assert_all_zero(&host.avatar);

    let writes = host.avatar.all_writes().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.avatar.all_writes().len(), writes, "writes after stop");

    host.stop().await;
}

#[tokio::test]
async fn backend_drop_resets_without_completion() {
    let backend = Backend::bind().await;
    let (host, mut socket) = Host::start(&backend).await;

    send_json(&mut socket, json!({"type": "ttsStarted"})).await;
    send_json(
        &mut socket,
        json!({
            "type": "startSpeaking",
            "chunkIndex": 0,
            "audioDataUrl": wav_data_url(10.0, 0.6),
            "expressions": ["sad"],
        }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(socket);

    // The reconnect's first message is the announcement, not a completion.
    let mut socket = backend.accept().await;
    assert_eq!(recv_json(&mut socket, WAIT).await["type"], "vrmConnected");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_all_zero(&host.avatar);

    host.stop().await;
}
