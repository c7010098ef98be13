//! Config persistence through TOML files.

use avatar_lipsync::LipSyncConfig;
use avatar_lipsync::config::OutputKind;

#[test]
fn save_and_reload_preserves_overrides() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("config.toml");

    let mut config = LipSyncConfig::default();
    config.channel.url = "wss://speech.example/ws".to_owned();
    config.playback.output = OutputKind::Silent;
    config.session.grace_delay_ms = 350;
    config.save_to_file(&path).unwrap();

    let loaded = LipSyncConfig::from_file(&path).unwrap();
    assert_eq!(loaded.channel.url, "wss://speech.example/ws");
    assert_eq!(loaded.playback.output, OutputKind::Silent);
    assert_eq!(loaded.session.grace_delay_ms, 350);
    assert!(loaded.validate().is_ok());
}

#[test]
fn partial_file_falls_back_to_defaults() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[compositor]\nsurprised_frames = 30\n").unwrap();

    let loaded = LipSyncConfig::from_file(&path).unwrap();
    let defaults = LipSyncConfig::default();
    assert_eq!(loaded.compositor.surprised_frames, 30);
    assert_eq!(loaded.compositor.blink_frames, defaults.compositor.blink_frames);
    assert_eq!(loaded.channel.url, defaults.channel.url);
}

#[test]
fn invalid_file_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[channel]\nurl = \"http://not-a-socket\"\n").unwrap();

    let loaded = LipSyncConfig::from_file(&path).unwrap();
    assert!(loaded.validate().is_err());
}
