//! Headless lip-sync host.
//!
//! Connects to the speech backend's control channel, plays and analyses the
//! streamed chunks, and writes changed expression weights to stdout as one
//! JSON object per frame. A renderer in another process applies them to the
//! avatar.
//!
//! All tracing output goes to stderr so that stdout stays a clean data channel.

use std::path::PathBuf;

use anyhow::{Context, bail};
use avatar_lipsync::audio::output::{AudioOutput, SilentOutput, open_output};
use avatar_lipsync::config::OutputKind;
use avatar_lipsync::{JsonLinesAvatar, LipSyncConfig, SessionRuntime, app_dirs, logging};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const USAGE: &str = "usage: lipsync-host [--config <path>] [--url <ws-url>] [--silent] [--log-file]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    url: Option<String>,
    silent: bool,
    log_file: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--url" => parsed.url = Some(args.next().context("--url needs a value")?),
            "--silent" => parsed.silent = true,
            "--log-file" => parsed.log_file = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(parsed)
}

fn load_config(args: &Args) -> anyhow::Result<LipSyncConfig> {
    let mut config = match &args.config {
        Some(path) => LipSyncConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let path = LipSyncConfig::default_config_path();
            if path.exists() {
                LipSyncConfig::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?
            } else {
                LipSyncConfig::default()
            }
        }
    };
    if let Some(url) = &args.url {
        config.channel.url.clone_from(url);
    }
    if args.silent {
        config.playback.output = OutputKind::Silent;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = load_config(&args)?;

    let log_dir = if args.log_file {
        Some(config.logging.log_dir.clone().unwrap_or_else(app_dirs::logs_dir))
    } else {
        config.logging.log_dir.clone()
    };
    let _log_guard = logging::init(&config.logging, log_dir.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.channel.url,
        "lipsync-host starting"
    );

    let output: Box<dyn AudioOutput> = match open_output(&config.playback) {
        Ok(output) => output,
        Err(e) => {
            warn!("audio output unavailable, continuing without sound: {e}");
            Box::new(SilentOutput)
        }
    };

    let avatar = JsonLinesAvatar::new(std::io::stdout());
    let runtime = SessionRuntime::new(&config, Box::new(avatar), output);
    let (channel, handle, events) = avatar_lipsync::control_channel(config.channel.clone());

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let channel_task = tokio::spawn(channel.run(cancel.clone()));
    let controller = runtime
        .run(events, handle.outbound_sender(), cancel.clone())
        .await;
    cancel.cancel();
    channel_task.await.context("control channel task failed")?;

    info!(state = ?controller.state(), "lipsync-host shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| (*s).to_owned()))
    }

    #[test]
    fn parses_all_flags() {
        let parsed = args(&["--config", "a.toml", "--url", "ws://h/ws", "--silent"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("a.toml")));
        assert_eq!(parsed.url.as_deref(), Some("ws://h/ws"));
        assert!(parsed.silent);
        assert!(!parsed.log_file);
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["--url"]).is_err());
    }

    #[test]
    fn cli_overrides_apply() {
        let parsed = Args {
            url: Some("wss://backend.example/ws".to_owned()),
            silent: true,
            config: Some(PathBuf::from("/nonexistent/lipsync.toml")),
            ..Args::default()
        };
        assert!(load_config(&parsed).is_err());

        let parsed = Args {
            config: None,
            ..parsed
        };
        // A user config may exist on the machine; only the overrides matter.
        if let Ok(config) = load_config(&parsed) {
            assert_eq!(config.channel.url, "wss://backend.example/ws");
            assert_eq!(config.playback.output, OutputKind::Silent);
        }
    }
}
