//! nosip-demo: a small CLI harness that drives [`nosip_bridge::Plugin`]
//! through a full generate -> process -> query -> hangup cycle against a
//! logging [`HostBridge`], useful for exercising the bridge without a real
//! host gateway attached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nosip_bridge::calling::host::HostBridge;
use nosip_bridge::calling::media::MediaKind;
use nosip_bridge::Plugin;

/// Where a real Janus deployment would keep `janus.plugin.nosip.cfg` when the
/// caller doesn't name a directory explicitly.
fn default_config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "nosip-bridge", "nosip-bridge")
        .context("could not determine a default config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

#[derive(Parser)]
#[command(name = "nosip-demo")]
#[command(about = "Exercise the nosip-bridge session lifecycle against a logging host bridge", long_about = None)]
struct Cli {
    /// Directory to look for janus.plugin.nosip.cfg in (defaults apply if absent).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Session handle to drive through the demo lifecycle.
    #[arg(long, default_value_t = 1)]
    handle: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// A [`HostBridge`] that just logs every callback, standing in for a real
/// WebRTC gateway.
struct LoggingBridge;

impl HostBridge for LoggingBridge {
    fn push_event(&self, handle: u64, plugin: &str, transaction: &str, event: &Value, jsep: Option<&Value>) {
        tracing::info!(handle, plugin, transaction, %event, ?jsep, "push_event");
    }

    fn relay_rtp(&self, handle: u64, kind: MediaKind, buf: &[u8]) {
        tracing::debug!(handle, kind = kind.as_str(), len = buf.len(), "relay_rtp");
    }

    fn relay_rtcp(&self, handle: u64, kind: MediaKind, buf: &[u8]) {
        tracing::debug!(handle, kind = kind.as_str(), len = buf.len(), "relay_rtcp");
    }

    fn close_pc(&self, handle: u64) {
        tracing::info!(handle, "close_pc");
    }

    fn notify_event(&self, plugin: &str, handle: u64, info: &Value) {
        tracing::info!(handle, plugin, %info, "notify_event");
    }

    fn events_is_enabled(&self) -> bool {
        true
    }
}

const DEMO_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=audio 1 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\nm=video 1 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";

fn demo_answer(audio_port: u16, video_port: u16) -> String {
    format!(
        "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio {} RTP/SAVP 111\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\r\nm=video {} RTP/SAVP 96\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB\r\n",
        audio_port, video_port
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir().unwrap_or_else(|_| std::env::temp_dir()),
    };
    let bridge = Arc::new(LoggingBridge);
    let plugin = Plugin::init(bridge, &config_dir).await?;

    let handle = cli.handle;
    plugin.create_session(handle).await;

    tracing::info!("sending generate offer");
    plugin.handle_message(
        handle,
        "demo-generate".to_string(),
        json!({ "request": "generate", "srtp": "sdes_mandatory" }),
        Some(json!({ "type": "offer", "sdp": DEMO_OFFER })),
    )?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = plugin.query_session(handle).await.unwrap_or_default();
    let audio_port = snapshot["audio"]["port"].as_u64().unwrap_or(0) as u16;
    let video_port = snapshot["video"]["port"].as_u64().unwrap_or(0) as u16;

    tracing::info!("sending process answer");
    plugin.handle_message(
        handle,
        "demo-process".to_string(),
        json!({
            "request": "process",
            "type": "answer",
            "sdp": demo_answer(audio_port, video_port),
            "srtp": "sdes_mandatory",
        }),
        None,
    )?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Some(snapshot) = plugin.query_session(handle).await {
        tracing::info!(%snapshot, "session state after negotiation");
    }

    tracing::info!("sending hangup");
    plugin.handle_message(handle, "demo-hangup".to_string(), json!({ "request": "hangup" }), None)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    plugin.destroy_session(handle).await;
    plugin.destroy().await;

    Ok(())
}
