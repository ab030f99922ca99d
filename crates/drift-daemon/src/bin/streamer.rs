//! The sliding-window streaming service.

use anyhow::Context;
use drift_core::config::{load_config, AudioConfig, StreamSource, StreamingConfig};
use drift_core::env::{var_opt, NodeEnv};
use drift_core::manifest::Manifest;
use drift_daemon::capture::CAPTURED_QUALITY;
use drift_daemon::cas::CasClient;
use drift_daemon::source::PlaylistSource;
use drift_daemon::streamer::Streamer;
use std::time::Duration;
use tracing::{info, warn};

const MANIFEST_RETRIES: u32 = 5;
const MANIFEST_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drift_daemon::init_tracing();
    let env = NodeEnv::from_env();
    info!("streaming service starting (node {})", env.node_id);

    let mut config: StreamingConfig =
        load_config(&env.streaming_config_file()).context("loading streaming.config.json")?;
    if let Some(interval) = var_opt("UPDATE_INTERVAL").and_then(|v| v.parse().ok()) {
        config.streaming.update_interval = interval;
    }
    if let Some(lifetime) = var_opt("IPNS_LIFETIME") {
        config.ipns.lifetime = lifetime;
    }
    if let Some(ttl) = var_opt("IPNS_TTL") {
        config.ipns.ttl = ttl;
    }

    let cas = CasClient::new(&env.ipfs_api);
    let identity = cas
        .identity()
        .await
        .context("content store is not reachable")?;
    info!("connected to store node {}...", identity.short_id());

    let (source, segment_duration) = match config.streaming.source {
        StreamSource::Manifest => {
            let manifest = load_manifest_with_retry(&env).await?;
            info!("loaded manifest with {} tracks", manifest.tracks.len());
            let source = PlaylistSource::load_static(&env.playlist_file())?;
            info!("loaded {}", source.describe());
            (source, manifest.audio_config.segment_duration)
        }
        StreamSource::Capture => (
            PlaylistSource::live(env.segments_file(), CAPTURED_QUALITY),
            AudioConfig::default().segment_duration,
        ),
    };

    let streamer = Streamer::init(env, config, cas, source, segment_duration).await?;
    streamer.run().await
}

/// The setup processor may still be writing on a cold boot; give it a
/// bounded head start before giving up.
async fn load_manifest_with_retry(env: &NodeEnv) -> anyhow::Result<Manifest> {
    let path = env.manifest_file();
    for attempt in 0..MANIFEST_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(MANIFEST_RETRY_DELAY).await;
        }
        match Manifest::load(&path) {
            Ok(Some(manifest)) => return Ok(manifest),
            Ok(None) => warn!("manifest not found at {}, retrying", path.display()),
            Err(e) => warn!("manifest unreadable: {e:#}"),
        }
    }
    anyhow::bail!("manifest not available at {}", path.display())
}
