//! One-shot setup processor: transcode, pin, and emit the manifest plus
//! the virtual playlist.

use anyhow::Context;
use drift_core::config::{load_config, PlaylistConfig, SetupConfig};
use drift_core::env::NodeEnv;
use drift_daemon::cas::CasClient;
use drift_daemon::setup::SetupProcessor;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drift_daemon::init_tracing();
    let env = NodeEnv::from_env();
    info!("setup processor starting (node {})", env.node_id);

    let setup: SetupConfig =
        load_config(&env.setup_config_file()).context("loading setup.config.json")?;

    // A missing playlist config degrades to defaults; a broken one is fatal.
    let playlist_path = env.playlist_config_file();
    let playlist: PlaylistConfig = if playlist_path.is_file() {
        load_config(&playlist_path).context("loading playlist.config.json")?
    } else {
        warn!("{} not found, using defaults", playlist_path.display());
        PlaylistConfig::default()
    };

    let cas = CasClient::new(&env.ipfs_api);
    SetupProcessor::new(env, setup, playlist, cas).run().await
}
