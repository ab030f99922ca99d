//! Segment cleanup service for the live-capture deployment.

use anyhow::Context;
use drift_core::env::NodeEnv;
use drift_daemon::cas::CasClient;
use drift_daemon::cleanup::{CleanupConfig, SegmentCleaner};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drift_daemon::init_tracing();
    let env = NodeEnv::from_env();
    info!("segment cleanup starting (node {})", env.node_id);

    let config = CleanupConfig::from_env();
    let cas = CasClient::new(&env.ipfs_api);
    let identity = cas
        .identity()
        .await
        .context("content store is not reachable")?;
    info!("connected to store node {}...", identity.short_id());

    SegmentCleaner::new(env, cas, config).run().await
}
