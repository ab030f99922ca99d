//! HLS capture service: upload encoder output to the store as it lands.

use drift_core::env::{var_u64, NodeEnv};
use drift_daemon::capture::HlsCapture;
use drift_daemon::cas::CasClient;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drift_daemon::init_tracing();
    let env = NodeEnv::from_env();
    let max_segments = var_u64("MAX_SEGMENTS", 50) as usize;
    info!(
        "hls capture starting (node {}, watching {}, max {} segments)",
        env.node_id,
        env.hls_dir.display(),
        max_segments
    );

    let cas = CasClient::new(&env.ipfs_api);
    HlsCapture::new(env, cas, max_segments).run().await
}
