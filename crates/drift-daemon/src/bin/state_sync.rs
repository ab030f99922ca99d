//! Position gossip service.

use drift_core::env::NodeEnv;
use drift_daemon::cas::CasClient;
use drift_daemon::sync::StateSync;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drift_daemon::init_tracing();
    let env = NodeEnv::from_env();
    info!(
        "state sync starting (node {}, topic {})",
        env.node_id, env.stream_topic
    );
    let cas = CasClient::new(&env.ipfs_api);
    StateSync::new(env, cas).run().await
}
