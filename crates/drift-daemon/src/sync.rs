//! Best-effort position gossip over the store's pub/sub topic.
//!
//! Three concurrent activities share the in-memory peer table and the
//! on-disk position file: the subscriber (receives peer states and
//! converges), the publisher (re-broadcasts the local file when it
//! changes), and the reaper (expires silent peers). Everything here is
//! logged-and-retried; the streamer never blocks on it.

use crate::cas::{CasClient, CasError};
use chrono::Utc;
use drift_core::env::NodeEnv;
use drift_core::multibase;
use drift_core::state::{read_json, write_json_atomic, PositionState};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// A peer state older than this is not authoritative and never written to
/// the position file.
pub const FRESHNESS_WINDOW_SECS: f64 = 300.0;
/// Peers silent for this long are dropped from the table.
pub const PEER_EXPIRY_SECS: f64 = 600.0;

const PUBLISH_INTERVAL: Duration = Duration::from_secs(10);
const REAP_INTERVAL: Duration = Duration::from_secs(60);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);
const READY_PROBE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub state: PositionState,
    /// Sender-side unix seconds, copied from the state.
    pub timestamp: f64,
    /// Local unix seconds at receipt.
    pub received_at: f64,
}

/// The freshest peer by sender timestamp, if it is still authoritative.
pub fn select_freshest(peers: &HashMap<String, PeerRecord>, now: f64) -> Option<&PeerRecord> {
    peers
        .values()
        .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
        .filter(|peer| now - peer.timestamp < FRESHNESS_WINDOW_SECS)
}

/// Drop every peer not heard from within the expiry window; returns the
/// dropped node ids.
pub fn reap_stale(peers: &mut HashMap<String, PeerRecord>, now: f64) -> Vec<String> {
    let stale: Vec<String> = peers
        .iter()
        .filter(|(_, peer)| now - peer.received_at >= PEER_EXPIRY_SECS)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        peers.remove(id);
    }
    stale
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: String,
}

pub struct StateSync {
    env: NodeEnv,
    cas: CasClient,
    peers: Arc<RwLock<HashMap<String, PeerRecord>>>,
    /// Last state written or published by this process; keeps received
    /// states from echoing straight back onto the topic.
    local: Arc<Mutex<Option<PositionState>>>,
}

impl StateSync {
    pub fn new(env: NodeEnv, cas: CasClient) -> Self {
        Self {
            env,
            cas,
            peers: Arc::new(RwLock::new(HashMap::new())),
            local: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.cas.wait_ready(READY_PROBE_INTERVAL).await;
        tokio::fs::create_dir_all(&self.env.state_dir).await?;

        let publisher = tokio::spawn(publish_loop(
            self.cas.clone(),
            self.env.clone(),
            Arc::clone(&self.local),
        ));
        let reaper = tokio::spawn(reap_loop(Arc::clone(&self.peers)));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                result = self.subscribe_once() => {
                    match result {
                        Ok(()) => info!("subscription ended"),
                        Err(e) => warn!("subscription failed: {e}"),
                    }
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => { info!("shutting down"); break; }
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                    }
                }
            }
        }

        publisher.abort();
        reaper.abort();
        Ok(())
    }

    async fn subscribe_once(&self) -> Result<(), CasError> {
        info!("subscribing to topic: {}", self.env.stream_topic);
        let mut subscription = self.cas.subscribe(&self.env.stream_topic).await?;
        info!("subscribed, waiting for messages");
        while let Some(line) = subscription.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.handle_message(&line).await;
        }
        Ok(())
    }

    async fn handle_message(&self, line: &str) {
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("undecodable message envelope: {e}");
                return;
            }
        };
        if envelope.data.is_empty() {
            return;
        }
        let payload = match multibase::decode(&envelope.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("ignoring message: {e}");
                return;
            }
        };
        let state: PositionState = match serde_json::from_slice(&payload) {
            Ok(state) => state,
            Err(e) => {
                warn!("undecodable peer state: {e}");
                return;
            }
        };

        debug!(
            "received state from {}: position={:?}, track={:?}",
            state.node_id, state.position, state.track
        );

        let now = unix_now();
        {
            let mut peers = self.peers.write().await;
            peers.insert(
                state.node_id.clone(),
                PeerRecord {
                    timestamp: state.timestamp,
                    received_at: now,
                    state,
                },
            );
        }
        self.converge(now).await;
    }

    /// Overwrite the local position file with the freshest authoritative
    /// peer state.
    async fn converge(&self, now: f64) {
        let freshest = {
            let peers = self.peers.read().await;
            select_freshest(&peers, now).map(|peer| peer.state.clone())
        };
        let Some(state) = freshest else { return };

        if let Err(e) = write_json_atomic(&self.env.position_file(), &state).await {
            error!("failed to write position state: {e:#}");
            return;
        }
        debug!("synced to state from {}", state.node_id);
        *self.local.lock().await = Some(state);
    }
}

async fn publish_loop(cas: CasClient, env: NodeEnv, local: Arc<Mutex<Option<PositionState>>>) {
    let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
    loop {
        ticker.tick().await;

        let state: PositionState = match read_json(&env.position_file()) {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                warn!("cannot read position state: {e:#}");
                continue;
            }
        };

        {
            let last = local.lock().await;
            if last.as_ref() == Some(&state) {
                continue;
            }
        }

        let payload = match serde_json::to_vec(&state) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot encode position state: {e}");
                continue;
            }
        };
        match cas.pubsub_pub(&env.stream_topic, payload).await {
            Ok(()) => {
                info!("published local state: position={:?}", state.position);
                *local.lock().await = Some(state);
            }
            Err(e) => warn!("failed to publish state: {e}"),
        }
    }
}

async fn reap_loop(peers: Arc<RwLock<HashMap<String, PeerRecord>>>) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        ticker.tick().await;
        let now = unix_now();
        let removed = reap_stale(&mut *peers.write().await, now);
        for id in removed {
            info!("removed stale state from {id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(node_id: &str, timestamp: f64, received_at: f64) -> PeerRecord {
        PeerRecord {
            state: PositionState {
                node_id: node_id.to_string(),
                position: Some(1),
                track: None,
                timestamp,
                extra: serde_json::Map::new(),
            },
            timestamp,
            received_at,
        }
    }

    #[test]
    fn freshest_peer_wins() {
        let mut peers = HashMap::new();
        peers.insert("a".to_string(), peer("a", 100.0, 250.0));
        peers.insert("b".to_string(), peer("b", 200.0, 250.0));
        let chosen = select_freshest(&peers, 250.0).unwrap();
        assert_eq!(chosen.state.node_id, "b");
    }

    #[test]
    fn stale_states_are_never_authoritative() {
        let mut peers = HashMap::new();
        peers.insert("a".to_string(), peer("a", 100.0, 500.0));
        peers.insert("b".to_string(), peer("b", 200.0, 500.0));
        // The freshest is 400 s old: nothing is written.
        assert!(select_freshest(&peers, 600.0).is_none());
        // Just inside the window it becomes authoritative again.
        assert_eq!(
            select_freshest(&peers, 499.0).unwrap().state.node_id,
            "b"
        );
    }

    #[test]
    fn reaper_keeps_only_recent_peers() {
        let now = 10_000.0;
        let mut peers = HashMap::new();
        peers.insert("old".to_string(), peer("old", 1.0, now - 601.0));
        peers.insert("edge".to_string(), peer("edge", 1.0, now - PEER_EXPIRY_SECS));
        peers.insert("new".to_string(), peer("new", 1.0, now - 10.0));

        let mut removed = reap_stale(&mut peers, now);
        removed.sort();
        assert_eq!(removed, ["edge", "old"]);
        assert!(peers
            .values()
            .all(|p| now - p.received_at < PEER_EXPIRY_SECS));
        assert!(peers.contains_key("new"));
    }

    #[test]
    fn envelope_without_multibase_prefix_is_ignored() {
        // Raw (unencoded) payloads from legacy publishers must not parse.
        let envelope: Envelope =
            serde_json::from_str(r#"{"data":"{\"node_id\":\"x\"}","from":"peer"}"#).unwrap();
        assert!(multibase::decode(&envelope.data).is_err());
    }
}
