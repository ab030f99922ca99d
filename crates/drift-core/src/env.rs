//! Per-process environment record.
//!
//! Every daemon builds one `NodeEnv` at startup and threads it into its
//! components; nothing reads the process environment after boot.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct NodeEnv {
    /// Base URL of the content store's HTTP API.
    pub ipfs_api: String,
    /// Gateway base used when rendering listener-facing URLs.
    pub ipfs_gateway: String,
    /// Config documents and music sources live under here.
    pub workspace_dir: PathBuf,
    /// Live-capture segment directory.
    pub hls_dir: PathBuf,
    /// Persisted JSON documents.
    pub state_dir: PathBuf,
    /// Transcoded segments and the manifest.
    pub processed_dir: PathBuf,
    pub node_id: String,
    /// Shared pub/sub topic for position gossip.
    pub stream_topic: String,
}

impl NodeEnv {
    pub fn from_env() -> Self {
        Self {
            ipfs_api: var_or("IPFS_API", "http://ipfs:5001"),
            ipfs_gateway: var_or("IPFS_GATEWAY", "http://ipfs:8080"),
            workspace_dir: PathBuf::from(var_or("WORKSPACE_DIR", "/workspace")),
            hls_dir: PathBuf::from(var_or("HLS_DIR", "/hls")),
            state_dir: PathBuf::from(var_or("STATE_DIR", "/state")),
            processed_dir: PathBuf::from(var_or("PROCESSED_DIR", "/data/processed")),
            node_id: var_or("NODE_ID", "node1"),
            stream_topic: var_or("STREAM_TOPIC", "driftcast-stream"),
        }
    }

    pub fn setup_config_file(&self) -> PathBuf {
        self.workspace_dir.join("setup.config.json")
    }

    pub fn playlist_config_file(&self) -> PathBuf {
        self.workspace_dir.join("playlist.config.json")
    }

    pub fn streaming_config_file(&self) -> PathBuf {
        self.workspace_dir.join("streaming.config.json")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.processed_dir.join("manifest.json")
    }

    pub fn playlist_file(&self) -> PathBuf {
        self.state_dir.join("playlist.m3u")
    }

    pub fn ipns_keys_file(&self) -> PathBuf {
        self.state_dir.join("ipns_keys.json")
    }

    pub fn sequence_state_file(&self) -> PathBuf {
        self.state_dir.join("sequence_state.json")
    }

    pub fn stream_info_file(&self) -> PathBuf {
        self.state_dir.join("stream_info.json")
    }

    pub fn position_file(&self) -> PathBuf {
        self.state_dir.join("current_position.json")
    }

    pub fn segments_file(&self) -> PathBuf {
        self.state_dir.join("ipfs_segments.json")
    }

    pub fn hashes_log_file(&self) -> PathBuf {
        self.state_dir.join("ipfs_hashes.log")
    }

    pub fn gateway_ipns_url(&self, name: &str) -> String {
        format!("{}/ipns/{}", self.ipfs_gateway, name)
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Numeric tuning variable with a fallback, e.g. `MAX_SEGMENTS`,
/// `CLEANUP_INTERVAL`, `SEGMENT_RETENTION_TIME`.
pub fn var_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn var_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
