//! The three JSON configuration documents and the setup config hash.
//!
//! Every field carries a default so operators only write the keys they
//! change. The setup/playlist pair is hashed (canonical JSON, sorted keys)
//! to gate the expensive transcoding pass.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

// ── setup.config.json ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub jingles: JinglesConfig,
    #[serde(default)]
    pub ipfs: IpfsConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Target HLS segment length in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_codec")]
    pub codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JinglesConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Jingle directory, relative to the workspace.
    #[serde(default = "default_jingles_source")]
    pub source: String,
    /// One jingle is inserted between every `cycle` consecutive tracks.
    #[serde(default = "default_jingle_cycle")]
    pub cycle: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Upload timeout in seconds.
    #[serde(default = "default_ipfs_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub pin_segments: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub force_rebuild: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            segment_duration: default_segment_duration(),
            bitrate: default_bitrate(),
            codec: default_codec(),
        }
    }
}

impl Default for JinglesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: default_jingles_source(),
            cycle: default_jingle_cycle(),
        }
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            timeout: default_ipfs_timeout(),
            pin_segments: true,
        }
    }
}

fn default_segment_duration() -> u32 {
    6
}

fn default_bitrate() -> String {
    "128k".to_string()
}

fn default_codec() -> String {
    "aac".to_string()
}

fn default_jingles_source() -> String {
    "src/jingles".to_string()
}

fn default_jingle_cycle() -> usize {
    2
}

fn default_ipfs_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// ── playlist.config.json ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Music source directory, relative to the workspace.
    #[serde(default)]
    pub source: String,
    /// Explicit track order. Empty means "discover everything".
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub options: PlaylistOptions,
    #[serde(default)]
    pub mode: Option<PlaylistMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistOptions {
    #[serde(default = "default_true")]
    pub scan_subdirectories: bool,
    #[serde(default)]
    pub sort_alphabetically: bool,
    #[serde(default)]
    pub shuffle_on_build: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMode {
    /// Only the configured `tracks`, in listed order.
    Ordered,
    /// Everything discovered under the source.
    Auto,
    /// The configured `tracks` first, then everything else.
    All,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            scan_subdirectories: true,
            sort_alphabetically: false,
            shuffle_on_build: false,
        }
    }
}

impl PlaylistConfig {
    /// The mode actually in force: an explicit `mode` wins, otherwise a
    /// non-empty track list means `ordered` and an empty one means `auto`.
    pub fn effective_mode(&self) -> PlaylistMode {
        self.mode.unwrap_or(if self.tracks.is_empty() {
            PlaylistMode::Auto
        } else {
            PlaylistMode::Ordered
        })
    }
}

// ── streaming.config.json ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default)]
    pub streaming: StreamingSection,
    #[serde(default)]
    pub ipns: IpnsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSection {
    /// Accepted for compatibility; the published window length is
    /// `max_segments`.
    #[serde(default)]
    pub window_size: Option<usize>,
    /// Seconds between republishes.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Segments per published playlist.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// The window advances one segment every `advance_every` republishes.
    #[serde(default = "default_advance_every")]
    pub advance_every: u32,
    /// Where the entry list comes from: a processed manifest or the
    /// live-capture segment document.
    #[serde(default)]
    pub source: StreamSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    #[default]
    Manifest,
    Capture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpnsSection {
    #[serde(default = "default_ipns_lifetime")]
    pub lifetime: String,
    #[serde(default = "default_ipns_ttl")]
    pub ttl: String,
    #[serde(default = "default_true")]
    pub allow_offline: bool,
}

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            window_size: None,
            update_interval: default_update_interval(),
            max_segments: default_max_segments(),
            advance_every: default_advance_every(),
            source: StreamSource::Manifest,
        }
    }
}

impl Default for IpnsSection {
    fn default() -> Self {
        Self {
            lifetime: default_ipns_lifetime(),
            ttl: default_ipns_ttl(),
            allow_offline: true,
        }
    }
}

fn default_update_interval() -> u64 {
    2
}

fn default_max_segments() -> usize {
    15
}

fn default_advance_every() -> u32 {
    2
}

fn default_ipns_lifetime() -> String {
    "24h".to_string()
}

fn default_ipns_ttl() -> String {
    "10s".to_string()
}

// ── loading & hashing ─────────────────────────────────────────────────────────

pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let config = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", path.display(), e))?;
    Ok(config)
}

/// SHA-256 over the canonical JSON of both setup documents.
///
/// serde_json's maps are key-sorted, so serializing through `Value` yields a
/// canonical byte string: the same configuration always hashes the same,
/// regardless of key order in the files on disk.
pub fn config_hash(setup: &SetupConfig, playlist: &PlaylistConfig) -> String {
    let doc = serde_json::json!({ "setup": setup, "playlist": playlist });
    let mut hasher = Sha256::new();
    hasher.update(doc.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let setup: SetupConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(setup.audio.segment_duration, 6);
        assert_eq!(setup.audio.bitrate, "128k");
        assert_eq!(setup.audio.codec, "aac");
        assert!(!setup.jingles.enabled);
        assert_eq!(setup.jingles.cycle, 2);
        assert!(setup.ipfs.pin_segments);
        assert!(!setup.processing.force_rebuild);

        let streaming: StreamingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(streaming.streaming.update_interval, 2);
        assert_eq!(streaming.streaming.max_segments, 15);
        assert_eq!(streaming.streaming.advance_every, 2);
        assert_eq!(streaming.streaming.source, StreamSource::Manifest);
        assert_eq!(streaming.ipns.lifetime, "24h");
        assert!(streaming.ipns.allow_offline);
    }

    #[test]
    fn effective_mode_follows_track_list() {
        let mut playlist = PlaylistConfig::default();
        assert_eq!(playlist.effective_mode(), PlaylistMode::Auto);

        playlist.tracks = vec!["a.mp3".into()];
        assert_eq!(playlist.effective_mode(), PlaylistMode::Ordered);

        playlist.mode = Some(PlaylistMode::All);
        assert_eq!(playlist.effective_mode(), PlaylistMode::All);
    }

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let setup = SetupConfig::default();
        let playlist = PlaylistConfig::default();
        let first = config_hash(&setup, &playlist);
        assert_eq!(first, config_hash(&setup, &playlist));
        assert_eq!(first.len(), 64);

        let mut changed = SetupConfig::default();
        changed.audio.bitrate = "192k".to_string();
        assert_ne!(first, config_hash(&changed, &playlist));
    }

    #[test]
    fn hash_ignores_key_order_in_files() {
        let a: SetupConfig =
            serde_json::from_str(r#"{"audio": {"bitrate": "96k", "codec": "aac"}}"#).unwrap();
        let b: SetupConfig =
            serde_json::from_str(r#"{"audio": {"codec": "aac", "bitrate": "96k"}}"#).unwrap();
        let playlist = PlaylistConfig::default();
        assert_eq!(config_hash(&a, &playlist), config_hash(&b, &playlist));
    }
}
