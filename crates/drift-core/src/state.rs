//! Persisted state documents shared between the role processes.
//!
//! Every document is rewritten in full: serialize, write to a sibling temp
//! file, rename over the target. Readers therefore never observe a torn
//! document, only a current or a previous one.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

// ── read / write helpers ──────────────────────────────────────────────────────

pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text_atomic(path, &json).await
}

pub async fn write_text_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// `Ok(None)` when the file does not exist yet.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("cannot read {}: {}", path.display(), e)),
    };
    let value = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", path.display(), e))?;
    Ok(Some(value))
}

// ── streamer documents ────────────────────────────────────────────────────────

/// The streamer's persisted counter. `sequence` never decreases; `epoch` is
/// fixed at first boot and anchors every PROGRAM-DATE-TIME the node emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceState {
    pub sequence: u64,
    pub epoch: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl SequenceState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            epoch: now,
            timestamp: now,
        }
    }

    /// Restore from disk, or start fresh when the file is absent or
    /// unreadable (an unreadable file is logged, not fatal).
    pub fn load_or_init(path: &Path, now: DateTime<Utc>) -> Self {
        match read_json::<SequenceState>(path) {
            Ok(Some(state)) => state,
            Ok(None) => Self::fresh(now),
            Err(e) => {
                warn!("failed to load sequence state, starting fresh: {e:#}");
                Self::fresh(now)
            }
        }
    }

    pub fn advanced(&self, now: DateTime<Utc>) -> Self {
        Self {
            sequence: self.sequence + 1,
            epoch: self.epoch,
            timestamp: now,
        }
    }
}

/// Written every tick for external observers (dashboards, the test server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_playlist_ipns: String,
    pub stream_playlist_url: String,
    pub sequence_number: u64,
    pub playlist_position: u64,
    pub updated_at: DateTime<Utc>,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_playlist_ipns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_playlist_url: Option<String>,
}

// ── state-sync document ───────────────────────────────────────────────────────

/// A node's playback position as gossiped over the topic. The typed fields
/// are what convergence needs; everything else a peer sends is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub track: Option<String>,
    /// Sender-side unix seconds.
    #[serde(default)]
    pub timestamp: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── capture documents ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub cid: String,
    /// Unix seconds at upload time.
    pub timestamp: i64,
    pub size: u64,
    pub node_id: String,
}

pub type SegmentMap = BTreeMap<String, SegmentRecord>;

/// `{quality → {filename → record}}`, the live-capture ledger shared by the
/// capture uploader, the streamer's capture source, and cleanup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentStateDoc {
    pub qualities: BTreeMap<String, SegmentMap>,
}

/// Filenames and records ordered oldest-first by upload time.
pub fn sorted_by_time(segments: &SegmentMap) -> Vec<(&String, &SegmentRecord)> {
    let mut entries: Vec<_> = segments.iter().collect();
    entries.sort_by_key(|(_, record)| record.timestamp);
    entries
}

/// One line of `ipfs_hashes.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLogEntry {
    pub filename: String,
    pub cid: String,
    pub size: u64,
    pub node_id: String,
    pub uploaded_at: DateTime<Utc>,
}
