//! The setup manifest: one document describing every transcoded track and
//! jingle, keyed by the config hash that produced it.

use crate::config::{AudioConfig, JinglesConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRef {
    pub filename: String,
    pub cid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Track,
    Jingle,
}

impl TrackKind {
    /// Directory prefix for this kind's transcoded output.
    pub fn prefix(self) -> &'static str {
        match self {
            TrackKind::Track => "track",
            TrackKind::Jingle => "jingle",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub base_name: String,
    pub segment_count: usize,
    /// Ordered by source offset.
    pub segments: Vec<SegmentRef>,
    /// Relative to the processed directory.
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub config_hash: String,
    /// Unix seconds at generation time.
    pub timestamp: i64,
    pub tracks: Vec<TrackEntry>,
    pub jingles: Vec<TrackEntry>,
    pub audio_config: AudioConfig,
    pub jingles_config: JinglesConfig,
}

impl Manifest {
    /// `Ok(None)` when no manifest has been written yet.
    pub fn load(path: &Path) -> anyhow::Result<Option<Manifest>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::anyhow!("cannot read {}: {}", path.display(), e)),
        };
        let manifest = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", path.display(), e))?;
        Ok(Some(manifest))
    }

    pub fn total_segments(&self) -> usize {
        self.tracks
            .iter()
            .chain(self.jingles.iter())
            .map(|t| t.segment_count)
            .sum()
    }
}
