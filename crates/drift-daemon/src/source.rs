//! Where the streamer's entry list comes from.
//!
//! `Static` is the setup-processor deployment: the virtual playlist is
//! parsed once from disk and never changes while the process runs.
//! `Live` is the capture deployment: the entry list is re-read from the
//! capture segment document on every tick, oldest first.

use anyhow::Context;
use drift_core::hls;
use drift_core::state::{read_json, sorted_by_time, SegmentStateDoc};
use std::path::{Path, PathBuf};

pub enum PlaylistSource {
    Static(Vec<String>),
    Live {
        state_file: PathBuf,
        quality: String,
    },
}

impl PlaylistSource {
    pub fn load_static(playlist_file: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(playlist_file)
            .with_context(|| format!("reading {}", playlist_file.display()))?;
        let entries = hls::parse_cids(&text);
        anyhow::ensure!(
            !entries.is_empty(),
            "virtual playlist {} has no segments",
            playlist_file.display()
        );
        Ok(PlaylistSource::Static(entries))
    }

    pub fn live(state_file: PathBuf, quality: &str) -> Self {
        PlaylistSource::Live {
            state_file,
            quality: quality.to_string(),
        }
    }

    /// The current CID list. May be empty in live mode before the first
    /// capture lands.
    pub fn entries(&self) -> anyhow::Result<Vec<String>> {
        match self {
            PlaylistSource::Static(entries) => Ok(entries.clone()),
            PlaylistSource::Live {
                state_file,
                quality,
            } => {
                let doc: SegmentStateDoc = read_json(state_file)?.unwrap_or_default();
                let Some(segments) = doc.qualities.get(quality) else {
                    return Ok(Vec::new());
                };
                Ok(sorted_by_time(segments)
                    .into_iter()
                    .map(|(_, record)| record.cid.clone())
                    .collect())
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PlaylistSource::Static(entries) => {
                format!("static virtual playlist ({} segments)", entries.len())
            }
            PlaylistSource::Live { quality, .. } => {
                format!("live capture document (quality {quality})")
            }
        }
    }
}
