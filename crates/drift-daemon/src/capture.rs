//! Live capture: watch the HLS directory for segments finished by an
//! external encoder, pin each one, and keep the bounded segment ledger
//! that the live streamer and cleanup read.

use crate::cas::CasClient;
use anyhow::Context;
use chrono::Utc;
use drift_core::env::NodeEnv;
use drift_core::state::{
    read_json, sorted_by_time, write_json_atomic, SegmentMap, SegmentRecord, SegmentStateDoc,
    UploadLogEntry,
};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// The only quality the encoder emits; other prefixes are ignored.
pub const CAPTURED_QUALITY: &str = "stream";

/// A segment is ingested once its writer is done with it: closed after a
/// write, or renamed into place. Plain create/modify events still show a
/// half-written file.
pub fn is_segment_ready(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Drop the oldest entries beyond `max`; returns what was dropped.
/// Unpinning the dropped blobs is the cleanup service's job.
pub fn trim_bucket(bucket: &mut SegmentMap, max: usize) -> Vec<String> {
    if bucket.len() <= max {
        return Vec::new();
    }
    let excess = bucket.len() - max;
    let victims: Vec<String> = sorted_by_time(bucket)
        .into_iter()
        .take(excess)
        .map(|(name, _)| name.clone())
        .collect();
    for name in &victims {
        bucket.remove(name);
    }
    victims
}

pub struct HlsCapture {
    env: NodeEnv,
    cas: CasClient,
    max_segments: usize,
    doc: SegmentStateDoc,
}

impl HlsCapture {
    pub fn new(env: NodeEnv, cas: CasClient, max_segments: usize) -> Self {
        Self {
            env,
            cas,
            max_segments,
            doc: SegmentStateDoc::default(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let identity = self
            .cas
            .identity()
            .await
            .context("content store is not reachable")?;
        info!("connected to store node {}...", identity.short_id());

        tokio::fs::create_dir_all(&self.env.hls_dir).await?;
        self.doc = read_json(&self.env.segments_file())?.unwrap_or_default();

        self.scan_existing().await?;

        let (tx, mut rx) = tokio::sync::mpsc::channel::<notify::Result<notify::Event>>(256);
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = tx.blocking_send(result);
        })?;
        watcher.watch(&self.env.hls_dir, RecursiveMode::NonRecursive)?;
        info!("watching {} for new segments", self.env.hls_dir.display());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                received = rx.recv() => {
                    let Some(result) = received else {
                        warn!("watcher channel closed");
                        break;
                    };
                    let mut candidates = event_paths(result);
                    // Drain whatever else is queued so one save covers the
                    // whole batch.
                    while let Ok(more) = rx.try_recv() {
                        candidates.extend(event_paths(more));
                    }
                    candidates.sort();
                    candidates.dedup();

                    let mut dirty = false;
                    for path in candidates {
                        dirty |= self.ingest(&path).await;
                    }
                    if dirty {
                        self.save().await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Upload segments that landed while the service was down.
    async fn scan_existing(&mut self) -> anyhow::Result<()> {
        debug!("scanning for existing segments");
        let mut dirty = false;
        let mut count = 0usize;
        let mut entries = tokio::fs::read_dir(&self.env.hls_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if self.ingest(&entry.path()).await {
                dirty = true;
                count += 1;
            }
        }
        if dirty {
            self.save().await;
        }
        info!("processed {count} existing segments");
        Ok(())
    }

    /// Returns true when the segment document changed.
    async fn ingest(&mut self, path: &Path) -> bool {
        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return false;
        };
        if !filename.ends_with(".ts") {
            return false;
        }
        let quality = filename.split('_').next().unwrap_or_default();
        if quality != CAPTURED_QUALITY {
            debug!("ignoring segment with unknown quality: {filename}");
            return false;
        }
        if self
            .doc
            .qualities
            .get(CAPTURED_QUALITY)
            .is_some_and(|bucket| bucket.contains_key(&filename))
        {
            return false;
        }

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if size == 0 {
            warn!("skipping empty segment {filename}");
            return false;
        }
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("cannot read {filename}: {e}");
                return false;
            }
        };

        let cid = match self.cas.add(data, &filename, true).await {
            Ok(cid) => cid,
            Err(e) => {
                warn!("failed to upload {filename}: {e}");
                return false;
            }
        };
        info!("uploaded {filename} -> {cid} ({size} bytes)");

        let uploaded_at = Utc::now();
        let record = SegmentRecord {
            cid: cid.clone(),
            timestamp: uploaded_at.timestamp(),
            size,
            node_id: self.env.node_id.clone(),
        };
        let max_segments = self.max_segments;
        let bucket = self
            .doc
            .qualities
            .entry(CAPTURED_QUALITY.to_string())
            .or_default();
        bucket.insert(filename.clone(), record);
        for dropped in trim_bucket(bucket, max_segments) {
            debug!("dropped {dropped} from state (over segment cap)");
        }

        self.append_upload_log(&UploadLogEntry {
            filename,
            cid,
            size,
            node_id: self.env.node_id.clone(),
            uploaded_at,
        })
        .await;
        true
    }

    async fn append_upload_log(&self, entry: &UploadLogEntry) {
        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };
        let path = self.env.hashes_log_file();
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    warn!("failed to append upload log: {e}");
                }
            }
            Err(e) => warn!("cannot open {}: {e}", path.display()),
        }
    }

    async fn save(&self) {
        if let Err(e) = write_json_atomic(&self.env.segments_file(), &self.doc).await {
            warn!("failed to save segment state: {e:#}");
        }
    }
}

fn event_paths(result: notify::Result<notify::Event>) -> Vec<PathBuf> {
    match result {
        Ok(event) if is_segment_ready(&event.kind) => event.paths,
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!("watch error: {e}");
            Vec::new()
        }
    }
}
