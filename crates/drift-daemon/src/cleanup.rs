//! Periodic cleanup of live-captured segments: unpin and delete anything
//! past retention or beyond the per-quality cap, with occasional repo GC.

use crate::cas::CasClient;
use chrono::Utc;
use drift_core::env::{var_u64, NodeEnv};
use drift_core::state::{read_json, sorted_by_time, write_json_atomic, SegmentMap, SegmentStateDoc};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Repo GC runs once per this many cleanup cycles.
pub const GC_EVERY_CYCLES: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub max_segments: usize,
    pub retention_secs: i64,
    pub interval_secs: u64,
}

impl CleanupConfig {
    pub fn from_env() -> Self {
        Self {
            max_segments: var_u64("MAX_SEGMENTS", 50) as usize,
            retention_secs: var_u64("SEGMENT_RETENTION_TIME", 300) as i64,
            interval_secs: var_u64("CLEANUP_INTERVAL", 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Age,
    Count,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemovalReason::Age => "age",
            RemovalReason::Count => "count",
        })
    }
}

/// Which segments of one quality bucket should go: everything past
/// retention, plus the oldest overflow beyond `max_segments`, deduplicated.
pub fn plan_removals(
    segments: &SegmentMap,
    now: i64,
    retention_secs: i64,
    max_segments: usize,
) -> Vec<(String, RemovalReason)> {
    let ordered = sorted_by_time(segments);

    let mut plan: Vec<(String, RemovalReason)> = ordered
        .iter()
        .filter(|(_, record)| now - record.timestamp > retention_secs)
        .map(|(name, _)| ((*name).clone(), RemovalReason::Age))
        .collect();

    if ordered.len() > max_segments {
        let excess = ordered.len() - max_segments;
        for (name, _) in ordered.iter().take(excess) {
            if !plan.iter().any(|(planned, _)| planned == *name) {
                plan.push(((*name).clone(), RemovalReason::Count));
            }
        }
    }
    plan
}

pub struct SegmentCleaner {
    env: NodeEnv,
    cas: CasClient,
    config: CleanupConfig,
}

impl SegmentCleaner {
    pub fn new(env: NodeEnv, cas: CasClient, config: CleanupConfig) -> Self {
        Self { env, cas, config }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "cleanup service started: max {} segments, retention {}s, every {}s",
            self.config.max_segments, self.config.retention_secs, self.config.interval_secs
        );
        match self.cas.pin_ls().await {
            Ok(pinned) => info!("store currently holds {} recursive pins", pinned.len()),
            Err(e) => warn!("failed to list pins: {e}"),
        }
        self.report_storage().await;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        let mut gc_counter = 0u32;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("running cleanup cycle");
                    if let Err(e) = self.cycle().await {
                        warn!("cleanup cycle failed: {e:#}");
                    }
                    gc_counter += 1;
                    if gc_counter >= GC_EVERY_CYCLES {
                        gc_counter = 0;
                        info!("running repo garbage collection");
                        match self.cas.repo_gc().await {
                            Ok(()) => info!("garbage collection complete"),
                            Err(e) => warn!("garbage collection failed: {e}"),
                        }
                        self.report_storage().await;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn cycle(&mut self) -> anyhow::Result<()> {
        let path = self.env.segments_file();
        let Some(mut doc) = read_json::<SegmentStateDoc>(&path)? else {
            debug!("no segment state, nothing to clean up");
            return Ok(());
        };

        let now = Utc::now().timestamp();
        let mut removed = 0usize;
        let mut freed = 0u64;

        for (quality, segments) in doc.qualities.iter_mut() {
            if segments.is_empty() {
                continue;
            }
            debug!("checking {quality}: {} segments", segments.len());

            for (filename, reason) in plan_removals(
                segments,
                now,
                self.config.retention_secs,
                self.config.max_segments,
            ) {
                let Some(record) = segments.get(&filename).cloned() else {
                    continue;
                };
                // The entry outlives a failed unpin so a later cycle can
                // retry releasing the blob.
                match self.cas.unpin(&record.cid).await {
                    Ok(()) => {
                        self.delete_local(&filename).await;
                        segments.remove(&filename);
                        removed += 1;
                        freed += record.size;
                        info!(
                            "removed {filename} (reason: {reason}, age: {}s)",
                            now - record.timestamp
                        );
                    }
                    Err(e) => warn!("failed to unpin {}: {e}", record.cid),
                }
            }
        }

        if removed > 0 {
            write_json_atomic(&path, &doc).await?;
            info!(
                "cleanup complete: removed {removed} segments, freed ~{:.2} MiB",
                freed as f64 / (1024.0 * 1024.0)
            );
        } else {
            debug!("no segments needed cleanup");
        }
        Ok(())
    }

    async fn delete_local(&self, filename: &str) {
        let path = self.env.hls_dir.join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("deleted local file {filename}"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to delete {filename}: {e}"),
        }
    }

    async fn report_storage(&self) {
        match self.cas.repo_stat().await {
            Ok(stat) => info!(
                "storage: {:.2} MiB / {:.2} MiB, objects: {}",
                stat.repo_size as f64 / (1024.0 * 1024.0),
                stat.storage_max as f64 / (1024.0 * 1024.0),
                stat.num_objects
            ),
            Err(e) => warn!("failed to read storage stats: {e}"),
        }
    }
}
