//! The sliding-window streamer: every tick, publish the current window of
//! the virtual playlist under this node's stream name.
//!
//! The persisted sequence counter is the HLS MEDIA-SEQUENCE of the window's
//! first segment. It only ever grows, and only after the state file write
//! succeeds, so a crash or a failed tick can never rewind the stream.

use crate::cas::CasClient;
use crate::keys::KeyStore;
use crate::source::PlaylistSource;
use anyhow::Context;
use chrono::Utc;
use drift_core::config::{StreamSource, StreamingConfig};
use drift_core::env::NodeEnv;
use drift_core::hls;
use drift_core::state::{write_json_atomic, SequenceState, StreamInfo};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Advertised bandwidth/codec for the capture-mode master playlist.
const MASTER_BANDWIDTH: u32 = 200_000;
const MASTER_CODECS: &str = "mp4a.40.2";

/// The window of `size` entries starting at `sequence`, modulo the playlist
/// length. The identity `window[i] = entries[(sequence + i) % len]` is what
/// gives consecutive playlists their overlap.
pub fn window(entries: &[String], sequence: u64, size: usize) -> Vec<String> {
    if entries.is_empty() {
        return Vec::new();
    }
    let len = entries.len() as u64;
    (0..size as u64)
        .map(|i| entries[((sequence + i) % len) as usize].clone())
        .collect()
}

/// Decouples republish frequency from content-advance frequency: the window
/// moves one segment every `advance_every` republishes.
#[derive(Debug)]
pub struct Cadence {
    advance_every: u32,
    counter: u32,
}

impl Cadence {
    pub fn new(advance_every: u32) -> Self {
        Self {
            advance_every: advance_every.max(1),
            counter: 0,
        }
    }

    /// Count one republish; true when a content advance is due. Stays due
    /// until `reset`, so a failed persist is retried next tick.
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        self.counter >= self.advance_every
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

pub struct Streamer {
    env: NodeEnv,
    config: StreamingConfig,
    cas: CasClient,
    source: PlaylistSource,
    stream_key: String,
    master_key: Option<String>,
    state: SequenceState,
    cadence: Cadence,
    segment_duration: u32,
}

impl Streamer {
    /// Provision the node's keys and restore the sequence counter. Key
    /// provisioning failure is terminal; the caller exits and retries on
    /// the next boot.
    pub async fn init(
        env: NodeEnv,
        config: StreamingConfig,
        cas: CasClient,
        source: PlaylistSource,
        segment_duration: u32,
    ) -> anyhow::Result<Self> {
        let mut keys = KeyStore::load(env.ipns_keys_file());

        let stream_key = format!("{}-stream", env.node_id);
        keys.ensure(&cas, &stream_key)
            .await
            .context("provisioning the stream key")?;

        let master_key = if config.streaming.source == StreamSource::Capture {
            let name = format!("{}-master", env.node_id);
            keys.ensure(&cas, &name)
                .await
                .context("provisioning the master key")?;
            Some(name)
        } else {
            None
        };

        let state = SequenceState::load_or_init(&env.sequence_state_file(), Utc::now());
        info!("restored sequence state: sequence={}", state.sequence);

        let cadence = Cadence::new(config.streaming.advance_every);
        Ok(Self {
            env,
            config,
            cas,
            source,
            stream_key,
            master_key,
            state,
            cadence,
            segment_duration,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let period = Duration::from_secs(self.config.streaming.update_interval.max(1));
        let mut ticker = tokio::time::interval(period);
        // A slow tick just delays the next one; ticks are never re-entered.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "streaming loop started: republish every {}s, advance every {} republishes, {}",
            period.as_secs(),
            self.config.streaming.advance_every,
            self.source.describe()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(sequence) => debug!("stream updated, sequence {sequence}"),
                        Err(e) => warn!("stream update failed: {e:#}"),
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

    /// One publish cycle. Any failure aborts the tick before the advance,
    /// leaving the sequence untouched for the retry.
    pub async fn tick(&mut self) -> anyhow::Result<u64> {
        let entries = self.source.entries()?;
        anyhow::ensure!(
            !entries.is_empty(),
            "no segments available from {}",
            self.source.describe()
        );

        let cids = window(&entries, self.state.sequence, self.config.streaming.max_segments);
        let playlist = hls::media_playlist(
            self.state.sequence,
            &cids,
            self.state.epoch,
            self.segment_duration,
        );

        let playlist_cid = self
            .cas
            .add(playlist.into_bytes(), "stream.m3u8", true)
            .await
            .context("uploading playlist")?;
        let stream_name = self
            .cas
            .name_publish(
                &self.stream_key,
                &playlist_cid,
                &self.config.ipns.lifetime,
                &self.config.ipns.ttl,
                self.config.ipns.allow_offline,
            )
            .await
            .context("publishing stream name")?;
        debug!("published /ipns/{stream_name} -> /ipfs/{playlist_cid}");

        // The master playlist is display plumbing; its failure does not
        // abort the tick.
        let master_name = match &self.master_key {
            Some(key) => match self.publish_master(key, &stream_name).await {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!("master playlist publish failed: {e:#}");
                    None
                }
            },
            None => None,
        };

        self.write_stream_info(&stream_name, master_name, entries.len())
            .await;
        self.advance().await;
        Ok(self.state.sequence)
    }

    async fn publish_master(&self, key: &str, stream_name: &str) -> anyhow::Result<String> {
        let text = hls::master_playlist(stream_name, MASTER_BANDWIDTH, MASTER_CODECS);
        let cid = self
            .cas
            .add(text.into_bytes(), "master.m3u8", true)
            .await
            .context("uploading master playlist")?;
        let name = self
            .cas
            .name_publish(
                key,
                &cid,
                &self.config.ipns.lifetime,
                &self.config.ipns.ttl,
                self.config.ipns.allow_offline,
            )
            .await
            .context("publishing master name")?;
        Ok(name)
    }

    async fn write_stream_info(
        &self,
        stream_name: &str,
        master_name: Option<String>,
        total_entries: usize,
    ) {
        let master_playlist_url = master_name
            .as_deref()
            .map(|name| self.env.gateway_ipns_url(name));
        let info = StreamInfo {
            stream_playlist_ipns: stream_name.to_string(),
            stream_playlist_url: self.env.gateway_ipns_url(stream_name),
            sequence_number: self.state.sequence,
            playlist_position: self.state.sequence % total_entries.max(1) as u64,
            updated_at: Utc::now(),
            node_id: self.env.node_id.clone(),
            master_playlist_ipns: master_name,
            master_playlist_url,
        };
        if let Err(e) = write_json_atomic(&self.env.stream_info_file(), &info).await {
            error!("failed to write stream info: {e:#}");
        }
    }

    /// Advance the window when due. The in-memory counter moves only after
    /// the state file is safely on disk.
    async fn advance(&mut self) {
        if !self.cadence.tick() {
            debug!("playlist refreshed (no advance)");
            return;
        }
        let next = self.state.advanced(Utc::now());
        match write_json_atomic(&self.env.sequence_state_file(), &next).await {
            Ok(()) => {
                self.state = next;
                self.cadence.reset();
                debug!("advanced to sequence {}", self.state.sequence);
            }
            Err(e) => error!("failed to persist sequence state, not advancing: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Qm{i}")).collect()
    }

    #[test]
    fn window_is_the_modulo_slice() {
        let playlist = entries(10);
        assert_eq!(window(&playlist, 0, 4), ["Qm0", "Qm1", "Qm2", "Qm3"]);
        assert_eq!(window(&playlist, 8, 4), ["Qm8", "Qm9", "Qm0", "Qm1"]);
        // The sequence is never truncated modulo the length in storage;
        // only the read wraps.
        assert_eq!(window(&playlist, 103, 2), ["Qm3", "Qm4"]);
    }

    #[test]
    fn consecutive_windows_overlap() {
        let playlist = entries(10);
        for sequence in [0u64, 7, 9, 42] {
            let current = window(&playlist, sequence, 4);
            let next = window(&playlist, sequence + 1, 4);
            assert_eq!(current[1..], next[..3]);
        }
    }

    #[test]
    fn window_wraps_short_playlists() {
        let playlist = entries(3);
        assert_eq!(window(&playlist, 0, 5), ["Qm0", "Qm1", "Qm2", "Qm0", "Qm1"]);
        assert!(window(&[], 5, 3).is_empty());
    }

    #[test]
    fn advance_cadence() {
        // Republish every 2 s, advance every 2 republishes: emits at
        // t=0,2,4,6 carry sequences 0,0,1,1.
        let playlist = entries(10);
        let mut cadence = Cadence::new(2);
        let mut sequence = 0u64;
        let mut published = Vec::new();
        for _ in 0..4 {
            published.push((sequence, window(&playlist, sequence, 4)));
            if cadence.tick() {
                sequence += 1;
                cadence.reset();
            }
        }
        let sequences: Vec<u64> = published.iter().map(|(s, _)| *s).collect();
        assert_eq!(sequences, [0, 0, 1, 1]);
        // URIs shift by one starting at the third emit.
        assert_eq!(published[0].1, published[1].1);
        assert_eq!(published[1].1[1..], published[2].1[..3]);
    }

    #[test]
    fn cadence_stays_due_until_reset() {
        let mut cadence = Cadence::new(2);
        assert!(!cadence.tick());
        assert!(cadence.tick());
        // Persist failed: no reset, still due next republish.
        assert!(cadence.tick());
        cadence.reset();
        assert!(!cadence.tick());
    }
}
