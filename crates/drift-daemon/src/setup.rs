//! The setup processor: transcode the configured track set once, pin every
//! segment, and emit the manifest plus the concatenated virtual playlist.
//!
//! Transcoding is gated on the config hash. A boot with an unchanged
//! configuration only re-renders `playlist.m3u` from the manifest.

use crate::cas::CasClient;
use crate::chunker;
use anyhow::Context;
use chrono::Utc;
use drift_core::config::{config_hash, PlaylistConfig, PlaylistMode, SetupConfig};
use drift_core::env::NodeEnv;
use drift_core::hls;
use drift_core::manifest::{Manifest, SegmentRef, TrackEntry, TrackKind};
use drift_core::state::{write_json_atomic, write_text_atomic};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a"];

pub struct SetupProcessor {
    env: NodeEnv,
    setup: SetupConfig,
    playlist: PlaylistConfig,
    cas: CasClient,
}

impl SetupProcessor {
    pub fn new(env: NodeEnv, setup: SetupConfig, playlist: PlaylistConfig, cas: CasClient) -> Self {
        Self {
            env,
            setup,
            playlist,
            cas,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.env.processed_dir).await?;
        tokio::fs::create_dir_all(&self.env.state_dir).await?;

        let hash = config_hash(&self.setup, &self.playlist);
        let manifest_path = self.env.manifest_file();

        match Manifest::load(&manifest_path)? {
            Some(manifest)
                if !needs_rebuild(Some(&manifest), &hash, self.setup.processing.force_rebuild) =>
            {
                info!("configuration unchanged, regenerating playlist from manifest");
                self.write_playlist(&manifest).await?;
                return Ok(());
            }
            _ => {}
        }

        if self.setup.processing.force_rebuild {
            info!("force rebuild enabled");
        }

        let source_root = self.env.workspace_dir.join(&self.playlist.source);
        let music_files = collect_tracks(&source_root, &self.playlist);
        anyhow::ensure!(!music_files.is_empty(), "no music files found");
        info!("found {} music files", music_files.len());

        let mut tracks = Vec::with_capacity(music_files.len());
        for (index, file) in music_files.iter().enumerate() {
            info!(
                "processing track {}/{}: {}",
                index + 1,
                music_files.len(),
                file.display()
            );
            let entry = self
                .process_file(file, index, TrackKind::Track)
                .await
                .with_context(|| format!("processing {}", file.display()))?;
            tracks.push(entry);
        }

        let jingle_files = self.collect_jingles();
        let mut jingles = Vec::new();
        for (index, file) in jingle_files.iter().enumerate() {
            info!(
                "processing jingle {}/{}: {}",
                index + 1,
                jingle_files.len(),
                file.display()
            );
            match self.process_file(file, index, TrackKind::Jingle).await {
                Ok(entry) => jingles.push(entry),
                Err(e) => warn!("skipping jingle {}: {e:#}", file.display()),
            }
        }

        let manifest = Manifest {
            config_hash: hash,
            timestamp: Utc::now().timestamp(),
            tracks,
            jingles,
            audio_config: self.setup.audio.clone(),
            jingles_config: self.setup.jingles.clone(),
        };

        self.write_playlist(&manifest).await?;
        write_json_atomic(&manifest_path, &manifest).await?;
        info!(
            "setup complete: {} tracks, {} jingles, {} segments",
            manifest.tracks.len(),
            manifest.jingles.len(),
            manifest.total_segments()
        );
        Ok(())
    }

    async fn write_playlist(&self, manifest: &Manifest) -> anyhow::Result<()> {
        let text = hls::virtual_playlist(
            &manifest.tracks,
            &manifest.jingles,
            &manifest.audio_config,
            &manifest.jingles_config,
        );
        let path = self.env.playlist_file();
        write_text_atomic(&path, &text).await?;
        info!("virtual playlist written to {}", path.display());
        Ok(())
    }

    /// Chunk one source file and pin every produced segment. Any failure
    /// here is fatal for tracks; jingle callers downgrade it to a warning.
    async fn process_file(
        &self,
        file: &Path,
        index: usize,
        kind: TrackKind,
    ) -> anyhow::Result<TrackEntry> {
        let duration = chunker::probe_duration(file).await?;
        info!("duration: {duration:.1}s");

        let out_dir = self
            .env
            .processed_dir
            .join(format!("{}_{index:03}", kind.prefix()));
        let chunked = chunker::chunk(file, &out_dir, &self.setup.audio).await?;
        info!("created {} segments", chunked.segments.len());

        let mut segments = Vec::with_capacity(chunked.segments.len());
        for segment in &chunked.segments {
            let filename = segment
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let data = tokio::fs::read(segment).await?;
            let cid = self
                .cas
                .add(data, &filename, self.setup.ipfs.pin_segments)
                .await
                .with_context(|| format!("uploading {filename}"))?;
            info!("  {filename} -> {cid}");
            segments.push(SegmentRef { filename, cid });
        }

        let output_dir = out_dir
            .strip_prefix(&self.env.processed_dir)
            .unwrap_or(&out_dir)
            .to_string_lossy()
            .into_owned();

        Ok(TrackEntry {
            filename: file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind,
            base_name: chunked.base_name,
            segment_count: segments.len(),
            segments,
            output_dir,
        })
    }

    fn collect_jingles(&self) -> Vec<PathBuf> {
        if !self.setup.jingles.enabled {
            return Vec::new();
        }
        let dir = self.env.workspace_dir.join(&self.setup.jingles.source);
        if !dir.is_dir() {
            warn!("jingles directory {} does not exist", dir.display());
            return Vec::new();
        }
        scan_audio(&dir, false)
    }
}

pub fn needs_rebuild(manifest: Option<&Manifest>, current_hash: &str, force: bool) -> bool {
    if force {
        return true;
    }
    match manifest {
        None => true,
        Some(m) => m.config_hash != current_hash,
    }
}

/// Enumerate the track files in the order they will appear in the manifest.
pub fn collect_tracks(source_root: &Path, config: &PlaylistConfig) -> Vec<PathBuf> {
    if !source_root.is_dir() {
        warn!("source path {} does not exist", source_root.display());
        return Vec::new();
    }

    let recursive = config.options.scan_subdirectories;
    match config.effective_mode() {
        PlaylistMode::Ordered => resolve_listed(source_root, &config.tracks, recursive),
        PlaylistMode::Auto => {
            let mut files = scan_audio(source_root, recursive);
            if config.options.sort_alphabetically {
                files.sort();
            }
            if config.options.shuffle_on_build {
                files.shuffle(&mut rand::thread_rng());
            }
            files
        }
        PlaylistMode::All => {
            let mut files = resolve_listed(source_root, &config.tracks, recursive);
            let mut rest = scan_audio(source_root, recursive);
            rest.sort();
            for file in rest {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
            files
        }
    }
}

/// Look each listed name up at the root first, then (when recursion is on)
/// anywhere under it; first match wins, missing tracks are skipped.
fn resolve_listed(source_root: &Path, tracks: &[String], recursive: bool) -> Vec<PathBuf> {
    let deep: Vec<PathBuf> = if recursive {
        let mut deep = scan_audio(source_root, true);
        deep.sort();
        deep
    } else {
        Vec::new()
    };

    let mut files = Vec::new();
    for name in tracks {
        let direct = source_root.join(name);
        if direct.is_file() {
            files.push(direct);
            continue;
        }
        let found = deep
            .iter()
            .find(|p| p.file_name().is_some_and(|f| f.to_string_lossy() == name.as_str()));
        match found {
            Some(path) => files.push(path.clone()),
            None => warn!("track not found: {name}"),
        }
    }
    files
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// All audio files under `dir`, in filesystem discovery order. Callers that
/// need a stable order sort the result themselves.
fn scan_audio(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if is_audio(&path) {
                files.push(path);
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::config::{AudioConfig, JinglesConfig};

    fn manifest_with_hash(hash: &str) -> Manifest {
        Manifest {
            config_hash: hash.to_string(),
            timestamp: 0,
            tracks: Vec::new(),
            jingles: Vec::new(),
            audio_config: AudioConfig::default(),
            jingles_config: JinglesConfig::default(),
        }
    }

    #[test]
    fn rebuild_gate() {
        let m = manifest_with_hash("abc");
        // Matching hash: cache hit, the transcoder is not invoked.
        assert!(!needs_rebuild(Some(&m), "abc", false));
        // Hash mismatch, missing manifest, or force: rebuild.
        assert!(needs_rebuild(Some(&m), "def", false));
        assert!(needs_rebuild(None, "abc", false));
        assert!(needs_rebuild(Some(&m), "abc", true));
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn names(files: &[std::path::PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn auto_mode_discovers_audio_files_and_sorts_on_request() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mp3"));
        touch(&dir.path().join("a.flac"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("sub/c.wav"));

        // Default: discovery order, whatever the filesystem yields.
        let config = PlaylistConfig::default();
        let mut found = names(&collect_tracks(dir.path(), &config));
        found.sort();
        assert_eq!(found, ["a.flac", "b.mp3", "c.wav"]);

        // Alphabetical order is opt-in.
        let mut config = PlaylistConfig::default();
        config.options.sort_alphabetically = true;
        assert_eq!(
            names(&collect_tracks(dir.path(), &config)),
            ["a.flac", "b.mp3", "c.wav"]
        );
    }

    #[test]
    fn auto_mode_respects_recursion_flag() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("sub/b.mp3"));

        let mut config = PlaylistConfig::default();
        config.options.scan_subdirectories = false;
        let files = collect_tracks(dir.path(), &config);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.mp3"));
    }

    #[test]
    fn ordered_mode_keeps_listed_order_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("z.mp3"));
        touch(&dir.path().join("deep/a.mp3"));

        let mut config = PlaylistConfig::default();
        config.tracks = vec!["z.mp3".into(), "ghost.mp3".into(), "a.mp3".into()];
        // z first as listed, ghost skipped, a found by recursive search.
        assert_eq!(
            names(&collect_tracks(dir.path(), &config)),
            ["z.mp3", "a.mp3"]
        );
    }

    #[test]
    fn all_mode_appends_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("b.mp3"));
        touch(&dir.path().join("c.mp3"));

        let mut config = PlaylistConfig::default();
        config.tracks = vec!["c.mp3".into()];
        config.mode = Some(PlaylistMode::All);
        assert_eq!(
            names(&collect_tracks(dir.path(), &config)),
            ["c.mp3", "a.mp3", "b.mp3"]
        );
    }

    #[test]
    fn missing_source_yields_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlaylistConfig::default();
        assert!(collect_tracks(&dir.path().join("nope"), &config).is_empty());
    }
}
