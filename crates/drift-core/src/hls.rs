//! HLS playlist text: the on-disk virtual playlist, the published media
//! playlist, and the capture-mode master playlist.

use crate::config::{AudioConfig, JinglesConfig};
use crate::manifest::TrackEntry;
use chrono::{DateTime, Duration, Utc};

/// Build the concatenated virtual playlist from processed tracks.
///
/// Tracks appear in manifest order. With jingles enabled and a cycle of `k`,
/// one jingle (round-robin over the jingle set) is inserted after every `k`
/// tracks, starting after the `k`-th.
pub fn virtual_playlist(
    tracks: &[TrackEntry],
    jingles: &[TrackEntry],
    audio: &AudioConfig,
    jingles_cfg: &JinglesConfig,
) -> String {
    let mut lines = vec!["#EXTM3U".to_string()];

    let push_entry = |lines: &mut Vec<String>, entry: &TrackEntry| {
        for segment in &entry.segments {
            lines.push(format!("#EXTINF:{},", audio.segment_duration));
            lines.push(format!("/ipfs/{}", segment.cid));
        }
    };

    if !jingles_cfg.enabled || jingles.is_empty() || jingles_cfg.cycle == 0 {
        for track in tracks {
            push_entry(&mut lines, track);
        }
    } else {
        let mut jingle_index = 0usize;
        for (track_counter, track) in tracks.iter().enumerate() {
            if track_counter > 0 && track_counter % jingles_cfg.cycle == 0 {
                push_entry(&mut lines, &jingles[jingle_index % jingles.len()]);
                jingle_index += 1;
            }
            push_entry(&mut lines, track);
        }
    }

    lines.join("\n") + "\n"
}

/// Extract the CID sequence back out of a virtual playlist.
pub fn parse_cids(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("/ipfs/"))
        .map(str::to_string)
        .collect()
}

/// Render the published media playlist for one window.
///
/// PROGRAM-DATE-TIME is anchored: segment `i` of a window at sequence `S`
/// is stamped `epoch + (S+i)·segment_duration`, so republishing the same
/// sequence yields identical bytes and the timeline survives restarts.
pub fn media_playlist(
    sequence: u64,
    cids: &[String],
    epoch: DateTime<Utc>,
    segment_duration: u32,
) -> String {
    let mut lines = vec![
        "#EXTM3U".to_string(),
        "#EXT-X-VERSION:3".to_string(),
        format!("#EXT-X-TARGETDURATION:{}", segment_duration + 1),
        format!("#EXT-X-MEDIA-SEQUENCE:{}", sequence),
    ];

    for (i, cid) in cids.iter().enumerate() {
        let offset = (sequence + i as u64) * segment_duration as u64;
        let stamp = epoch + Duration::seconds(offset as i64);
        lines.push(format!(
            "#EXT-X-PROGRAM-DATE-TIME:{}",
            stamp.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        ));
        lines.push(format!("#EXTINF:{:.1},", segment_duration as f64));
        lines.push(format!("/ipfs/{}", cid));
    }

    lines.join("\n") + "\n"
}

/// Master playlist pointing at the stream's mutable name (capture mode).
pub fn master_playlist(stream_name: &str, bandwidth: u32, codecs: &str) -> String {
    format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"{}\"\n/ipns/{}\n",
        bandwidth, codecs, stream_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{SegmentRef, TrackKind};
    use chrono::TimeZone;

    fn entry(base: &str, kind: TrackKind, cids: &[&str]) -> TrackEntry {
        TrackEntry {
            filename: format!("{base}.wav"),
            kind,
            base_name: base.to_string(),
            segment_count: cids.len(),
            segments: cids
                .iter()
                .enumerate()
                .map(|(i, cid)| SegmentRef {
                    filename: format!("{base}_{i:03}.ts"),
                    cid: cid.to_string(),
                })
                .collect(),
            output_dir: format!("{}_000", kind.prefix()),
        }
    }

    fn audio() -> AudioConfig {
        AudioConfig::default()
    }

    #[test]
    fn concatenates_track_segments_without_jingles() {
        // A single 30 s source chunked at 6 s yields five entries.
        let tracks = vec![entry(
            "long",
            TrackKind::Track,
            &["Qm1", "Qm2", "Qm3", "Qm4", "Qm5"],
        )];
        let text = virtual_playlist(&tracks, &[], &audio(), &JinglesConfig::default());
        assert!(text.starts_with("#EXTM3U\n"));
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches("#EXTINF:6,").count(), 5);
        assert_eq!(parse_cids(&text), ["Qm1", "Qm2", "Qm3", "Qm4", "Qm5"]);
    }

    #[test]
    fn interleaves_one_jingle_per_cycle() {
        // Two 12 s tracks, one 6 s jingle, cycle 1: T1_0 T1_1 J0_0 T2_0 T2_1.
        let tracks = vec![
            entry("t1", TrackKind::Track, &["T1a", "T1b"]),
            entry("t2", TrackKind::Track, &["T2a", "T2b"]),
        ];
        let jingles = vec![entry("j0", TrackKind::Jingle, &["J0"])];
        let cfg = JinglesConfig {
            enabled: true,
            cycle: 1,
            ..JinglesConfig::default()
        };
        let text = virtual_playlist(&tracks, &jingles, &audio(), &cfg);
        assert_eq!(parse_cids(&text), ["T1a", "T1b", "J0", "T2a", "T2b"]);
    }

    #[test]
    fn jingles_cycle_round_robin() {
        // Cycle 2 over six tracks: the i-th jingle lands right before the
        // (2·(i+1))-th track.
        let tracks: Vec<_> = (0..6)
            .map(|i| entry(&format!("t{i}"), TrackKind::Track, &[&format!("T{i}")[..]]))
            .collect();
        let jingles = vec![
            entry("ja", TrackKind::Jingle, &["JA"]),
            entry("jb", TrackKind::Jingle, &["JB"]),
        ];
        let cfg = JinglesConfig {
            enabled: true,
            cycle: 2,
            ..JinglesConfig::default()
        };
        let text = virtual_playlist(&tracks, &jingles, &audio(), &cfg);
        assert_eq!(
            parse_cids(&text),
            ["T0", "T1", "JA", "T2", "T3", "JB", "T4", "T5"]
        );
    }

    #[test]
    fn disabled_jingles_are_ignored_even_if_present() {
        let tracks = vec![entry("t", TrackKind::Track, &["T"])];
        let jingles = vec![entry("j", TrackKind::Jingle, &["J"])];
        let text = virtual_playlist(&tracks, &jingles, &audio(), &JinglesConfig::default());
        assert_eq!(parse_cids(&text), ["T"]);
    }

    #[test]
    fn media_playlist_layout() {
        let epoch = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let cids = vec!["QmA".to_string(), "QmB".to_string()];
        let text = media_playlist(10, &cids, epoch, 6);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        assert_eq!(lines[2], "#EXT-X-TARGETDURATION:7");
        assert_eq!(lines[3], "#EXT-X-MEDIA-SEQUENCE:10");
        // Sequence 10 at 6 s per segment is one minute past the epoch.
        assert_eq!(lines[4], "#EXT-X-PROGRAM-DATE-TIME:2025-01-01T00:01:00.000Z");
        assert_eq!(lines[5], "#EXTINF:6.0,");
        assert_eq!(lines[6], "/ipfs/QmA");
        assert_eq!(lines[7], "#EXT-X-PROGRAM-DATE-TIME:2025-01-01T00:01:06.000Z");
        assert_eq!(lines[9], "/ipfs/QmB");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn republishing_the_same_sequence_is_byte_identical() {
        let epoch = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let cids = vec!["QmA".to_string()];
        assert_eq!(
            media_playlist(3, &cids, epoch, 6),
            media_playlist(3, &cids, epoch, 6)
        );
    }

    #[test]
    fn master_playlist_points_at_the_stream_name() {
        let text = master_playlist("k51abc", 200_000, "mp4a.40.2");
        assert!(text.contains("BANDWIDTH=200000"));
        assert!(text.contains("CODECS=\"mp4a.40.2\""));
        assert!(text.ends_with("/ipns/k51abc\n"));
    }
}
