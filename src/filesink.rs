//! File Sink: writes a fully-formed key-message to a path derived from
//! track id, codec type, and media time.
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SecureSyncError};
use crate::logging::log_info;
use crate::muxer::TrackMeta;

/// Build a unique path under `basepath` from the scope's media time only.
/// Kept for callers with no track context; prefer `publish_to_file_for_track`
/// whenever a `TrackMeta` is available so the path is unique per track/codec.
pub fn publish_to_file(basepath: &str, media_time: i64, message_bytes: &[u8]) -> Result<()> {
    let path = key_message_path(basepath, media_time);
    write_message(&path, message_bytes)
}

/// Build a unique path under `basepath` from track id, codec type, and
/// media time, and write the message there.
pub fn publish_to_file_for_track(
    basepath: &str,
    track: &TrackMeta,
    media_time: i64,
    message_bytes: &[u8],
) -> Result<()> {
    let path = key_message_path_for_track(basepath, track, media_time);
    write_message(&path, message_bytes)
}

fn key_message_path(basepath: &str, media_time: i64) -> PathBuf {
    Path::new(basepath).join(format!("key-message-{media_time}.json"))
}

fn key_message_path_for_track(basepath: &str, track: &TrackMeta, media_time: i64) -> PathBuf {
    Path::new(basepath).join(format!(
        "key-message-track{}-{}-{media_time}.json",
        track.track_id,
        track.codec_type.as_str(),
    ))
}

fn write_message(path: &Path, message_bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SecureSyncError::FileSink(e.to_string()))?;
    }
    fs::write(path, message_bytes).map_err(|e| SecureSyncError::FileSink(e.to_string()))?;
    log_info!("SECURESYNC", "wrote key-message to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn writes_message_under_basepath() {
        let dir = std::env::temp_dir().join(format!("secure-sync-test-{}", std::process::id()));
        let basepath = dir.to_str().unwrap().to_string();
        publish_to_file(&basepath, 1234, b"hello\0").unwrap();
        let contents = fs::read(key_message_path(&basepath, 1234)).unwrap();
        assert_eq!(contents, b"hello\0");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn track_aware_path_includes_track_id_and_codec_type() {
        use crate::message::CodecType;

        let dir = std::env::temp_dir().join(format!("secure-sync-test-track-{}", std::process::id()));
        let basepath = dir.to_str().unwrap().to_string();
        let track = TrackMeta {
            frag_start: 0,
            end_pts: 2000,
            timescale: 1000,
            track_id: 7,
            codec_id: 27,
            codec_type: CodecType::Video,
            bit_rate: 500_000,
        };
        publish_to_file_for_track(&basepath, &track, 1234, b"hello\0").unwrap();
        let path = key_message_path_for_track(&basepath, &track, 1234);
        assert!(path.to_str().unwrap().contains("track7"));
        assert!(path.to_str().unwrap().contains("video"));
        let contents = fs::read(&path).unwrap();
        assert_eq!(contents, b"hello\0");
        let _ = fs::remove_dir_all(&dir);
    }
}
