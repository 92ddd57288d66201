//! Key-message formatting.
use serde::Serialize;

use crate::error::{Result, SecureSyncError};

/// ISOBMFF-ish media handler type, matching the original `av_get_media_type_string`
/// categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl CodecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::Video => "video",
            CodecType::Audio => "audio",
            CodecType::Subtitle => "subtitle",
            CodecType::Data => "data",
            CodecType::Attachment => "attachment",
            CodecType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FragmentInfo {
    pub track_id: i32,
    pub media_time_secs: f64,
    pub first_pts: i64,
    pub duration: i64,
    pub timescale: u32,
    pub codec_id: i32,
    pub codec_type: CodecType,
    pub bitrate: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyMessage {
    pub creation_time: i64,
    pub fragment_info: FragmentInfo,
    pub key_id: u64,
    pub key: String,
    pub iv: String,
}

/// Cap matching `EXMG_MESSAGE_BUFFER_SIZE` in the source: a message this long
/// indicates a misbehaving caller (huge codec ids, etc.), treated as fatal.
pub const MESSAGE_BUFFER_SIZE: usize = 4096;

impl KeyMessage {
    pub fn new(
        creation_time_micros: i64,
        fragment_info: FragmentInfo,
        key_id: u64,
        key: u32,
        iv: u32,
    ) -> Self {
        KeyMessage {
            creation_time: creation_time_micros,
            fragment_info,
            key_id,
            key: format!("0x{:08X}", key),
            iv: format!("0x{:08X}", iv),
        }
    }

    /// Serialize to a zero-terminated UTF-8 byte buffer, matching the
    /// `strlen + 1`-sized transport contract the MQTT/file-sink side expects.
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>> {
        let mut text = serde_json::to_string(self)
            .map_err(|e| SecureSyncError::MessageFormat(e.to_string()))?;
        if text.len() + 1 > MESSAGE_BUFFER_SIZE {
            return Err(SecureSyncError::MessageFormat(format!(
                "message exceeds {} byte buffer ({} bytes)",
                MESSAGE_BUFFER_SIZE,
                text.len()
            )));
        }
        text.push('\0');
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_fragment_info() -> FragmentInfo {
        FragmentInfo {
            track_id: 1,
            media_time_secs: 0.0,
            first_pts: 0,
            duration: 2000,
            timescale: 1000,
            codec_id: 27,
            codec_type: CodecType::Video,
            bitrate: 500_000,
        }
    }

    #[test]
    fn formats_deterministically_except_creation_time() {
        let a = KeyMessage::new(1000, sample_fragment_info(), 1, 0x1234, 0).to_wire_bytes().unwrap();
        let b = KeyMessage::new(2000, sample_fragment_info(), 1, 0x1234, 0).to_wire_bytes().unwrap();
        // Strip creation_time before comparing; everything else must match byte-for-byte.
        let strip = |buf: &[u8]| -> String {
            let s = String::from_utf8_lossy(buf).trim_end_matches('\0').to_string();
            let v: serde_json::Value = serde_json::from_str(&s).unwrap();
            let mut v = v;
            v.as_object_mut().unwrap().remove("creation_time");
            v.to_string()
        };
        assert_eq!(strip(&a), strip(&b));
    }

    #[test]
    fn null_terminated_wire_bytes() {
        let bytes = KeyMessage::new(0, sample_fragment_info(), 1, 0, 0).to_wire_bytes().unwrap();
        assert_eq!(*bytes.last().unwrap(), 0u8);
    }

    #[test]
    fn key_and_iv_are_zero_padded_hex() {
        let msg = KeyMessage::new(0, sample_fragment_info(), 1, 0x00AB, 0);
        assert_eq!(msg.key, "0x000000AB");
        assert_eq!(msg.iv, "0x00000000");
    }
}
