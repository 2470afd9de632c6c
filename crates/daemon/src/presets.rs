//! Preset catalog
//!
//! Static mapping from a resolution key to the transcoding parameters handed to
//! the engine. Every preset re-encodes; `original` only drops the scaling and
//! bitrate constraints.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key selecting a preset, as accepted at the upload boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresetKey {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(rename = "original")]
    Original,
}

impl PresetKey {
    pub const ALL: [PresetKey; 3] = [PresetKey::Hd720, PresetKey::FullHd1080, PresetKey::Original];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresetKey::Hd720 => "720p",
            PresetKey::FullHd1080 => "1080p",
            PresetKey::Original => "original",
        }
    }
}

impl Default for PresetKey {
    fn default() -> Self {
        Self::FullHd1080
    }
}

impl fmt::Display for PresetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetKey {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| JobError::InvalidPreset(s.to_string()))
    }
}

/// Bounding box the output is scaled into, preserving aspect ratio and
/// orientation (never upscales)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleBox {
    pub max_width: u32,
    pub max_height: u32,
}

impl ScaleBox {
    /// ffmpeg `scale` filter expression for this box
    pub fn filter(&self) -> String {
        format!(
            "scale=min({w}\\,iw):min({h}\\,ih):force_original_aspect_ratio=decrease:force_divisible_by=2",
            w = self.max_width,
            h = self.max_height
        )
    }
}

/// Transcoding parameters for one preset
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub key: PresetKey,
    /// None keeps the source resolution
    pub scale: Option<ScaleBox>,
    /// None leaves the video bitrate unconstrained (CRF only)
    pub video_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: u32,
    pub crf: u8,
    /// x264 speed/quality trade-off
    pub speed: &'static str,
    pub description: &'static str,
}

static HD_720: Preset = Preset {
    key: PresetKey::Hd720,
    scale: Some(ScaleBox {
        max_width: 1280,
        max_height: 720,
    }),
    video_bitrate_kbps: Some(2500),
    audio_bitrate_kbps: 128,
    crf: 23,
    speed: "medium",
    description: "HD 720p - optimized for social media (preserves orientation)",
};

static FULL_HD_1080: Preset = Preset {
    key: PresetKey::FullHd1080,
    scale: Some(ScaleBox {
        max_width: 1920,
        max_height: 1080,
    }),
    video_bitrate_kbps: Some(5000),
    audio_bitrate_kbps: 192,
    crf: 23,
    speed: "medium",
    description: "Full HD 1080p - high quality for reels (preserves orientation)",
};

static ORIGINAL: Preset = Preset {
    key: PresetKey::Original,
    scale: None,
    video_bitrate_kbps: None,
    audio_bitrate_kbps: 192,
    crf: 23,
    speed: "medium",
    description: "Original resolution - quality compression only (preserves orientation)",
};

impl Preset {
    pub fn for_key(key: PresetKey) -> &'static Preset {
        match key {
            PresetKey::Hd720 => &HD_720,
            PresetKey::FullHd1080 => &FULL_HD_1080,
            PresetKey::Original => &ORIGINAL,
        }
    }
}
