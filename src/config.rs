// src/config.rs

//! Configuration consumed by the video layer.
//!
//! `VideoConfig` mirrors the user-facing video resources (preferred YUV
//! format, aspect handling, shared memory opt-out, explicit sync) and can be
//! deserialized from JSON. Missing fields take the defaults below.
//! `CanvasRequest` is what the emulation core asks for when it opens a
//! canvas: the size of its draw buffer and how it wants it scaled.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::VideoError;
use crate::geometry::{AspectPolicy, Scale, Size};
use crate::overlay::FourCc;

/// Lower and upper bound for the explicit aspect ratio.
pub const ASPECT_RATIO_MIN: f64 = 0.5;
pub const ASPECT_RATIO_MAX: f64 = 2.0;

/// Video output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Requested YUV format, e.g. "UYVY". Empty or malformed means no preference.
    pub fourcc: String,
    /// Explicit pixel aspect ratio, clamped to [0.5, 2.0] when used.
    pub aspect_ratio: f64,
    /// Keep the aspect ratio when the window is scaled.
    pub keep_aspect: bool,
    /// Use the emulated machine's real pixel aspect ratio.
    pub true_aspect: bool,
    /// Try MIT shared memory for backing stores.
    pub use_shm: bool,
    /// Wait for the server after every present. Slower, but deterministic.
    pub use_xsync: bool,
    /// Try hardware (XVideo) scaling.
    pub hw_scale: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            fourcc: String::new(),
            aspect_ratio: 1.0,
            keep_aspect: true,
            true_aspect: true,
            use_shm: true,
            use_xsync: true,
            hw_scale: true,
        }
    }
}

impl VideoConfig {
    /// Parses a JSON document; absent keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, VideoError> {
        serde_json::from_str(text).map_err(|e| VideoError::Config(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, VideoError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VideoError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// The requested fourcc, if the string is exactly four characters.
    pub fn requested_fourcc(&self) -> Option<FourCc> {
        self.fourcc.parse().ok()
    }

    /// The explicit ratio after clamping. Non-finite values fall back to 1.0.
    pub fn clamped_aspect_ratio(&self) -> f64 {
        if !self.aspect_ratio.is_finite() {
            return 1.0;
        }
        self.aspect_ratio.clamp(ASPECT_RATIO_MIN, ASPECT_RATIO_MAX)
    }

    /// Aspect policy for the hardware-scaled path.
    pub fn overlay_aspect(&self) -> AspectPolicy {
        AspectPolicy {
            keep_aspect: self.keep_aspect,
            true_aspect: self.true_aspect,
            ratio: self.clamped_aspect_ratio(),
        }
    }

    /// Aspect policy for the software path, which never stretches pixels.
    pub fn software_aspect(&self) -> AspectPolicy {
        AspectPolicy::square(self.keep_aspect)
    }
}

/// What the emulation core asks for when it opens a canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasRequest {
    /// Visible draw-buffer size in emulator pixels.
    pub size: Size,
    /// Pixel depth; the server's default depth when `None`.
    pub depth: Option<u32>,
    pub scale: Scale,
    /// Displayed width/height of one emulated pixel.
    pub pixel_aspect_ratio: f64,
}

impl CanvasRequest {
    pub fn new(width: u32, height: u32) -> Self {
        CanvasRequest {
            size: Size::new(width, height),
            depth: None,
            scale: Scale::UNIT,
            pixel_aspect_ratio: 1.0,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_scale(mut self, x: u32, y: u32) -> Self {
        self.scale = Scale::new(x, y);
        self
    }

    pub fn with_pixel_aspect_ratio(mut self, ratio: f64) -> Self {
        self.pixel_aspect_ratio = ratio;
        self
    }
}
