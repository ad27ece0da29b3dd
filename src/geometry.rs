// src/geometry.rs

//! Scaling and aspect-ratio math.
//!
//! [`place`] is the single placement formula. The overlay path uses it to fit
//! the hardware-scaled image into whatever size the window manager gave the
//! drawable, [`size_hints`] uses it indirectly to size the window, and
//! [`Presentation::to_source`] inverts its result for pointer and lightpen
//! input. Keeping all three on the same rectangle is what makes a click land
//! on the emulated pixel under the cursor.

use serde::{Deserialize, Serialize};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Largest physical side a canvas may have. X coordinates are 16-bit signed.
pub const MAX_DIMENSION: u32 = i16::MAX as u32;

/// Integer software scale factors ("double size" and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub x: u32,
    pub y: u32,
}

impl Scale {
    pub const UNIT: Scale = Scale { x: 1, y: 1 };

    pub fn new(x: u32, y: u32) -> Self {
        Self {
            x: x.max(1),
            y: y.max(1),
        }
    }

    /// Saturates instead of overflowing; sizes that went through
    /// [`checked_apply`](Self::checked_apply) never saturate.
    pub fn apply(&self, size: Size) -> Size {
        Size::new(size.width.saturating_mul(self.x), size.height.saturating_mul(self.y))
    }

    /// The scaled size, or `None` if a side overflows or exceeds
    /// [`MAX_DIMENSION`].
    pub fn checked_apply(&self, size: Size) -> Option<Size> {
        let width = size.width.checked_mul(self.x)?;
        let height = size.height.checked_mul(self.y)?;
        (width <= MAX_DIMENSION && height <= MAX_DIMENSION).then_some(Size::new(width, height))
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::UNIT
    }
}

/// A placed rectangle inside a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        let (px, py) = (px as i64, py as i64);
        px >= self.x as i64
            && py >= self.y as i64
            && px < self.x as i64 + self.w as i64
            && py < self.y as i64 + self.h as i64
    }
}

/// A dirty region reported by the emulation core.
///
/// `src_*` index into the draw buffer, `dest_*` are canvas coordinates in
/// emulator (unscaled) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub src_x: u32,
    pub src_y: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// The whole canvas, drawn from the top-left of the draw buffer.
    pub fn full(size: Size) -> Self {
        Self {
            src_x: 0,
            src_y: 0,
            dest_x: 0,
            dest_y: 0,
            width: size.width,
            height: size.height,
        }
    }

    /// The destination rectangle after software scaling.
    pub fn scaled_dest(&self, scale: Scale) -> (u64, u64, u64, u64) {
        (
            self.dest_x as u64 * scale.x as u64,
            self.dest_y as u64 * scale.y as u64,
            self.width as u64 * scale.x as u64,
            self.height as u64 * scale.y as u64,
        )
    }
}

/// How the presented image keeps its proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectPolicy {
    pub keep_aspect: bool,
    pub true_aspect: bool,
    /// Explicit ratio used when `keep_aspect` is set without `true_aspect`.
    pub ratio: f64,
}

impl AspectPolicy {
    /// Square pixels when keeping aspect, free fill otherwise.
    pub fn square(keep_aspect: bool) -> Self {
        Self {
            keep_aspect,
            true_aspect: false,
            ratio: 1.0,
        }
    }

    /// The target ratio, or `None` for unconstrained fill.
    pub fn effective_ratio(&self, pixel_aspect_ratio: f64) -> Option<f64> {
        if !self.keep_aspect {
            None
        } else if self.true_aspect {
            Some(pixel_aspect_ratio)
        } else {
            Some(self.ratio)
        }
    }
}

/// Window-manager sizing hints for a canvas window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeHints {
    pub output_w: u32,
    pub output_h: u32,
    pub min_aspect: Option<f64>,
    pub max_aspect: Option<f64>,
}

/// Computes the initial window size and aspect constraints for a canvas.
pub fn size_hints(
    source: Size,
    scale: Scale,
    pixel_aspect_ratio: f64,
    policy: &AspectPolicy,
) -> SizeHints {
    let scaled = scale.apply(source);
    match policy.effective_ratio(pixel_aspect_ratio) {
        Some(ratio) if ratio > 0.0 && scaled.height > 0 => {
            let output_w = (scaled.width as f64 * ratio + 0.5) as u32;
            let aspect = output_w as f64 / scaled.height as f64;
            SizeHints {
                output_w,
                output_h: scaled.height,
                min_aspect: Some(aspect),
                max_aspect: Some(aspect),
            }
        }
        _ => SizeHints {
            output_w: scaled.width,
            output_h: scaled.height,
            min_aspect: None,
            max_aspect: None,
        },
    }
}

/// Places a `src_w`×`src_h` image inside a `dest_w`×`dest_h` drawable.
///
/// With `aspect == None` the image fills the destination. Otherwise the image
/// is letterboxed so that one source pixel is displayed `aspect` times as wide
/// as it is high, and centred along the constrained axis.
pub fn place(dest_w: u32, dest_h: u32, src_w: u32, src_h: u32, aspect: Option<f64>) -> Rect {
    let full = Rect::new(0, 0, dest_w, dest_h);
    let ratio = match aspect {
        Some(r) if r > 0.0 && src_w > 0 && src_h > 0 => r,
        _ => return full,
    };

    let (dw, dh) = (dest_w as f64, dest_h as f64);
    let (sw, sh) = (src_w as f64, src_h as f64);

    if dw * sh < sw * ratio * dh {
        // Too narrow for the requested ratio: full width, shrink height.
        let h = (dw * sh / (sw * ratio)) as i64;
        Rect::new(0, ((dest_h as i64 - h) / 2) as i32, dest_w, h as u32)
    } else {
        let w = (dh * sw * ratio / sh) as i64;
        Rect::new(((dest_w as i64 - w) / 2) as i32, 0, w as u32, dest_h)
    }
}

/// Where the emulated screen currently ends up inside the drawable.
///
/// This is what the input side needs to turn a pointer position into a
/// draw-buffer coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Presentation {
    pub rect: Rect,
    /// Dimensions of the presented buffer in emulator pixels.
    pub source: Size,
}

impl Presentation {
    /// Screen pixels per emulator pixel along each axis.
    pub fn scale(&self) -> (f64, f64) {
        if self.source.width == 0 || self.source.height == 0 {
            return (1.0, 1.0);
        }
        (
            self.rect.w as f64 / self.source.width as f64,
            self.rect.h as f64 / self.source.height as f64,
        )
    }

    /// Inverts a drawable coordinate into source-buffer coordinates.
    ///
    /// Returns `None` for points in the letterbox bars or outside the window.
    pub fn to_source(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        if self.rect.w == 0 || self.rect.h == 0 || !self.rect.contains(x, y) {
            return None;
        }
        let dx = (x as i64 - self.rect.x as i64) as u64;
        let dy = (y as i64 - self.rect.y as i64) as u64;
        let sx = dx * self.source.width as u64 / self.rect.w as u64;
        let sy = dy * self.source.height as u64 / self.rect.h as u64;
        Some((sx as u32, sy as u32))
    }
}
