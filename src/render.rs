// src/render.rs

//! Software rendering of the emulator's palette-indexed draw buffer into a
//! physical image.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::geometry::{Region, Scale};
use crate::server::ImageLayout;

/// An 8-bit-per-channel colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The emulated machine's palette. Index `i` of the draw buffer shows entry `i`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<Rgb>,
}

impl Palette {
    pub fn new(entries: Vec<Rgb>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Rgb] {
        &self.entries
    }

    /// Black for indices past the end.
    pub fn get(&self, index: usize) -> Rgb {
        self.entries.get(index).copied().unwrap_or_default()
    }
}

/// A borrowed view of the draw buffer: one palette index per pixel.
#[derive(Debug, Clone, Copy)]
pub struct FrameSource<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes from one row to the next.
    pub pitch: usize,
}

impl<'a> FrameSource<'a> {
    /// A tightly packed buffer. Returns `None` if `pixels` is too short.
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Option<Self> {
        Self::with_pitch(pixels, width, height, width as usize)
    }

    pub fn with_pitch(pixels: &'a [u8], width: u32, height: u32, pitch: usize) -> Option<Self> {
        if pitch < width as usize {
            return None;
        }
        let needed = match height {
            0 => 0,
            h => (h as usize - 1) * pitch + width as usize,
        };
        (pixels.len() >= needed).then_some(Self {
            pixels,
            width,
            height,
            pitch,
        })
    }

    #[inline]
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.pitch + x as usize]
    }

    /// Whether `width x height` pixels starting at (`x`, `y`) are inside the buffer.
    pub fn contains(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        x as u64 + width as u64 <= self.width as u64 && y as u64 + height as u64 <= self.height as u64
    }
}

/// How physical pixels are laid out in a core image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bytes_per_pixel: usize,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub msb_first: bool,
}

impl PixelFormat {
    pub fn from_layout(layout: &ImageLayout) -> Self {
        Self {
            bytes_per_pixel: (layout.bits_per_pixel as usize).div_ceil(8).max(1),
            red_mask: layout.red_mask,
            green_mask: layout.green_mask,
            blue_mask: layout.blue_mask,
            msb_first: layout.msb_first,
        }
    }

    /// Indexed visuals have no channel masks; the palette index is the pixel.
    pub fn is_indexed(&self) -> bool {
        self.red_mask == 0 && self.green_mask == 0 && self.blue_mask == 0
    }

    pub fn pack(&self, index: u8, rgb: Rgb) -> u32 {
        if self.is_indexed() {
            return index as u32;
        }
        channel(rgb.r, self.red_mask) | channel(rgb.g, self.green_mask) | channel(rgb.b, self.blue_mask)
    }

    /// Physical value for each of the 256 possible indices.
    pub fn color_table(&self, palette: &Palette) -> Vec<u32> {
        (0..=255u8)
            .map(|i| self.pack(i, palette.get(i as usize)))
            .collect()
    }

    #[inline]
    fn store(&self, out: &mut [u8], value: u32) {
        match (self.bytes_per_pixel, self.msb_first) {
            (1, _) => out[0] = value as u8,
            (2, false) => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
            (2, true) => out[..2].copy_from_slice(&(value as u16).to_be_bytes()),
            (3, false) => out[..3].copy_from_slice(&value.to_le_bytes()[..3]),
            (3, true) => out[..3].copy_from_slice(&value.to_be_bytes()[1..]),
            (_, false) => out[..4].copy_from_slice(&value.to_le_bytes()),
            (_, true) => out[..4].copy_from_slice(&value.to_be_bytes()),
        }
    }
}

fn channel(value: u8, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let bits = mask.count_ones().min(8);
    ((value as u32) >> (8 - bits)) << shift
}

/// Renders `region` of `source` into `dest` as `scale.x * scale.y` blocks.
///
/// The caller has already checked that the scaled region fits `dest`.
pub fn render_scaled(
    source: &FrameSource<'_>,
    table: &[u32],
    format: PixelFormat,
    dest: &mut [u8],
    dest_pitch: usize,
    region: &Region,
    scale: Scale,
) {
    let bpp = format.bytes_per_pixel;
    let (sx, sy) = (scale.x as usize, scale.y as usize);
    let row_bytes = region.width as usize * sx * bpp;
    let x0 = region.dest_x as usize * sx * bpp;

    for row in 0..region.height {
        let first = (region.dest_y + row) as usize * sy * dest_pitch + x0;
        {
            let out = &mut dest[first..first + row_bytes];
            for col in 0..region.width {
                let index = source.index_at(region.src_x + col, region.src_y + row);
                let value = table[index as usize];
                let start = col as usize * sx * bpp;
                for rep in 0..sx {
                    format.store(&mut out[start + rep * bpp..], value);
                }
            }
        }
        for rep in 1..sy {
            let at = first + rep * dest_pitch;
            dest.copy_within(first..first + row_bytes, at);
        }
    }
    trace!(
        "Rendered {}x{} at ({}, {}) scaled {}x{}",
        region.width,
        region.height,
        region.dest_x,
        region.dest_y,
        scale.x,
        scale.y
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb565() -> PixelFormat {
        PixelFormat {
            bytes_per_pixel: 2,
            red_mask: 0xf800,
            green_mask: 0x07e0,
            blue_mask: 0x001f,
            msb_first: false,
        }
    }

    #[test_log::test]
    fn packs_through_channel_masks() {
        let f = rgb565();
        assert_eq!(f.pack(0, Rgb::new(255, 255, 255)), 0xffff);
        assert_eq!(f.pack(0, Rgb::new(255, 0, 0)), 0xf800);
        assert_eq!(f.pack(0, Rgb::new(0, 0x80, 0)), 0x0400);
    }

    #[test_log::test]
    fn indexed_visual_uses_index() {
        let f = PixelFormat {
            bytes_per_pixel: 1,
            red_mask: 0,
            green_mask: 0,
            blue_mask: 0,
            msb_first: false,
        };
        assert_eq!(f.pack(7, Rgb::new(1, 2, 3)), 7);
    }

    #[test_log::test]
    fn scaled_render_writes_blocks() {
        let pixels = [1u8, 2, 3, 4];
        let source = FrameSource::new(&pixels, 2, 2).unwrap();
        let mut table = vec![0u32; 256];
        table[1] = 0x11;
        table[2] = 0x22;
        table[3] = 0x33;
        table[4] = 0x44;
        let format = PixelFormat {
            bytes_per_pixel: 1,
            red_mask: 0,
            green_mask: 0,
            blue_mask: 0,
            msb_first: false,
        };
        let mut dest = vec![0u8; 4 * 4];
        render_scaled(
            &source,
            &table,
            format,
            &mut dest,
            4,
            &Region::full(crate::geometry::Size::new(2, 2)),
            Scale::new(2, 2),
        );
        #[rustfmt::skip]
        let expected = [
            0x11, 0x11, 0x22, 0x22,
            0x11, 0x11, 0x22, 0x22,
            0x33, 0x33, 0x44, 0x44,
            0x33, 0x33, 0x44, 0x44,
        ];
        assert_eq!(dest, expected);
    }

    #[test_log::test]
    fn big_endian_store() {
        let mut f = rgb565();
        f.msb_first = true;
        let mut out = [0u8; 2];
        f.store(&mut out, 0xf800);
        assert_eq!(out, [0xf8, 0x00]);
    }

    #[test_log::test]
    fn short_source_is_rejected() {
        assert!(FrameSource::new(&[0u8; 5], 3, 2).is_none());
        assert!(FrameSource::with_pitch(&[0u8; 7], 3, 2, 4).is_some());
    }
}
