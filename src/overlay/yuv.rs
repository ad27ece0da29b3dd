// src/overlay/yuv.rs

//! Palette-indexed to YUV conversion for overlay images.

use log::warn;

use super::format::YuvLayout;
use crate::geometry::Region;
use crate::render::{FrameSource, Palette, Rgb};
use crate::server::OverlayLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Yuv {
    pub y: u8,
    pub u: u8,
    pub v: u8,
}

impl From<Rgb> for Yuv {
    /// ITU-R BT.601, studio swing.
    fn from(c: Rgb) -> Self {
        let (r, g, b) = (c.r as i32, c.g as i32, c.b as i32);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        Yuv {
            y: y.clamp(0, 255) as u8,
            u: u.clamp(0, 255) as u8,
            v: v.clamp(0, 255) as u8,
        }
    }
}

/// YUV value of each of the 256 palette indices.
#[derive(Debug, Clone)]
pub struct YuvTable(Vec<Yuv>);

impl YuvTable {
    pub fn new(palette: &Palette) -> Self {
        Self((0..256).map(|i| Yuv::from(palette.get(i))).collect())
    }

    #[inline]
    fn get(&self, index: u8) -> Yuv {
        self.0[index as usize]
    }
}

fn avg2(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) / 2) as u8
}

fn avg4(a: u8, b: u8, c: u8, d: u8) -> u8 {
    ((a as u16 + b as u16 + c as u16 + d as u16 + 2) / 4) as u8
}

/// Reads the draw buffer in overlay coordinates, clamping to the edges so
/// that widening a region to the chroma grid never reads out of bounds.
struct Sampler<'s, 'a> {
    source: &'s FrameSource<'a>,
    table: &'s YuvTable,
    off_x: i64,
    off_y: i64,
}

impl Sampler<'_, '_> {
    fn at(&self, x: u32, y: u32) -> Yuv {
        let sx = (x as i64 + self.off_x).clamp(0, self.source.width as i64 - 1) as u32;
        let sy = (y as i64 + self.off_y).clamp(0, self.source.height as i64 - 1) as u32;
        self.table.get(self.source.index_at(sx, sy))
    }
}

/// Converts `region` of the draw buffer into `dest`, an overlay image laid
/// out as `image` in the given `layout`. The region is widened to the
/// format's chroma grid and clipped to the image.
pub fn convert(
    source: &FrameSource<'_>,
    table: &YuvTable,
    layout: YuvLayout,
    image: &OverlayLayout,
    dest: &mut [u8],
    region: &Region,
) {
    if source.width == 0 || source.height == 0 {
        return;
    }
    let (ax, ay) = layout.alignment();
    let x0 = region.dest_x / ax * ax;
    let y0 = region.dest_y / ay * ay;
    let x1 = (region.dest_x + region.width).div_ceil(ax) * ax;
    let y1 = (region.dest_y + region.height).div_ceil(ay) * ay;
    let (x1, y1) = (x1.min(image.width), y1.min(image.height));
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let sampler = Sampler {
        source,
        table,
        off_x: region.src_x as i64 - region.dest_x as i64,
        off_y: region.src_y as i64 - region.dest_y as i64,
    };

    match layout {
        YuvLayout::Packed { y0: py0, u, y1: py1, v } => {
            if !plane_fits(image, dest.len(), 0, y1, x1.next_multiple_of(2) * 2) {
                warn!("Overlay image too small for packed conversion; frame skipped");
                return;
            }
            let (pitch, offset) = (image.pitches[0] as usize, image.offsets[0] as usize);
            for y in y0..y1 {
                let row = offset + y as usize * pitch;
                for x in (x0..x1).step_by(2) {
                    let a = sampler.at(x, y);
                    let b = sampler.at(x + 1, y);
                    let px = &mut dest[row + x as usize * 2..row + x as usize * 2 + 4];
                    px[py0] = a.y;
                    px[py1] = b.y;
                    px[u] = avg2(a.u, b.u);
                    px[v] = avg2(a.v, b.v);
                }
            }
        }
        YuvLayout::Planar { u_plane, v_plane } => {
            // Every 2x2 block is written whole, even on an odd image edge.
            let (bw, bh) = (x1.next_multiple_of(2), y1.next_multiple_of(2));
            if image.num_planes() < 3
                || !plane_fits(image, dest.len(), 0, bh, bw)
                || !plane_fits(image, dest.len(), u_plane, bh / 2, bw / 2)
                || !plane_fits(image, dest.len(), v_plane, bh / 2, bw / 2)
            {
                warn!("Overlay image too small for planar conversion; frame skipped");
                return;
            }
            let plane = |i: usize| (image.pitches[i] as usize, image.offsets[i] as usize);
            let (y_pitch, y_off) = plane(0);
            let (u_pitch, u_off) = plane(u_plane);
            let (v_pitch, v_off) = plane(v_plane);
            for y in (y0..y1).step_by(2) {
                for x in (x0..x1).step_by(2) {
                    let p = [
                        sampler.at(x, y),
                        sampler.at(x + 1, y),
                        sampler.at(x, y + 1),
                        sampler.at(x + 1, y + 1),
                    ];
                    let top = y_off + y as usize * y_pitch + x as usize;
                    let bottom = top + y_pitch;
                    dest[top] = p[0].y;
                    dest[top + 1] = p[1].y;
                    dest[bottom] = p[2].y;
                    dest[bottom + 1] = p[3].y;
                    let (cx, cy) = (x as usize / 2, y as usize / 2);
                    dest[u_off + cy * u_pitch + cx] = avg4(p[0].u, p[1].u, p[2].u, p[3].u);
                    dest[v_off + cy * v_pitch + cx] = avg4(p[0].v, p[1].v, p[2].v, p[3].v);
                }
            }
        }
    }
}

/// Whether `rows` rows of `row_bytes` bytes of plane `plane` fit in `len`.
fn plane_fits(image: &OverlayLayout, len: usize, plane: usize, rows: u32, row_bytes: u32) -> bool {
    let (Some(&pitch), Some(&offset)) = (image.pitches.get(plane), image.offsets.get(plane)) else {
        return false;
    };
    if rows == 0 {
        return true;
    }
    pitch >= row_bytes
        && offset as usize + (rows as usize - 1) * pitch as usize + row_bytes as usize <= len
}
