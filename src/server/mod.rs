// src/server/mod.rs

//! The seam between the video layer and the display server.
//!
//! Everything the allocator, the port negotiator and the refresh path need
//! from X11 (and from System V shared memory) goes through [`DisplayServer`],
//! so the degradation logic can be exercised without a running server.
//! [`XlibServer`] is the live implementation; tests use `mock::MockServer`.

pub mod connection;
pub mod error_trap;
pub mod ffi;
#[cfg(test)]
pub mod mock;
pub mod xlib;

pub use xlib::XlibServer;

use crate::error::VideoError;
use crate::geometry::Rect;
use crate::overlay::FourCc;
use bitflags::bitflags;
use libc::{c_char, c_int, c_ulong};
use std::fmt;
use std::ptr::{self, NonNull};

/// An X drawable (window or pixmap) owned by the window-management side.
pub type Drawable = c_ulong;

/// An XVideo port id.
pub type PortId = c_ulong;

/// Layout-compatible with `XShmSegmentInfo`.
///
/// The server-side image keeps a pointer to this struct, so owners must keep
/// it at a stable address for as long as the image lives.
#[repr(C)]
#[derive(Debug)]
pub struct ShmSegmentInfo {
    pub shmseg: c_ulong,
    pub shmid: c_int,
    pub shmaddr: *mut c_char,
    pub read_only: c_int,
}

impl Default for ShmSegmentInfo {
    fn default() -> Self {
        ShmSegmentInfo {
            shmseg: 0,
            shmid: -1,
            shmaddr: ptr::null_mut(),
            read_only: 0,
        }
    }
}

/// What the server reports about a core image it created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: u32,
    pub bits_per_pixel: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub msb_first: bool,
}

impl ImageLayout {
    pub fn data_size(&self) -> usize {
        self.bytes_per_line as usize * self.height as usize
    }
}

/// What the server reports about an overlay image it created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayLayout {
    pub width: u32,
    pub height: u32,
    pub data_size: usize,
    pub pitches: Vec<u32>,
    pub offsets: Vec<u32>,
}

impl OverlayLayout {
    pub fn num_planes(&self) -> usize {
        self.pitches.len().min(self.offsets.len())
    }
}

bitflags! {
    /// XVideo adaptor type bits (`XvInputMask` and friends).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdaptorCaps: u8 {
        const INPUT = 0x01;
        const OUTPUT = 0x02;
        const VIDEO = 0x04;
        const STILL = 0x08;
        const IMAGE = 0x10;
    }
}

/// One XVideo adaptor as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptorInfo {
    pub name: String,
    pub base_id: PortId,
    pub num_ports: u32,
    pub caps: AdaptorCaps,
}

impl AdaptorInfo {
    /// Texture adaptors draw through the GPU and can serve several windows;
    /// everything else is treated as a true overlay.
    pub fn is_overlay_class(&self) -> bool {
        !self.name.contains("Textured")
    }

    pub fn ports(&self) -> impl Iterator<Item = PortId> {
        let base = self.base_id;
        (0..self.num_ports as PortId).map(move |i| base + i)
    }
}

/// Primitive operations against the display server and the OS.
///
/// All calls happen on the thread that owns the connection. Nothing here
/// retries or falls back; that is the caller's job.
#[allow(clippy::too_many_arguments)]
pub trait DisplayServer: fmt::Debug {
    /// Client-side core image (`XImage`).
    type Image: fmt::Debug;
    /// Client-side overlay image (`XvImage`).
    type OverlayImage: fmt::Debug;

    // --- Connection ---
    fn default_depth(&self) -> u32;
    /// Whether MIT-SHM was detected on this display.
    fn shm_available(&self) -> bool;
    /// One protocol round trip.
    fn sync(&self);
    /// Current size of `drawable`, or `None` if the query failed.
    fn drawable_size(&self, drawable: Drawable) -> Option<(u32, u32)>;

    // --- System V shared memory ---
    fn shm_get(&self, size: usize, mode: u32) -> nix::Result<c_int>;
    fn shm_attach(&self, shmid: c_int) -> nix::Result<NonNull<u8>>;
    fn shm_detach(&self, addr: NonNull<u8>) -> nix::Result<()>;
    /// Marks the segment for destruction once the last attachment is gone.
    fn shm_remove(&self, shmid: c_int) -> nix::Result<()>;

    // --- MIT-SHM ---
    /// Attaches a segment on the server side.
    ///
    /// The server reports refusal asynchronously; implementations must turn
    /// that into a synchronous result with exactly one round trip.
    fn shm_server_attach(&self, info: &mut ShmSegmentInfo) -> Result<(), VideoError>;
    fn shm_server_detach(&self, info: &mut ShmSegmentInfo);

    // --- Core images ---
    /// Creates an image without pixel memory. With `shm`, the image is bound
    /// to that segment description.
    fn create_image(
        &self,
        depth: u32,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<Self::Image>;
    fn image_layout(&self, image: &Self::Image) -> ImageLayout;
    fn set_image_data(&self, image: &mut Self::Image, data: *mut u8);
    /// Frees the image structure. Never frees the pixel memory.
    fn destroy_image(&self, image: Self::Image);
    fn put_image(&self, drawable: Drawable, image: &Self::Image, src: Rect, dest_x: i32, dest_y: i32);
    fn shm_put_image(
        &self,
        drawable: Drawable,
        image: &Self::Image,
        src: Rect,
        dest_x: i32,
        dest_y: i32,
    );

    // --- XVideo ---
    /// Adaptors on the default screen, or `None` if XVideo is missing.
    fn query_adaptors(&self) -> Option<Vec<AdaptorInfo>>;
    fn list_image_formats(&self, port: PortId) -> Vec<FourCc>;
    fn grab_port(&self, port: PortId) -> bool;
    fn ungrab_port(&self, port: PortId);
    fn create_overlay_image(
        &self,
        port: PortId,
        format: FourCc,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<Self::OverlayImage>;
    fn overlay_layout(&self, image: &Self::OverlayImage) -> OverlayLayout;
    fn set_overlay_data(&self, image: &mut Self::OverlayImage, data: *mut u8);
    fn destroy_overlay_image(&self, image: Self::OverlayImage);
    fn put_overlay(
        &self,
        port: PortId,
        drawable: Drawable,
        image: &Self::OverlayImage,
        src: Rect,
        dest: Rect,
    );
    fn shm_put_overlay(
        &self,
        port: PortId,
        drawable: Drawable,
        image: &Self::OverlayImage,
        src: Rect,
        dest: Rect,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn textured_adaptors_are_not_overlays() {
        let mut info = AdaptorInfo {
            name: "Intel(R) Textured Video".to_string(),
            base_id: 70,
            num_ports: 3,
            caps: AdaptorCaps::INPUT | AdaptorCaps::IMAGE,
        };
        assert!(!info.is_overlay_class());
        assert_eq!(info.ports().collect::<Vec<_>>(), vec![70, 71, 72]);
        info.name = "Intel(R) Video Overlay".to_string();
        assert!(info.is_overlay_class());
    }
}
