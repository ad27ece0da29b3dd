// src/framebuffer.rs

//! Backing store for the software path.
//!
//! [`Framebuffer::allocate`] walks the degradation chain: an MIT-SHM image
//! first, then a plain image on a locally allocated buffer. The shared
//! attempt is made at most once; whatever goes wrong there, the plain path
//! is tried exactly once more and its failure is final.

use log::{debug, info, warn};
use std::rc::Rc;

use crate::error::VideoError;
use crate::geometry::Size;
use crate::refresh::CorePresenter;
use crate::render::PixelFormat;
use crate::server::{DisplayServer, ImageLayout};
use crate::shm::{PixelMemory, ShmSegment, MODE_READ_ONLY_SERVER};

/// Pixel width rounded up to a multiple of four.
pub fn rounded_width(width: u32) -> u32 {
    width.div_ceil(4) * 4
}

/// Bytes per pixel of a plain buffer of the given depth.
pub fn bytes_per_pixel(depth: u32) -> usize {
    match depth {
        0..=8 => 1,
        9..=16 => 2,
        _ => 4,
    }
}

/// A core image plus the memory behind it.
#[derive(Debug)]
pub struct Framebuffer<S: DisplayServer> {
    server: Rc<S>,
    image: Option<S::Image>,
    layout: ImageLayout,
    memory: PixelMemory<S>,
    /// Requested physical size; the image itself may be wider.
    size: Size,
}

impl<S: DisplayServer> Framebuffer<S> {
    /// Allocates a `width`×`height` image of `depth`, preferring shared memory.
    pub fn allocate(
        server: &Rc<S>,
        depth: u32,
        width: u32,
        height: u32,
        prefer_shared: bool,
    ) -> Result<Self, VideoError> {
        let size = Size::new(width, height);
        if prefer_shared && server.shm_available() {
            match Self::allocate_shared(server, depth, size) {
                Ok(fb) => {
                    info!("Using MIT-SHM image {}x{} (depth {})", width, height, depth);
                    return Ok(fb);
                }
                Err(e) => warn!("MIT-SHM image unavailable ({}); falling back to a plain image", e),
            }
        } else if prefer_shared {
            debug!("MIT-SHM not supported by the server");
        }
        let fb = Self::allocate_local(server, depth, size)?;
        info!("Using plain image {}x{} (depth {})", width, height, depth);
        Ok(fb)
    }

    fn allocate_shared(server: &Rc<S>, depth: u32, size: Size) -> Result<Self, VideoError> {
        let mut segment = ShmSegment::new(server.clone());
        let mut image = server
            .create_image(
                depth,
                rounded_width(size.width),
                size.height,
                Some(segment.info_mut()),
            )
            .ok_or_else(|| VideoError::ResourceExhaustion("shared image structure".into()))?;
        let layout = server.image_layout(&image);

        let setup = segment
            .allocate(layout.data_size(), MODE_READ_ONLY_SERVER)
            .and_then(|()| segment.attach())
            .and_then(|()| segment.attach_server());
        if let Err(e) = setup {
            segment.detach_server();
            server.destroy_image(image);
            return Err(e);
        }
        segment.mark_for_removal();
        server.set_image_data(&mut image, segment.as_mut_ptr());
        debug!(
            "Shm segment {}: {} bytes, {} bytes per line",
            segment.id(),
            segment.len(),
            layout.bytes_per_line
        );

        Ok(Self {
            server: server.clone(),
            image: Some(image),
            layout,
            memory: PixelMemory::Shared(segment),
            size,
        })
    }

    fn allocate_local(server: &Rc<S>, depth: u32, size: Size) -> Result<Self, VideoError> {
        let width = rounded_width(size.width);
        let mut image = server
            .create_image(depth, width, size.height, None)
            .ok_or_else(|| VideoError::ResourceExhaustion("image structure".into()))?;
        let layout = server.image_layout(&image);

        let mut len = width as usize * size.height as usize * bytes_per_pixel(depth);
        if len < layout.data_size() {
            debug!(
                "Server wants {} bytes per line; growing buffer from {} to {} bytes",
                layout.bytes_per_line,
                len,
                layout.data_size()
            );
            len = layout.data_size();
        }
        let mut memory = match PixelMemory::local(len) {
            Ok(memory) => memory,
            Err(e) => {
                server.destroy_image(image);
                return Err(e);
            }
        };
        server.set_image_data(&mut image, memory.as_mut_ptr());

        Ok(Self {
            server: server.clone(),
            image: Some(image),
            layout,
            memory,
            size,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.memory.is_shared()
    }

    /// Present strategy, fixed for the lifetime of this buffer.
    pub fn presenter(&self) -> CorePresenter {
        if self.is_shared() {
            CorePresenter::Shared
        } else {
            CorePresenter::Local
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_layout(&self.layout)
    }

    /// The physical size that was asked for.
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn image(&self) -> Option<&S::Image> {
        self.image.as_ref()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        let len = self.layout.data_size();
        let all = self.memory.as_mut_slice();
        let len = len.min(all.len());
        &mut all[..len]
    }
}

impl<S: DisplayServer> Drop for Framebuffer<S> {
    fn drop(&mut self) {
        // Server detach, then the image structure, then the memory itself.
        self.memory.detach_server();
        if let Some(image) = self.image.take() {
            self.server.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::mock::{Faults, MockServer};

    #[test_log::test]
    fn shared_allocation_uses_one_round_trip() {
        let server = Rc::new(MockServer::new(24));
        let fb = Framebuffer::allocate(&server, 24, 384, 272, true).unwrap();
        assert!(fb.is_shared());
        assert_eq!(fb.presenter(), CorePresenter::Shared);
        assert_eq!(server.round_trips(), 1);
        assert_eq!(server.segment_modes(), vec![MODE_READ_ONLY_SERVER]);
        assert_eq!(server.server_attach_read_only(), vec![true]);
        drop(fb);
        assert!(server.is_clean());
    }

    #[test_log::test]
    fn width_is_rounded_to_four() {
        let server = Rc::new(MockServer::new(8));
        let fb = Framebuffer::allocate(&server, 8, 321, 10, false).unwrap();
        assert_eq!(fb.layout().width, 324);
        assert_eq!(fb.size(), Size::new(321, 10));
        assert_eq!(fb.presenter(), CorePresenter::Local);
    }

    #[test_log::test]
    fn every_shared_step_failure_falls_back_without_leaks() {
        for fault in [
            Faults::CREATE_SHM_IMAGE,
            Faults::SHM_GET,
            Faults::SHM_ATTACH,
            Faults::SERVER_ATTACH,
        ] {
            let server = Rc::new(MockServer::new(16));
            server.set_faults(fault);
            let mut fb = Framebuffer::allocate(&server, 16, 100, 50, true).unwrap();
            assert!(!fb.is_shared(), "{:?}", fault);
            assert_eq!(server.live_segments(), 0, "{:?}", fault);
            assert!(fb.pixels_mut().len() >= 100 * 50 * 2);
            drop(fb);
            assert!(server.is_clean(), "{:?}", fault);
            assert!(server.contract_violations().is_empty(), "{:?}", fault);
        }
    }

    #[test_log::test]
    fn plain_failure_is_fatal() {
        let server = Rc::new(MockServer::new(24));
        server.set_faults(Faults::CREATE_SHM_IMAGE | Faults::CREATE_IMAGE);
        let err = Framebuffer::allocate(&server, 24, 10, 10, true).unwrap_err();
        assert!(matches!(err, VideoError::ResourceExhaustion(_)));
        assert!(server.is_clean());
    }

    #[test_log::test]
    fn no_shm_extension_skips_shared_attempt() {
        let server = Rc::new(MockServer::new(24).without_shm());
        let fb = Framebuffer::allocate(&server, 24, 10, 10, true).unwrap();
        assert!(!fb.is_shared());
        assert_eq!(server.round_trips(), 0);
    }
}
