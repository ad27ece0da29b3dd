// src/overlay/image.rs

//! XVideo image bound to a grabbed port.

use log::debug;
use std::rc::Rc;

use super::format::FourCc;
use super::port::OverlayPort;
use crate::error::VideoError;
use crate::refresh::OverlayPresenter;
use crate::server::{DisplayServer, OverlayLayout};
use crate::shm::{PixelMemory, ShmSegment, MODE_READ_WRITE};

/// A source-sized YUV image the hardware scales onto the drawable.
#[derive(Debug)]
pub struct OverlayImage<S: DisplayServer> {
    server: Rc<S>,
    image: Option<S::OverlayImage>,
    layout: OverlayLayout,
    format: FourCc,
    memory: PixelMemory<S>,
}

impl<S: DisplayServer> OverlayImage<S> {
    /// Creates an image in the port's format, in shared memory when `use_shm`.
    ///
    /// Nothing is left behind on failure, so the caller can simply retry
    /// with `use_shm` off.
    pub fn create(
        server: &Rc<S>,
        port: &OverlayPort<S>,
        width: u32,
        height: u32,
        use_shm: bool,
    ) -> Result<Self, VideoError> {
        let format = port.format();
        let image = if use_shm {
            Self::create_shared(server, port, width, height)?
        } else {
            Self::create_local(server, port, width, height)?
        };
        debug!(
            "Overlay image {}x{} {} ({} bytes, {} planes, shared: {})",
            image.layout.width,
            image.layout.height,
            format,
            image.layout.data_size,
            image.layout.num_planes(),
            image.is_shared()
        );
        Ok(image)
    }

    fn create_shared(
        server: &Rc<S>,
        port: &OverlayPort<S>,
        width: u32,
        height: u32,
    ) -> Result<Self, VideoError> {
        let mut segment = ShmSegment::new(server.clone());
        let mut image = server
            .create_overlay_image(port.id(), port.format(), width, height, Some(segment.info_mut()))
            .ok_or_else(|| VideoError::ResourceExhaustion("shared overlay image".into()))?;
        let layout = server.overlay_layout(&image);

        let setup = segment
            .allocate(layout.data_size, MODE_READ_WRITE)
            .and_then(|()| segment.attach())
            .and_then(|()| segment.attach_server());
        if let Err(e) = setup {
            segment.detach_server();
            server.destroy_overlay_image(image);
            return Err(e);
        }
        segment.mark_for_removal();
        server.set_overlay_data(&mut image, segment.as_mut_ptr());

        Ok(Self {
            server: server.clone(),
            image: Some(image),
            layout,
            format: port.format(),
            memory: PixelMemory::Shared(segment),
        })
    }

    fn create_local(
        server: &Rc<S>,
        port: &OverlayPort<S>,
        width: u32,
        height: u32,
    ) -> Result<Self, VideoError> {
        let mut image = server
            .create_overlay_image(port.id(), port.format(), width, height, None)
            .ok_or_else(|| VideoError::ResourceExhaustion("overlay image".into()))?;
        let layout = server.overlay_layout(&image);
        let mut memory = match PixelMemory::local(layout.data_size) {
            Ok(memory) => memory,
            Err(e) => {
                server.destroy_overlay_image(image);
                return Err(e);
            }
        };
        server.set_overlay_data(&mut image, memory.as_mut_ptr());

        Ok(Self {
            server: server.clone(),
            image: Some(image),
            layout,
            format: port.format(),
            memory,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.memory.is_shared()
    }

    /// Present strategy, fixed for the lifetime of this image.
    pub fn presenter(&self) -> OverlayPresenter {
        if self.is_shared() {
            OverlayPresenter::Shared
        } else {
            OverlayPresenter::Local
        }
    }

    pub fn format(&self) -> FourCc {
        self.format
    }

    pub fn layout(&self) -> &OverlayLayout {
        &self.layout
    }

    pub fn image(&self) -> Option<&S::OverlayImage> {
        self.image.as_ref()
    }

    /// The whole image memory.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.layout.data_size;
        let all = self.memory.as_mut_slice();
        let len = len.min(all.len());
        &mut all[..len]
    }

    /// Detaches the segment from the server and frees the image structure.
    /// The pixel memory itself is released when `self` is dropped. Idempotent.
    pub fn release_server_side(&mut self) {
        self.memory.detach_server();
        if let Some(image) = self.image.take() {
            self.server.destroy_overlay_image(image);
        }
    }
}

impl<S: DisplayServer> Drop for OverlayImage<S> {
    fn drop(&mut self) {
        self.release_server_side();
    }
}
