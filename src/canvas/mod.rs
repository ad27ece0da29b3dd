// src/canvas/mod.rs

//! One on-screen viewport and its backing store.
//!
//! The window-management side owns the drawable and calls in here when it
//! opens, resizes, exposes or closes the window. A canvas chooses between
//! the hardware-scaled overlay path and the software path once, when it is
//! created, and keeps that choice until it is destroyed.

use bitflags::bitflags;
use log::{debug, info, warn};
use std::rc::Rc;

use crate::config::{CanvasRequest, VideoConfig};
use crate::error::VideoError;
use crate::framebuffer::Framebuffer;
use crate::geometry::{self, AspectPolicy, Presentation, Rect, Region, Scale, Size, SizeHints};
use crate::overlay::{self, FourCc, OverlayImage, OverlayPort, YuvTable, PREFERRED_FORMATS};
use crate::refresh::{self, Presenter};
use crate::render::{FrameSource, Palette, PixelFormat};
use crate::server::{DisplayServer, Drawable, PortId};


bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CanvasFlags: u8 {
        const USING_SHM = 1 << 0;
        const USING_OVERLAY = 1 << 1;
    }
}

/// Which of the two refresh paths a canvas uses. Chosen by
/// [`Canvas::create`] and kept for the life of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    Software,
    Overlay,
}

#[derive(Debug)]
enum Backing<S: DisplayServer> {
    Software(Framebuffer<S>),
    Overlay {
        image: OverlayImage<S>,
        port: OverlayPort<S>,
    },
}

impl<S: DisplayServer> Backing<S> {
    fn presenter(&self) -> Presenter {
        match self {
            Backing::Software(fb) => fb.presenter().into(),
            Backing::Overlay { image, .. } => image.presenter().into(),
        }
    }

    fn path(&self) -> RenderPath {
        match self {
            Backing::Software(_) => RenderPath::Software,
            Backing::Overlay { .. } => RenderPath::Overlay,
        }
    }

    fn flags(&self) -> CanvasFlags {
        match self {
            Backing::Software(fb) if fb.is_shared() => CanvasFlags::USING_SHM,
            Backing::Software(_) => CanvasFlags::empty(),
            Backing::Overlay { image, .. } if image.is_shared() => {
                CanvasFlags::USING_OVERLAY | CanvasFlags::USING_SHM
            }
            Backing::Overlay { .. } => CanvasFlags::USING_OVERLAY,
        }
    }

    /// Detach shared memory, release the port, then free local memory.
    fn teardown(self) {
        match self {
            Backing::Software(fb) => drop(fb),
            Backing::Overlay { mut image, port } => {
                image.release_server_side();
                drop(port);
                drop(image);
            }
        }
    }
}

/// A viewport onto an externally owned drawable.
#[derive(Debug)]
pub struct Canvas<S: DisplayServer> {
    server: Rc<S>,
    drawable: Drawable,
    config: VideoConfig,
    depth: u32,
    source: Size,
    scale: Scale,
    pixel_aspect_ratio: f64,
    path: RenderPath,
    flags: CanvasFlags,
    backing: Option<Backing<S>>,
    presenter: Presenter,
    hints: SizeHints,
    drawable_size: Size,
    placement: Rect,
    palette: Palette,
    colors: Vec<u32>,
    yuv: YuvTable,
}

impl<S: DisplayServer> Canvas<S> {
    /// Builds the backing store for `drawable`.
    ///
    /// Overlay and shared memory failures are absorbed by falling back; only
    /// the failure of the last tier is returned.
    pub fn create(
        server: Rc<S>,
        drawable: Drawable,
        request: CanvasRequest,
        config: VideoConfig,
    ) -> Result<Self, VideoError> {
        let source = request.size;
        let scale = request.scale;
        Self::check_size(source, scale)?;
        let depth = request.depth.unwrap_or_else(|| server.default_depth());

        let backing = Self::allocate(&server, &config, depth, source, scale)?;
        let palette = Palette::default();
        let mut canvas = Canvas {
            server,
            drawable,
            config,
            depth,
            source,
            scale,
            pixel_aspect_ratio: request.pixel_aspect_ratio,
            path: backing.path(),
            flags: backing.flags(),
            presenter: backing.presenter(),
            backing: Some(backing),
            hints: SizeHints {
                output_w: 0,
                output_h: 0,
                min_aspect: None,
                max_aspect: None,
            },
            drawable_size: Size::default(),
            placement: Rect::default(),
            yuv: YuvTable::new(&palette),
            colors: Vec::new(),
            palette,
        };
        canvas.update_geometry();
        canvas.drawable_size = Size::new(canvas.hints.output_w, canvas.hints.output_h);
        canvas.update_placement();
        canvas.update_colors();

        info!(
            "Canvas {}x{} (scale {}x{}, depth {}) on drawable {}: {:?}, window {}x{}",
            source.width,
            source.height,
            scale.x,
            scale.y,
            depth,
            drawable,
            canvas.presenter,
            canvas.hints.output_w,
            canvas.hints.output_h
        );
        Ok(canvas)
    }

    /// Rejects empty canvases and scaled sizes the server cannot address.
    fn check_size(source: Size, scale: Scale) -> Result<Size, VideoError> {
        if source.width == 0 || source.height == 0 {
            return Err(VideoError::Config(format!(
                "canvas size {}x{} is empty",
                source.width, source.height
            )));
        }
        scale.checked_apply(source).ok_or_else(|| {
            VideoError::Config(format!(
                "canvas {}x{} at scale {}x{} exceeds {} pixels per side",
                source.width,
                source.height,
                scale.x,
                scale.y,
                geometry::MAX_DIMENSION
            ))
        })
    }

    /// Picks the path and builds its backing store: the overlay if a port
    /// and an image can be had, the software framebuffer otherwise.
    fn allocate(
        server: &Rc<S>,
        config: &VideoConfig,
        depth: u32,
        source: Size,
        scale: Scale,
    ) -> Result<Backing<S>, VideoError> {
        if config.hw_scale {
            match overlay::negotiate(server, config.requested_fourcc(), &PREFERRED_FORMATS) {
                Ok(port) => match Self::allocate_overlay(server, config, port, source) {
                    Ok(backing) => return Ok(backing),
                    Err(e) => debug!("Overlay path unavailable: {}", e),
                },
                Err(e) => debug!("Overlay negotiation: {}", e),
            }
        }
        Self::allocate_software(server, config, depth, source, scale)
    }

    /// Overlay store on a port that is already held. The port is released
    /// if no image can be created on it.
    fn allocate_overlay(
        server: &Rc<S>,
        config: &VideoConfig,
        port: OverlayPort<S>,
        source: Size,
    ) -> Result<Backing<S>, VideoError> {
        match Self::create_overlay_image(server, config, &port, source) {
            Ok(image) => Ok(Backing::Overlay { image, port }),
            Err(e) => {
                warn!(
                    "Cannot create overlay image on port {} ({}); releasing it",
                    port.id(),
                    e
                );
                Err(e)
            }
        }
    }

    fn allocate_software(
        server: &Rc<S>,
        config: &VideoConfig,
        depth: u32,
        source: Size,
        scale: Scale,
    ) -> Result<Backing<S>, VideoError> {
        let physical = scale.apply(source);
        let fb = Framebuffer::allocate(server, depth, physical.width, physical.height, config.use_shm)?;
        Ok(Backing::Software(fb))
    }

    /// Shared image first, then one retry without shared memory.
    fn create_overlay_image(
        server: &Rc<S>,
        config: &VideoConfig,
        port: &OverlayPort<S>,
        source: Size,
    ) -> Result<OverlayImage<S>, VideoError> {
        if config.use_shm && server.shm_available() {
            match OverlayImage::create(server, port, source.width, source.height, true) {
                Ok(image) => return Ok(image),
                Err(e) => warn!("Shared overlay image failed ({}); retrying without MIT-SHM", e),
            }
        }
        OverlayImage::create(server, port, source.width, source.height, false)
    }

    /// The emulated screen changed size: free the backing store and build a
    /// new one of `width`×`height` source pixels on the same path.
    ///
    /// An overlay canvas keeps its port. If the new store cannot be built,
    /// the canvas is left without one and the error is returned; switching
    /// paths takes a new canvas.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), VideoError> {
        if self.backing.is_none() {
            return Err(VideoError::Destroyed);
        }
        let source = Size::new(width, height);
        Self::check_size(source, self.scale)?;
        let backing = self.backing.take().ok_or(VideoError::Destroyed)?;
        self.flags = CanvasFlags::empty();
        self.source = source;

        let backing = match backing {
            Backing::Overlay { mut image, port } => {
                image.release_server_side();
                drop(image);
                Self::allocate_overlay(&self.server, &self.config, port, source)?
            }
            software => {
                software.teardown();
                Self::allocate_software(&self.server, &self.config, self.depth, source, self.scale)?
            }
        };
        let presenter = backing.presenter();
        if presenter != self.presenter {
            info!("Canvas tier changed from {:?} to {:?}", self.presenter, presenter);
        }
        self.flags = backing.flags();
        self.presenter = presenter;
        self.backing = Some(backing);

        self.update_geometry();
        self.update_placement();
        self.update_colors();
        debug!("Canvas resized to {}x{}", width, height);
        Ok(())
    }

    /// The window manager gave the drawable a new size.
    pub fn drawable_resized(&mut self, width: u32, height: u32) {
        self.drawable_size = Size::new(width, height);
        self.update_placement();
    }

    /// Renders `region` of `frame` and presents it.
    ///
    /// A region that does not fit the current buffers is dropped with
    /// [`VideoError::StaleGeometry`]; the canvas stays usable.
    pub fn refresh(&mut self, frame: &FrameSource<'_>, region: Region) -> Result<(), VideoError> {
        if self.backing.is_none() {
            return Err(VideoError::Destroyed);
        }
        if region.width == 0 || region.height == 0 {
            return Ok(());
        }
        if self.path == RenderPath::Overlay {
            if let Some((w, h)) = self.server.drawable_size(self.drawable) {
                if Size::new(w, h) != self.drawable_size {
                    self.drawable_resized(w, h);
                }
            }
        }

        let result = match self.backing.as_mut() {
            Some(Backing::Software(fb)) => refresh::refresh_software(
                &*self.server,
                self.drawable,
                fb,
                frame,
                &self.colors,
                &region,
                self.scale,
            ),
            Some(Backing::Overlay { image, port }) => refresh::refresh_overlay(
                &*self.server,
                self.drawable,
                port,
                image,
                frame,
                &self.yuv,
                &region,
                self.source,
                self.placement,
            ),
            None => Err(VideoError::Destroyed),
        };
        if let Err(e) = &result {
            warn!("Refresh dropped: {}", e);
            return result;
        }
        if self.config.use_xsync {
            self.server.sync();
        }
        Ok(())
    }

    /// Releases everything. Safe to call more than once.
    pub fn destroy(&mut self) {
        match self.backing.take() {
            Some(backing) => {
                backing.teardown();
                self.flags = CanvasFlags::empty();
                info!("Canvas on drawable {} destroyed", self.drawable);
            }
            None => debug!("Canvas on drawable {} already destroyed", self.drawable),
        }
    }

    /// Installs a new palette for subsequent refreshes.
    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
        self.update_colors();
    }

    /// Where the emulated screen is shown, for pointer and lightpen input.
    pub fn presentation(&self) -> Presentation {
        Presentation {
            rect: self.placement,
            source: self.source,
        }
    }

    pub fn size_hints(&self) -> SizeHints {
        self.hints
    }

    pub fn flags(&self) -> CanvasFlags {
        self.flags
    }

    pub fn is_using_shm(&self) -> bool {
        self.flags.contains(CanvasFlags::USING_SHM)
    }

    pub fn is_using_overlay(&self) -> bool {
        self.flags.contains(CanvasFlags::USING_OVERLAY)
    }

    pub fn is_destroyed(&self) -> bool {
        self.backing.is_none()
    }

    pub fn path(&self) -> RenderPath {
        self.path
    }

    pub fn presenter(&self) -> Presenter {
        self.presenter
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn source_size(&self) -> Size {
        self.source
    }

    /// Size of the scaled image in physical pixels.
    pub fn physical_size(&self) -> Size {
        self.scale.apply(self.source)
    }

    /// Row length of the software buffer in pixels, rounded up to four.
    pub fn buffer_width(&self) -> Option<u32> {
        match self.backing.as_ref()? {
            Backing::Software(fb) => Some(fb.layout().width),
            Backing::Overlay { image, .. } => Some(image.layout().width),
        }
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn overlay_format(&self) -> Option<FourCc> {
        match self.backing.as_ref()? {
            Backing::Overlay { image, .. } => Some(image.format()),
            Backing::Software(_) => None,
        }
    }

    pub fn overlay_port(&self) -> Option<PortId> {
        match self.backing.as_ref()? {
            Backing::Overlay { port, .. } => Some(port.id()),
            Backing::Software(_) => None,
        }
    }

    fn aspect_policy(&self) -> AspectPolicy {
        if self.path == RenderPath::Overlay {
            self.config.overlay_aspect()
        } else {
            self.config.software_aspect()
        }
    }

    fn update_geometry(&mut self) {
        self.hints = geometry::size_hints(
            self.source,
            self.scale,
            self.pixel_aspect_ratio,
            &self.aspect_policy(),
        );
    }

    fn update_placement(&mut self) {
        let physical = self.physical_size();
        self.placement = if self.path == RenderPath::Overlay {
            let ratio = self.aspect_policy().effective_ratio(self.pixel_aspect_ratio);
            geometry::place(
                self.drawable_size.width,
                self.drawable_size.height,
                physical.width,
                physical.height,
                ratio,
            )
        } else {
            Rect::new(0, 0, physical.width, physical.height)
        };
        debug!("Canvas placement {:?}", self.placement);
    }

    fn update_colors(&mut self) {
        match self.backing.as_ref() {
            Some(Backing::Software(fb)) => {
                let format: PixelFormat = fb.pixel_format();
                self.colors = format.color_table(&self.palette);
            }
            Some(Backing::Overlay { .. }) => self.yuv = YuvTable::new(&self.palette),
            None => {}
        }
    }
}

impl<S: DisplayServer> Drop for Canvas<S> {
    fn drop(&mut self) {
        if let Some(backing) = self.backing.take() {
            backing.teardown();
        }
    }
}
