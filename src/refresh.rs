// src/refresh.rs

//! Per-frame path: bounds checks, rendering into the backing store and the
//! present call.

use log::trace;

use crate::error::VideoError;
use crate::framebuffer::Framebuffer;
use crate::geometry::{Rect, Region, Scale, Size};
use crate::overlay::{yuv, OverlayImage, OverlayPort, YuvTable};
use crate::render::{self, FrameSource};
use crate::server::{DisplayServer, Drawable};

/// How a core image reaches the drawable. Fixed when the framebuffer is
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorePresenter {
    Shared,
    Local,
}

impl CorePresenter {
    fn put<S: DisplayServer>(self, server: &S, drawable: Drawable, image: &S::Image, src: Rect) {
        match self {
            CorePresenter::Shared => server.shm_put_image(drawable, image, src, src.x, src.y),
            CorePresenter::Local => server.put_image(drawable, image, src, src.x, src.y),
        }
    }
}

/// How an overlay image reaches the drawable. Fixed when the overlay image
/// is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPresenter {
    Shared,
    Local,
}

impl OverlayPresenter {
    fn put<S: DisplayServer>(
        self,
        server: &S,
        port: &OverlayPort<S>,
        drawable: Drawable,
        image: &S::OverlayImage,
        src: Rect,
        dest: Rect,
    ) {
        match self {
            OverlayPresenter::Shared => server.shm_put_overlay(port.id(), drawable, image, src, dest),
            OverlayPresenter::Local => server.put_overlay(port.id(), drawable, image, src, dest),
        }
    }
}

/// Summary of the present strategy a canvas ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presenter {
    SharedImage,
    LocalImage,
    Overlay { shared: bool },
}

impl From<CorePresenter> for Presenter {
    fn from(p: CorePresenter) -> Self {
        match p {
            CorePresenter::Shared => Presenter::SharedImage,
            CorePresenter::Local => Presenter::LocalImage,
        }
    }
}

impl From<OverlayPresenter> for Presenter {
    fn from(p: OverlayPresenter) -> Self {
        Presenter::Overlay {
            shared: p == OverlayPresenter::Shared,
        }
    }
}

fn stale(region: &Region, width: u32, height: u32) -> VideoError {
    VideoError::StaleGeometry {
        region: *region,
        width,
        height,
    }
}

/// The source side of `region` must lie inside the frame handed in.
pub fn check_source(frame: &FrameSource<'_>, region: &Region) -> Result<(), VideoError> {
    if frame.contains(region.src_x, region.src_y, region.width, region.height) {
        Ok(())
    } else {
        Err(stale(region, frame.width, frame.height))
    }
}

/// The destination side of `region`, after scaling, must lie inside `bounds`.
pub fn check_dest(region: &Region, scale: Scale, bounds: Size) -> Result<(), VideoError> {
    let (x, y, w, h) = region.scaled_dest(scale);
    if x + w <= bounds.width as u64 && y + h <= bounds.height as u64 {
        Ok(())
    } else {
        Err(stale(region, bounds.width, bounds.height))
    }
}

/// Software path: render at scaled coordinates, then put the same rectangle.
#[allow(clippy::too_many_arguments)]
pub fn refresh_software<S: DisplayServer>(
    server: &S,
    drawable: Drawable,
    fb: &mut Framebuffer<S>,
    frame: &FrameSource<'_>,
    colors: &[u32],
    region: &Region,
    scale: Scale,
) -> Result<(), VideoError> {
    check_source(frame, region)?;
    check_dest(region, scale, fb.size())?;

    let format = fb.pixel_format();
    let pitch = fb.layout().bytes_per_line as usize;
    render::render_scaled(frame, colors, format, fb.pixels_mut(), pitch, region, scale);

    let (x, y, w, h) = region.scaled_dest(scale);
    let src = Rect::new(x as i32, y as i32, w as u32, h as u32);
    if let Some(image) = fb.image() {
        fb.presenter().put(server, drawable, image, src);
    }
    Ok(())
}

/// Overlay path: convert into the YUV image, then let the hardware scale the
/// whole frame onto `placement`.
#[allow(clippy::too_many_arguments)]
pub fn refresh_overlay<S: DisplayServer>(
    server: &S,
    drawable: Drawable,
    port: &OverlayPort<S>,
    image: &mut OverlayImage<S>,
    frame: &FrameSource<'_>,
    table: &YuvTable,
    region: &Region,
    source: Size,
    placement: Rect,
) -> Result<(), VideoError> {
    check_source(frame, region)?;
    check_dest(region, Scale::UNIT, source)?;

    let layout = match image.format().layout() {
        Some(layout) => layout,
        None => return Err(VideoError::HardwareUnavailable),
    };
    let planes = image.layout().clone();
    yuv::convert(frame, table, layout, &planes, image.data_mut(), region);

    let src = Rect::new(0, 0, source.width, source.height);
    if let Some(img) = image.image() {
        image.presenter().put(server, port, drawable, img, src, placement);
    }
    trace!("Overlay present {:?} -> {:?}", src, placement);
    Ok(())
}
