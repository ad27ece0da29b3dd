// src/server/xlib.rs

//! [`DisplayServer`] on a live Xlib connection.

use anyhow::Result;
use libc::{c_char, c_int, c_uint, c_void};
use log::{debug, trace, warn};
use nix::errno::Errno;
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use x11::xlib;

use super::connection::Connection;
use super::error_trap::ErrorTrap;
use super::ffi;
use super::{
    AdaptorCaps, AdaptorInfo, DisplayServer, Drawable, ImageLayout, OverlayLayout, PortId,
    ShmSegmentInfo,
};
use crate::error::VideoError;
use crate::geometry::Rect;
use crate::overlay::FourCc;

/// Owned `XImage` structure. The pixel memory is never owned by it.
#[derive(Debug)]
pub struct XImageHandle(NonNull<xlib::XImage>);

/// Owned `XvImage` structure. The pixel memory is never owned by it.
#[derive(Debug)]
pub struct XvImageHandle(NonNull<ffi::XvImage>);

/// The live display server.
#[derive(Debug)]
pub struct XlibServer {
    conn: Connection,
}

impl XlibServer {
    /// Opens the display named by `DISPLAY`.
    pub fn open() -> Result<Self> {
        Ok(Self {
            conn: Connection::new()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    #[inline]
    fn dpy(&self) -> *mut xlib::Display {
        self.conn.display()
    }
}

impl DisplayServer for XlibServer {
    type Image = XImageHandle;
    type OverlayImage = XvImageHandle;

    fn default_depth(&self) -> u32 {
        self.conn.depth()
    }

    fn shm_available(&self) -> bool {
        self.conn.shm_available()
    }

    fn sync(&self) {
        unsafe { xlib::XSync(self.dpy(), xlib::False) };
    }

    fn drawable_size(&self, drawable: Drawable) -> Option<(u32, u32)> {
        let mut root = 0;
        let (mut x, mut y) = (0, 0);
        let (mut w, mut h, mut border, mut depth) = (0, 0, 0, 0);
        let status = unsafe {
            xlib::XGetGeometry(
                self.dpy(),
                drawable,
                &mut root,
                &mut x,
                &mut y,
                &mut w,
                &mut h,
                &mut border,
                &mut depth,
            )
        };
        (status != 0).then_some((w, h))
    }

    fn shm_get(&self, size: usize, mode: u32) -> nix::Result<c_int> {
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | mode as c_int) };
        if id < 0 {
            return Err(Errno::last());
        }
        Ok(id)
    }

    fn shm_attach(&self, shmid: c_int) -> nix::Result<NonNull<u8>> {
        let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(Errno::last());
        }
        NonNull::new(addr as *mut u8).ok_or(Errno::EFAULT)
    }

    fn shm_detach(&self, addr: NonNull<u8>) -> nix::Result<()> {
        let rc = unsafe { libc::shmdt(addr.as_ptr() as *const c_void) };
        Errno::result(rc).map(drop)
    }

    fn shm_remove(&self, shmid: c_int) -> nix::Result<()> {
        let rc = unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) };
        Errno::result(rc).map(drop)
    }

    fn shm_server_attach(&self, info: &mut ShmSegmentInfo) -> Result<(), VideoError> {
        let trap = ErrorTrap::install(self.dpy())
            .ok_or(VideoError::ProtocolRejection("MIT-SHM attach (error trap busy)"))?;
        let sent = unsafe { ffi::XShmAttach(self.dpy(), info) };
        let accepted = trap.sync_and_check();
        drop(trap);
        if sent == 0 || !accepted {
            return Err(VideoError::ProtocolRejection("MIT-SHM attach"));
        }
        debug!("Server attached shm segment {}", info.shmid);
        Ok(())
    }

    fn shm_server_detach(&self, info: &mut ShmSegmentInfo) {
        unsafe { ffi::XShmDetach(self.dpy(), info) };
    }

    fn create_image(
        &self,
        depth: u32,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<XImageHandle> {
        let image = unsafe {
            match shm {
                Some(info) => ffi::XShmCreateImage(
                    self.dpy(),
                    self.conn.visual(),
                    depth,
                    xlib::ZPixmap,
                    ptr::null_mut(),
                    info,
                    width,
                    height,
                ),
                None => xlib::XCreateImage(
                    self.dpy(),
                    self.conn.visual(),
                    depth,
                    xlib::ZPixmap,
                    0,
                    ptr::null_mut(),
                    width,
                    height,
                    32,
                    0,
                ),
            }
        };
        NonNull::new(image).map(XImageHandle)
    }

    fn image_layout(&self, image: &XImageHandle) -> ImageLayout {
        let img = unsafe { image.0.as_ref() };
        ImageLayout {
            width: img.width as u32,
            height: img.height as u32,
            bytes_per_line: img.bytes_per_line as u32,
            bits_per_pixel: img.bits_per_pixel as u32,
            red_mask: img.red_mask as u32,
            green_mask: img.green_mask as u32,
            blue_mask: img.blue_mask as u32,
            msb_first: img.byte_order == xlib::MSBFirst,
        }
    }

    fn set_image_data(&self, image: &mut XImageHandle, data: *mut u8) {
        unsafe { image.0.as_mut().data = data as *mut c_char };
    }

    fn destroy_image(&self, image: XImageHandle) {
        unsafe {
            (*image.0.as_ptr()).data = ptr::null_mut(); // Don't let XDestroyImage free our buffer
            xlib::XDestroyImage(image.0.as_ptr());
        }
    }

    fn put_image(&self, drawable: Drawable, image: &XImageHandle, src: Rect, dest_x: i32, dest_y: i32) {
        unsafe {
            xlib::XPutImage(
                self.dpy(),
                drawable,
                self.conn.gc(),
                image.0.as_ptr(),
                src.x,
                src.y,
                dest_x,
                dest_y,
                src.w,
                src.h,
            );
            xlib::XFlush(self.dpy());
        }
    }

    fn shm_put_image(&self, drawable: Drawable, image: &XImageHandle, src: Rect, dest_x: i32, dest_y: i32) {
        unsafe {
            ffi::XShmPutImage(
                self.dpy(),
                drawable,
                self.conn.gc(),
                image.0.as_ptr(),
                src.x,
                src.y,
                dest_x,
                dest_y,
                src.w,
                src.h,
                xlib::False,
            );
            xlib::XFlush(self.dpy());
        }
    }

    fn query_adaptors(&self) -> Option<Vec<AdaptorInfo>> {
        let (mut version, mut release, mut request, mut event, mut error) = (0, 0, 0, 0, 0);
        let status = unsafe {
            ffi::XvQueryExtension(
                self.dpy(),
                &mut version,
                &mut release,
                &mut request,
                &mut event,
                &mut error,
            )
        };
        if status != ffi::XV_SUCCESS {
            debug!("XVideo extension not available");
            return None;
        }
        trace!("XVideo {}.{}", version, release);

        let mut count: c_uint = 0;
        let mut infos: *mut ffi::XvAdaptorInfo = ptr::null_mut();
        let status =
            unsafe { ffi::XvQueryAdaptors(self.dpy(), self.conn.root(), &mut count, &mut infos) };
        if status != ffi::XV_SUCCESS {
            warn!("XvQueryAdaptors failed with status {}", status);
            return None;
        }
        if infos.is_null() {
            return Some(Vec::new());
        }

        let adaptors = unsafe { std::slice::from_raw_parts(infos, count as usize) }
            .iter()
            .map(|a| AdaptorInfo {
                name: if a.name.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(a.name) }.to_string_lossy().into_owned()
                },
                base_id: a.base_id,
                num_ports: a.num_ports as u32,
                caps: AdaptorCaps::from_bits_truncate(a.type_ as u8),
            })
            .collect();
        unsafe { ffi::XvFreeAdaptorInfo(infos) };
        Some(adaptors)
    }

    fn list_image_formats(&self, port: PortId) -> Vec<FourCc> {
        let mut count: c_int = 0;
        let formats = unsafe { ffi::XvListImageFormats(self.dpy(), port, &mut count) };
        if formats.is_null() {
            return Vec::new();
        }
        let ids = unsafe { std::slice::from_raw_parts(formats, count.max(0) as usize) }
            .iter()
            .map(|f| FourCc(f.id as u32))
            .collect();
        unsafe { xlib::XFree(formats as *mut c_void) };
        ids
    }

    fn grab_port(&self, port: PortId) -> bool {
        unsafe { ffi::XvGrabPort(self.dpy(), port, xlib::CurrentTime) == ffi::XV_SUCCESS }
    }

    fn ungrab_port(&self, port: PortId) {
        unsafe { ffi::XvUngrabPort(self.dpy(), port, xlib::CurrentTime) };
    }

    fn create_overlay_image(
        &self,
        port: PortId,
        format: FourCc,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<XvImageHandle> {
        let id = format.0 as c_int;
        let image = unsafe {
            match shm {
                Some(info) => ffi::XvShmCreateImage(
                    self.dpy(),
                    port,
                    id,
                    ptr::null_mut(),
                    width as c_int,
                    height as c_int,
                    info,
                ),
                None => ffi::XvCreateImage(
                    self.dpy(),
                    port,
                    id,
                    ptr::null_mut(),
                    width as c_int,
                    height as c_int,
                ),
            }
        };
        NonNull::new(image).map(XvImageHandle)
    }

    fn overlay_layout(&self, image: &XvImageHandle) -> OverlayLayout {
        let img = unsafe { image.0.as_ref() };
        let planes = img.num_planes.max(0) as usize;
        let read = |p: *mut c_int| -> Vec<u32> {
            if p.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(p, planes) }
                    .iter()
                    .map(|&v| v as u32)
                    .collect()
            }
        };
        OverlayLayout {
            width: img.width as u32,
            height: img.height as u32,
            data_size: img.data_size.max(0) as usize,
            pitches: read(img.pitches),
            offsets: read(img.offsets),
        }
    }

    fn set_overlay_data(&self, image: &mut XvImageHandle, data: *mut u8) {
        unsafe { image.0.as_mut().data = data as *mut c_char };
    }

    fn destroy_overlay_image(&self, image: XvImageHandle) {
        unsafe {
            (*image.0.as_ptr()).data = ptr::null_mut();
            xlib::XFree(image.0.as_ptr() as *mut c_void);
        }
    }

    fn put_overlay(&self, port: PortId, drawable: Drawable, image: &XvImageHandle, src: Rect, dest: Rect) {
        unsafe {
            ffi::XvPutImage(
                self.dpy(),
                port,
                drawable,
                self.conn.gc(),
                image.0.as_ptr(),
                src.x,
                src.y,
                src.w,
                src.h,
                dest.x,
                dest.y,
                dest.w,
                dest.h,
            );
            xlib::XFlush(self.dpy());
        }
    }

    fn shm_put_overlay(&self, port: PortId, drawable: Drawable, image: &XvImageHandle, src: Rect, dest: Rect) {
        unsafe {
            ffi::XvShmPutImage(
                self.dpy(),
                port,
                drawable,
                self.conn.gc(),
                image.0.as_ptr(),
                src.x,
                src.y,
                src.w,
                src.h,
                dest.x,
                dest.y,
                dest.w,
                dest.h,
                xlib::False,
            );
            xlib::XFlush(self.dpy());
        }
    }
}
