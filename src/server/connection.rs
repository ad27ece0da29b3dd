// src/server/connection.rs

use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};
use std::ptr;

use libc::c_int;
use x11::xlib;

use super::ffi;

/// Manages an X11 Display connection, ensuring it's closed on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens the display named by `DISPLAY`.
    fn new() -> Result<Self> {
        let display_ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if display_ptr.is_null() {
            Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ))
        } else {
            debug!("X display opened: {:p}", display_ptr);
            Ok(Self { ptr: display_ptr })
        }
    }

    #[inline]
    fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            info!("Closing X11 display connection: {:p}", self.ptr);
            unsafe {
                let status = xlib::XCloseDisplay(self.ptr);
                if status != 0 {
                    warn!(
                        "XCloseDisplay returned non-zero status: {}. Display may not have closed cleanly.",
                        status
                    );
                }
            }
        }
    }
}

/// Wraps an X11 `GC` so it is freed via `XFreeGC` on drop.
#[derive(Debug)]
pub(super) struct SafeGc {
    gc: xlib::GC,
    display: *mut xlib::Display,
}

impl SafeGc {
    /// Creates a default GC on `drawable`. Any drawable of the right depth
    /// on the same screen can use it afterwards.
    fn new(display: *mut xlib::Display, drawable: xlib::Drawable) -> Result<Self> {
        let gc = unsafe { xlib::XCreateGC(display, drawable, 0, ptr::null_mut()) };
        if gc.is_null() {
            return Err(anyhow!("XCreateGC failed for drawable {}", drawable));
        }
        trace!("Created GC {:p} on drawable {}", gc, drawable);
        Ok(Self { gc, display })
    }

    #[inline]
    pub(super) fn raw(&self) -> xlib::GC {
        self.gc
    }
}

impl Drop for SafeGc {
    fn drop(&mut self) {
        if self.display.is_null() {
            warn!("SafeGc::drop called with a null display pointer. Cannot free GC: {:p}. This is a bug.", self.gc);
            return;
        }
        trace!("Freeing GC via SafeGc drop: {:p}", self.gc);
        unsafe { xlib::XFreeGC(self.display, self.gc) };
    }
}

/// The connection to the X server plus the per-screen facts the video layer
/// needs: default visual and depth, root window, and whether MIT-SHM is
/// usable. Everything is queried once here.
///
/// Field order matters: the GC is freed before the display is closed.
#[derive(Debug)]
pub struct Connection {
    gc: SafeGc,
    managed_display: ManagedDisplay,
    screen: c_int,
    root: xlib::Window,
    visual: *mut xlib::Visual,
    depth: u32,
    shm_available: bool,
}

impl Connection {
    /// Opens the default display and probes it.
    pub fn new() -> Result<Self> {
        info!("Establishing X11 server connection.");

        let managed_display = ManagedDisplay::new()?;
        let display = managed_display.raw();

        let screen = unsafe { xlib::XDefaultScreen(display) };
        let root = unsafe { xlib::XRootWindow(display, screen) };
        let visual = unsafe { xlib::XDefaultVisual(display, screen) };
        if visual.is_null() {
            return Err(anyhow!(
                "Failed to get default visual for screen {}.",
                screen
            ));
        }
        let depth = unsafe { xlib::XDefaultDepth(display, screen) } as u32;
        debug!(
            "Screen {}: root window {}, visual {:p}, depth {}",
            screen, root, visual, depth
        );

        let shm_available = Self::query_shm(display);
        let gc = SafeGc::new(display, root)?;

        info!("X11 server connection established successfully.");
        Ok(Connection {
            gc,
            managed_display,
            screen,
            root,
            visual,
            depth,
            shm_available,
        })
    }

    fn query_shm(display: *mut xlib::Display) -> bool {
        let (mut major, mut minor, mut pixmaps) = (0, 0, 0);
        let ok = unsafe { ffi::XShmQueryVersion(display, &mut major, &mut minor, &mut pixmaps) };
        if ok == 0 {
            info!("MIT-SHM extension not available.");
            return false;
        }
        info!("MIT-SHM extension version {}.{} detected.", major, minor);
        true
    }

    /// The raw display pointer. Valid for the lifetime of `self`.
    #[inline]
    pub fn display(&self) -> *mut xlib::Display {
        self.managed_display.raw()
    }

    #[inline]
    pub fn screen(&self) -> c_int {
        self.screen
    }

    #[inline]
    pub fn root(&self) -> xlib::Window {
        self.root
    }

    #[inline]
    pub fn visual(&self) -> *mut xlib::Visual {
        self.visual
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn shm_available(&self) -> bool {
        self.shm_available
    }

    #[inline]
    pub(super) fn gc(&self) -> xlib::GC {
        self.gc.raw()
    }
}
