// src/server/error_trap.rs

//! Scoped capture of asynchronous X protocol errors.
//!
//! Xlib reports request failures through one process-wide handler whose
//! default action is to print and exit. Requests whose failure we want to
//! survive (server-side shared memory attach) run under an [`ErrorTrap`]:
//! while it lives, errors only raise a flag; [`ErrorTrap::sync_and_check`]
//! makes the one round trip needed to observe it; dropping the trap puts the
//! previous handler back.

use libc::c_int;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use x11::xlib;

type ErrorHandler = Option<unsafe extern "C" fn(*mut xlib::Display, *mut xlib::XErrorEvent) -> c_int>;

static TRAP_ACTIVE: AtomicBool = AtomicBool::new(false);
static ERROR_SEEN: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn record_error(_display: *mut xlib::Display, event: *mut xlib::XErrorEvent) -> c_int {
    ERROR_SEEN.store(true, Ordering::SeqCst);
    if let Some(event) = event.as_ref() {
        debug!(
            "Trapped X error: code {}, request {}.{}",
            event.error_code, event.request_code, event.minor_code
        );
    }
    0
}

/// RAII guard for the temporary error handler. Only one may exist at a time.
#[derive(Debug)]
pub struct ErrorTrap {
    display: *mut xlib::Display,
    previous: ErrorHandler,
}

impl ErrorTrap {
    /// Installs the flag-raising handler, or returns `None` if another trap
    /// is already live.
    pub fn install(display: *mut xlib::Display) -> Option<Self> {
        if TRAP_ACTIVE.swap(true, Ordering::SeqCst) {
            warn!("ErrorTrap::install refused: a trap is already active");
            return None;
        }
        ERROR_SEEN.store(false, Ordering::SeqCst);
        let previous = unsafe { xlib::XSetErrorHandler(Some(record_error)) };
        Some(Self { display, previous })
    }

    /// Waits for the server to process every request sent so far and
    /// reports whether any of them failed.
    pub fn sync_and_check(&self) -> bool {
        unsafe { xlib::XSync(self.display, xlib::False) };
        !ERROR_SEEN.load(Ordering::SeqCst)
    }
}

impl Drop for ErrorTrap {
    fn drop(&mut self) {
        unsafe { xlib::XSetErrorHandler(self.previous) };
        ERROR_SEEN.store(false, Ordering::SeqCst);
        TRAP_ACTIVE.store(false, Ordering::SeqCst);
    }
}
