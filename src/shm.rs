// src/shm.rs

//! Owned System V shared memory segment shared with the display server.

use bitflags::bitflags;
use log::{debug, error, trace};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::VideoError;
use crate::server::{DisplayServer, ShmSegmentInfo};

/// Server gets read access only; enough for core images.
pub const MODE_READ_ONLY_SERVER: u32 = 0o604;
/// XVideo images are mapped read-write by some drivers.
pub const MODE_READ_WRITE: u32 = 0o777;

bitflags! {
    /// Which setup steps have succeeded so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SegmentState: u8 {
        const ALLOCATED = 1 << 0;
        const ATTACHED = 1 << 1;
        const SERVER_ATTACHED = 1 << 2;
        const REMOVED = 1 << 3;
    }
}

/// A shared memory segment and its `XShmSegmentInfo`.
///
/// Setup is split into steps because the image structure has to be created
/// against [`ShmSegment::info_mut`] before the segment size is known. Drop
/// undoes exactly the steps that succeeded, newest first.
#[derive(Debug)]
pub struct ShmSegment<S: DisplayServer> {
    server: Rc<S>,
    // Boxed: the server-side image keeps a pointer to it.
    info: Box<ShmSegmentInfo>,
    addr: Option<NonNull<u8>>,
    size: usize,
    state: SegmentState,
}

impl<S: DisplayServer> ShmSegment<S> {
    pub fn new(server: Rc<S>) -> Self {
        Self {
            server,
            info: Box::default(),
            addr: None,
            size: 0,
            state: SegmentState::empty(),
        }
    }

    /// Description handed to the server when creating a shared image.
    pub fn info_mut(&mut self) -> &mut ShmSegmentInfo {
        &mut self.info
    }

    pub fn id(&self) -> i32 {
        self.info.shmid
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Start of the client mapping, null before [`attach`](Self::attach).
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.addr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// `shmget` of `size` bytes with permission bits `mode`.
    pub fn allocate(&mut self, size: usize, mode: u32) -> Result<(), VideoError> {
        let shmid = self
            .server
            .shm_get(size, mode)
            .map_err(|errno| VideoError::SharedMemory { op: "shmget", errno })?;
        self.info.shmid = shmid;
        // The server may only write when the group or other write bits are set.
        self.info.read_only = libc::c_int::from(mode & 0o022 == 0);
        self.size = size;
        self.state |= SegmentState::ALLOCATED;
        trace!("Allocated shm segment {} ({} bytes)", shmid, size);
        Ok(())
    }

    /// Maps the segment into this process.
    pub fn attach(&mut self) -> Result<(), VideoError> {
        let addr = self
            .server
            .shm_attach(self.info.shmid)
            .map_err(|errno| VideoError::SharedMemory { op: "shmat", errno })?;
        self.info.shmaddr = addr.as_ptr() as *mut libc::c_char;
        self.addr = Some(addr);
        self.state |= SegmentState::ATTACHED;
        Ok(())
    }

    /// Attaches the segment on the server side. Costs one round trip.
    pub fn attach_server(&mut self) -> Result<(), VideoError> {
        self.server.shm_server_attach(&mut self.info)?;
        self.state |= SegmentState::SERVER_ATTACHED;
        Ok(())
    }

    /// Lets the OS destroy the segment once every attachment is gone, so it
    /// cannot outlive a crash.
    pub fn mark_for_removal(&mut self) {
        if self.state.contains(SegmentState::REMOVED) {
            return;
        }
        match self.server.shm_remove(self.info.shmid) {
            Ok(()) => {
                self.state |= SegmentState::REMOVED;
                debug!("Shm segment {} marked for removal", self.info.shmid);
            }
            Err(e) => error!("shmctl(IPC_RMID) on segment {} failed: {}", self.info.shmid, e),
        }
    }

    /// Server-side detach. Must happen before the image using the segment
    /// is destroyed; idempotent.
    pub fn detach_server(&mut self) {
        if self.state.contains(SegmentState::SERVER_ATTACHED) {
            self.server.shm_server_detach(&mut self.info);
            self.state.remove(SegmentState::SERVER_ATTACHED);
        }
    }
}

impl<S: DisplayServer> Drop for ShmSegment<S> {
    fn drop(&mut self) {
        self.detach_server();
        if let Some(addr) = self.addr.take() {
            if let Err(e) = self.server.shm_detach(addr) {
                error!("shmdt of segment {} failed: {}", self.info.shmid, e);
            }
            self.state.remove(SegmentState::ATTACHED);
        }
        if self.state.contains(SegmentState::ALLOCATED) {
            self.mark_for_removal();
        }
        trace!("Released shm segment {}", self.info.shmid);
    }
}

/// Pixel memory behind an image: a shared segment or a plain allocation.
#[derive(Debug)]
pub enum PixelMemory<S: DisplayServer> {
    Shared(ShmSegment<S>),
    Local(Vec<u8>),
}

impl<S: DisplayServer> PixelMemory<S> {
    /// A zeroed local buffer. Reports allocation failure instead of aborting.
    pub fn local(len: usize) -> Result<Self, VideoError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| VideoError::ResourceExhaustion(format!("{} bytes of image memory", len)))?;
        buf.resize(len, 0);
        Ok(PixelMemory::Local(buf))
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, PixelMemory::Shared(_))
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            PixelMemory::Shared(seg) => seg.as_mut_ptr(),
            PixelMemory::Local(buf) => buf.as_mut_ptr(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            PixelMemory::Shared(seg) => {
                let ptr = seg.as_mut_ptr();
                if ptr.is_null() {
                    return &mut [];
                }
                // The mapping stays valid until the segment is dropped.
                unsafe { std::slice::from_raw_parts_mut(ptr, seg.len()) }
            }
            PixelMemory::Local(buf) => buf,
        }
    }

    /// Server-side detach of a shared segment; no-op for local memory.
    pub fn detach_server(&mut self) {
        if let PixelMemory::Shared(seg) = self {
            seg.detach_server();
        }
    }
}
