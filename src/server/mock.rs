// src/server/mock.rs

//! A recording, fault-injecting [`DisplayServer`] for tests.
//!
//! Shared memory segments follow System V mark-for-removal semantics: a
//! removed segment lives on until its last attachment (client or server)
//! is gone. Every resource is counted so tests can assert that nothing
//! leaks after teardown.

use bitflags::bitflags;
use libc::c_int;
use nix::errno::Errno;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;

use super::{
    AdaptorCaps, AdaptorInfo, DisplayServer, Drawable, ImageLayout, OverlayLayout, PortId,
    ShmSegmentInfo,
};
use crate::error::VideoError;
use crate::geometry::Rect;
use crate::overlay::FourCc;

bitflags! {
    /// Steps that should fail. Flags stay set until cleared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Faults: u32 {
        const CREATE_SHM_IMAGE = 1 << 0;
        const SHM_GET = 1 << 1;
        const SHM_ATTACH = 1 << 2;
        const SERVER_ATTACH = 1 << 3;
        const CREATE_IMAGE = 1 << 4;
        const CREATE_OVERLAY_SHM_IMAGE = 1 << 5;
        const CREATE_OVERLAY_IMAGE = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutKind {
    Image,
    ShmImage,
    Overlay,
    ShmOverlay,
}

/// One present call as the server saw it.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub kind: PutKind,
    pub drawable: Drawable,
    pub port: Option<PortId>,
    pub src: Rect,
    pub dest: Rect,
    /// Whether `src` lies inside the image that was put.
    pub in_bounds: bool,
    /// Copy of the image memory at the time of the call.
    pub frame: Vec<u8>,
}

#[derive(Debug)]
pub struct MockImage {
    layout: ImageLayout,
    data: *mut u8,
}

#[derive(Debug)]
pub struct MockOverlayImage {
    port: PortId,
    layout: OverlayLayout,
    data: *mut u8,
}

#[derive(Debug)]
struct Segment {
    memory: Box<[u8]>,
    mode: u32,
    attaches: u32,
    removed: bool,
}

#[derive(Debug, Default)]
struct State {
    segments: HashMap<c_int, Segment>,
    client_maps: HashMap<usize, c_int>,
    server_attached: HashSet<c_int>,
    attach_read_only: Vec<bool>,
    next_shmid: c_int,
    adaptors: Vec<(AdaptorInfo, Vec<FourCc>)>,
    busy_ports: HashSet<PortId>,
    grabbed: HashSet<PortId>,
    grab_log: Vec<PortId>,
    contract_violations: Vec<String>,
    puts: Vec<PutRecord>,
}

impl State {
    fn reap(&mut self, shmid: c_int) {
        if let Some(seg) = self.segments.get(&shmid) {
            if seg.removed && seg.attaches == 0 {
                self.segments.remove(&shmid);
            }
        }
    }
}

#[derive(Debug)]
pub struct MockServer {
    depth: u32,
    shm_available: Cell<bool>,
    faults: Cell<Faults>,
    drawable_size: Cell<Option<(u32, u32)>>,
    round_trips: Cell<usize>,
    live_images: Cell<usize>,
    live_overlays: Cell<usize>,
    state: RefCell<State>,
}

impl MockServer {
    /// A server of the given default depth with MIT-SHM and no XVideo.
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            shm_available: Cell::new(true),
            faults: Cell::new(Faults::empty()),
            drawable_size: Cell::new(None),
            round_trips: Cell::new(0),
            live_images: Cell::new(0),
            live_overlays: Cell::new(0),
            state: RefCell::new(State {
                next_shmid: 100,
                ..State::default()
            }),
        }
    }

    pub fn without_shm(self) -> Self {
        self.shm_available.set(false);
        self
    }

    /// Adds an adaptor with `ports` consecutive ports starting at `base_id`.
    pub fn with_adaptor(self, name: &str, base_id: PortId, ports: u32, formats: &[FourCc]) -> Self {
        let info = AdaptorInfo {
            name: name.to_string(),
            base_id,
            num_ports: ports,
            caps: AdaptorCaps::INPUT | AdaptorCaps::IMAGE,
        };
        self.state.borrow_mut().adaptors.push((info, formats.to_vec()));
        self
    }

    /// Marks a port as grabbed by another client.
    pub fn with_busy_port(self, port: PortId) -> Self {
        self.state.borrow_mut().busy_ports.insert(port);
        self
    }

    pub fn set_faults(&self, faults: Faults) {
        self.faults.set(faults);
    }

    pub fn set_drawable_size(&self, width: u32, height: u32) {
        self.drawable_size.set(Some((width, height)));
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.get()
    }

    pub fn live_segments(&self) -> usize {
        self.state.borrow().segments.len()
    }

    /// Permission bits of every live segment.
    pub fn segment_modes(&self) -> Vec<u32> {
        self.state.borrow().segments.values().map(|s| s.mode).collect()
    }

    pub fn live_images(&self) -> usize {
        self.live_images.get()
    }

    pub fn live_overlays(&self) -> usize {
        self.live_overlays.get()
    }

    pub fn grabbed_ports(&self) -> Vec<PortId> {
        let mut ports: Vec<_> = self.state.borrow().grabbed.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Every successful grab, in order.
    pub fn grab_log(&self) -> Vec<PortId> {
        self.state.borrow().grab_log.clone()
    }

    pub fn contract_violations(&self) -> Vec<String> {
        self.state.borrow().contract_violations.clone()
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.state.borrow().puts.clone()
    }

    /// The read-only flag of every server attach, in order.
    pub fn server_attach_read_only(&self) -> Vec<bool> {
        self.state.borrow().attach_read_only.clone()
    }

    pub fn clear_puts(&self) {
        self.state.borrow_mut().puts.clear();
    }

    /// True when no segment, attachment, image or port is held.
    pub fn is_clean(&self) -> bool {
        let state = self.state.borrow();
        state.segments.is_empty()
            && state.client_maps.is_empty()
            && state.server_attached.is_empty()
            && state.grabbed.is_empty()
            && self.live_images.get() == 0
            && self.live_overlays.get() == 0
    }

    fn fails(&self, step: Faults) -> bool {
        self.faults.get().contains(step)
    }

    fn violation(&self, what: String) {
        self.state.borrow_mut().contract_violations.push(what);
    }

    fn record_put(
        &self,
        kind: PutKind,
        drawable: Drawable,
        port: Option<PortId>,
        (width, height, size, data): (u32, u32, usize, *mut u8),
        src: Rect,
        dest: Rect,
    ) {
        let in_bounds = src.x >= 0
            && src.y >= 0
            && src.x as u64 + src.w as u64 <= width as u64
            && src.y as u64 + src.h as u64 <= height as u64;
        let frame = if data.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(data, size) }.to_vec()
        };
        self.state.borrow_mut().puts.push(PutRecord {
            kind,
            drawable,
            port,
            src,
            dest,
            in_bounds,
            frame,
        });
    }
}

fn core_layout(depth: u32, width: u32, height: u32) -> ImageLayout {
    let (bits_per_pixel, red_mask, green_mask, blue_mask) = match depth {
        0..=8 => (8, 0, 0, 0),
        15 => (16, 0x7c00, 0x03e0, 0x001f),
        16 => (16, 0xf800, 0x07e0, 0x001f),
        _ => (32, 0x00ff_0000, 0x0000_ff00, 0x0000_00ff),
    };
    let bytes_per_line = (width * bits_per_pixel / 8 + 3) & !3;
    ImageLayout {
        width,
        height,
        bytes_per_line,
        bits_per_pixel,
        red_mask,
        green_mask,
        blue_mask,
        msb_first: false,
    }
}

fn planes_for(format: FourCc, width: u32, height: u32) -> Option<OverlayLayout> {
    use crate::overlay::YuvLayout;

    let w = (width + 1) & !1;
    match format.layout()? {
        YuvLayout::Packed { .. } => Some(OverlayLayout {
            width: w,
            height,
            data_size: (w * 2 * height) as usize,
            pitches: vec![w * 2],
            offsets: vec![0],
        }),
        YuvLayout::Planar { .. } => {
            let h = (height + 1) & !1;
            let luma = w * h;
            let chroma = (w / 2) * (h / 2);
            Some(OverlayLayout {
                width: w,
                height: h,
                data_size: (luma + 2 * chroma) as usize,
                pitches: vec![w, w / 2, w / 2],
                offsets: vec![0, luma, luma + chroma],
            })
        }
    }
}

impl DisplayServer for MockServer {
    type Image = MockImage;
    type OverlayImage = MockOverlayImage;

    fn default_depth(&self) -> u32 {
        self.depth
    }

    fn shm_available(&self) -> bool {
        self.shm_available.get()
    }

    fn sync(&self) {
        self.round_trips.set(self.round_trips.get() + 1);
    }

    fn drawable_size(&self, _drawable: Drawable) -> Option<(u32, u32)> {
        self.drawable_size.get()
    }

    fn shm_get(&self, size: usize, mode: u32) -> nix::Result<c_int> {
        if self.fails(Faults::SHM_GET) || size == 0 {
            return Err(Errno::ENOMEM);
        }
        let mut state = self.state.borrow_mut();
        let id = state.next_shmid;
        state.next_shmid += 1;
        state.segments.insert(
            id,
            Segment {
                memory: vec![0u8; size].into_boxed_slice(),
                mode,
                attaches: 0,
                removed: false,
            },
        );
        Ok(id)
    }

    fn shm_attach(&self, shmid: c_int) -> nix::Result<NonNull<u8>> {
        if self.fails(Faults::SHM_ATTACH) {
            return Err(Errno::EMFILE);
        }
        let mut state = self.state.borrow_mut();
        let seg = state.segments.get_mut(&shmid).ok_or(Errno::EINVAL)?;
        seg.attaches += 1;
        let addr = NonNull::new(seg.memory.as_mut_ptr()).ok_or(Errno::EFAULT)?;
        state.client_maps.insert(addr.as_ptr() as usize, shmid);
        Ok(addr)
    }

    fn shm_detach(&self, addr: NonNull<u8>) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        let shmid = state
            .client_maps
            .remove(&(addr.as_ptr() as usize))
            .ok_or(Errno::EINVAL)?;
        if let Some(seg) = state.segments.get_mut(&shmid) {
            seg.attaches -= 1;
        }
        state.reap(shmid);
        Ok(())
    }

    fn shm_remove(&self, shmid: c_int) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        let seg = state.segments.get_mut(&shmid).ok_or(Errno::EINVAL)?;
        seg.removed = true;
        state.reap(shmid);
        Ok(())
    }

    fn shm_server_attach(&self, info: &mut ShmSegmentInfo) -> Result<(), VideoError> {
        self.sync();
        if self.fails(Faults::SERVER_ATTACH) {
            return Err(VideoError::ProtocolRejection("MIT-SHM attach"));
        }
        let mut state = self.state.borrow_mut();
        let Some(seg) = state.segments.get_mut(&info.shmid) else {
            return Err(VideoError::ProtocolRejection("MIT-SHM attach"));
        };
        seg.attaches += 1;
        state.server_attached.insert(info.shmid);
        state.attach_read_only.push(info.read_only != 0);
        Ok(())
    }

    fn shm_server_detach(&self, info: &mut ShmSegmentInfo) {
        let mut state = self.state.borrow_mut();
        if !state.server_attached.remove(&info.shmid) {
            state
                .contract_violations
                .push(format!("server detach of unattached segment {}", info.shmid));
            return;
        }
        if let Some(seg) = state.segments.get_mut(&info.shmid) {
            seg.attaches -= 1;
        }
        state.reap(info.shmid);
    }

    fn create_image(
        &self,
        depth: u32,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<MockImage> {
        let step = if shm.is_some() {
            Faults::CREATE_SHM_IMAGE
        } else {
            Faults::CREATE_IMAGE
        };
        if self.fails(step) || width == 0 || height == 0 {
            return None;
        }
        self.live_images.set(self.live_images.get() + 1);
        Some(MockImage {
            layout: core_layout(depth, width, height),
            data: std::ptr::null_mut(),
        })
    }

    fn image_layout(&self, image: &MockImage) -> ImageLayout {
        image.layout
    }

    fn set_image_data(&self, image: &mut MockImage, data: *mut u8) {
        image.data = data;
    }

    fn destroy_image(&self, _image: MockImage) {
        self.live_images.set(self.live_images.get() - 1);
    }

    fn put_image(&self, drawable: Drawable, image: &MockImage, src: Rect, dest_x: i32, dest_y: i32) {
        let l = image.layout;
        self.record_put(
            PutKind::Image,
            drawable,
            None,
            (l.width, l.height, l.data_size(), image.data),
            src,
            Rect::new(dest_x, dest_y, src.w, src.h),
        );
    }

    fn shm_put_image(&self, drawable: Drawable, image: &MockImage, src: Rect, dest_x: i32, dest_y: i32) {
        let l = image.layout;
        self.record_put(
            PutKind::ShmImage,
            drawable,
            None,
            (l.width, l.height, l.data_size(), image.data),
            src,
            Rect::new(dest_x, dest_y, src.w, src.h),
        );
    }

    fn query_adaptors(&self) -> Option<Vec<AdaptorInfo>> {
        let state = self.state.borrow();
        if state.adaptors.is_empty() {
            return None;
        }
        Some(state.adaptors.iter().map(|(info, _)| info.clone()).collect())
    }

    fn list_image_formats(&self, port: PortId) -> Vec<FourCc> {
        self.state
            .borrow()
            .adaptors
            .iter()
            .find(|(info, _)| info.ports().any(|p| p == port))
            .map(|(_, formats)| formats.clone())
            .unwrap_or_default()
    }

    fn grab_port(&self, port: PortId) -> bool {
        let mut state = self.state.borrow_mut();
        if state.busy_ports.contains(&port) {
            return false;
        }
        if !state.grabbed.insert(port) {
            state
                .contract_violations
                .push(format!("re-grab of held port {}", port));
        }
        state.grab_log.push(port);
        true
    }

    fn ungrab_port(&self, port: PortId) {
        if !self.state.borrow_mut().grabbed.remove(&port) {
            self.violation(format!("ungrab of port {} that is not held", port));
        }
    }

    fn create_overlay_image(
        &self,
        port: PortId,
        format: FourCc,
        width: u32,
        height: u32,
        shm: Option<&mut ShmSegmentInfo>,
    ) -> Option<MockOverlayImage> {
        let step = if shm.is_some() {
            Faults::CREATE_OVERLAY_SHM_IMAGE
        } else {
            Faults::CREATE_OVERLAY_IMAGE
        };
        if self.fails(step) || width == 0 || height == 0 {
            return None;
        }
        if !self.state.borrow().grabbed.contains(&port) {
            self.violation(format!("overlay image on port {} that is not held", port));
        }
        let layout = planes_for(format, width, height)?;
        self.live_overlays.set(self.live_overlays.get() + 1);
        Some(MockOverlayImage {
            port,
            layout,
            data: std::ptr::null_mut(),
        })
    }

    fn overlay_layout(&self, image: &MockOverlayImage) -> OverlayLayout {
        image.layout.clone()
    }

    fn set_overlay_data(&self, image: &mut MockOverlayImage, data: *mut u8) {
        image.data = data;
    }

    fn destroy_overlay_image(&self, _image: MockOverlayImage) {
        self.live_overlays.set(self.live_overlays.get() - 1);
    }

    fn put_overlay(&self, port: PortId, drawable: Drawable, image: &MockOverlayImage, src: Rect, dest: Rect) {
        let l = &image.layout;
        if port != image.port {
            self.violation(format!("overlay put on port {} for image of port {}", port, image.port));
        }
        self.record_put(
            PutKind::Overlay,
            drawable,
            Some(port),
            (l.width, l.height, l.data_size, image.data),
            src,
            dest,
        );
    }

    fn shm_put_overlay(&self, port: PortId, drawable: Drawable, image: &MockOverlayImage, src: Rect, dest: Rect) {
        let l = &image.layout;
        if port != image.port {
            self.violation(format!("overlay put on port {} for image of port {}", port, image.port));
        }
        self.record_put(
            PutKind::ShmOverlay,
            drawable,
            Some(port),
            (l.width, l.height, l.data_size, image.data),
            src,
            dest,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn removed_segment_survives_until_last_detach() {
        let server = MockServer::new(24);
        let id = server.shm_get(64, 0o600).unwrap();
        let addr = server.shm_attach(id).unwrap();
        server.shm_remove(id).unwrap();
        assert_eq!(server.live_segments(), 1);
        server.shm_detach(addr).unwrap();
        assert_eq!(server.live_segments(), 0);
        assert!(server.is_clean());
    }

    #[test_log::test]
    fn busy_ports_cannot_be_grabbed() {
        let server = MockServer::new(24)
            .with_adaptor("Overlay", 40, 2, &[FourCc::YV12])
            .with_busy_port(40);
        assert!(!server.grab_port(40));
        assert!(server.grab_port(41));
        assert!(server.grab_port(41));
        assert_eq!(server.contract_violations().len(), 1);
    }

    #[test_log::test]
    fn planar_layout_has_three_planes() {
        let layout = planes_for(FourCc::I420, 5, 3).unwrap();
        assert_eq!((layout.width, layout.height), (6, 4));
        assert_eq!(layout.pitches, vec![6, 3, 3]);
        assert_eq!(layout.offsets, vec![0, 24, 30]);
        assert_eq!(layout.data_size, 36);
    }
}
