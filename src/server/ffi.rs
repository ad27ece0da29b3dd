// src/server/ffi.rs
#![allow(non_snake_case)] // Keep the C names of the X extension entry points
#![allow(non_camel_case_types)]

//! Declarations for the MIT-SHM (libXext) and XVideo (libXv) entry points.
//!
//! The `x11` crate binds Xlib proper but neither of these extensions, so the
//! handful of calls we need are declared here. `build.rs` links the libraries.

use super::ShmSegmentInfo;
use libc::{c_char, c_int, c_uint, c_ulong};
use x11::xlib::{Bool, Display, Drawable, Time, Visual, Window, XImage, GC};

pub type XvPortID = c_ulong;

/// `Success` as returned by the Xv status functions.
pub const XV_SUCCESS: c_int = 0;

#[repr(C)]
pub struct XvFormat {
    pub depth: c_char,
    pub visual_id: c_ulong,
}

#[repr(C)]
pub struct XvAdaptorInfo {
    pub base_id: XvPortID,
    pub num_ports: c_ulong,
    pub type_: c_char,
    pub name: *mut c_char,
    pub num_formats: c_ulong,
    pub formats: *mut XvFormat,
    pub num_adaptors: c_ulong,
}

#[repr(C)]
pub struct XvImageFormatValues {
    pub id: c_int,
    pub type_: c_int,
    pub byte_order: c_int,
    pub guid: [c_char; 16],
    pub bits_per_pixel: c_int,
    pub format: c_int,
    pub num_planes: c_int,
    pub depth: c_uint,
    pub red_mask: c_uint,
    pub green_mask: c_uint,
    pub blue_mask: c_uint,
    pub y_sample_bits: c_uint,
    pub u_sample_bits: c_uint,
    pub v_sample_bits: c_uint,
    pub horz_y_period: c_uint,
    pub horz_u_period: c_uint,
    pub horz_v_period: c_uint,
    pub vert_y_period: c_uint,
    pub vert_u_period: c_uint,
    pub vert_v_period: c_uint,
    pub component_order: [c_char; 32],
    pub scanline_order: c_int,
}

#[repr(C)]
pub struct XvImage {
    pub id: c_int,
    pub width: c_int,
    pub height: c_int,
    pub data_size: c_int,
    pub num_planes: c_int,
    pub pitches: *mut c_int,
    pub offsets: *mut c_int,
    pub data: *mut c_char,
    pub obdata: *mut c_char,
}

extern "C" {
    // --- libXext: MIT-SHM ---
    pub fn XShmQueryVersion(
        display: *mut Display,
        major: *mut c_int,
        minor: *mut c_int,
        shared_pixmaps: *mut Bool,
    ) -> Bool;
    pub fn XShmAttach(display: *mut Display, shminfo: *mut ShmSegmentInfo) -> Bool;
    pub fn XShmDetach(display: *mut Display, shminfo: *mut ShmSegmentInfo) -> Bool;
    pub fn XShmCreateImage(
        display: *mut Display,
        visual: *mut Visual,
        depth: c_uint,
        format: c_int,
        data: *mut c_char,
        shminfo: *mut ShmSegmentInfo,
        width: c_uint,
        height: c_uint,
    ) -> *mut XImage;
    pub fn XShmPutImage(
        display: *mut Display,
        d: Drawable,
        gc: GC,
        image: *mut XImage,
        src_x: c_int,
        src_y: c_int,
        dst_x: c_int,
        dst_y: c_int,
        width: c_uint,
        height: c_uint,
        send_event: Bool,
    ) -> Bool;

    // --- libXv ---
    pub fn XvQueryExtension(
        display: *mut Display,
        version: *mut c_uint,
        release: *mut c_uint,
        request_base: *mut c_uint,
        event_base: *mut c_uint,
        error_base: *mut c_uint,
    ) -> c_int;
    pub fn XvQueryAdaptors(
        display: *mut Display,
        window: Window,
        num_adaptors: *mut c_uint,
        adaptors: *mut *mut XvAdaptorInfo,
    ) -> c_int;
    pub fn XvFreeAdaptorInfo(adaptors: *mut XvAdaptorInfo);
    pub fn XvListImageFormats(
        display: *mut Display,
        port: XvPortID,
        count: *mut c_int,
    ) -> *mut XvImageFormatValues;
    pub fn XvGrabPort(display: *mut Display, port: XvPortID, time: Time) -> c_int;
    pub fn XvUngrabPort(display: *mut Display, port: XvPortID, time: Time) -> c_int;
    pub fn XvCreateImage(
        display: *mut Display,
        port: XvPortID,
        id: c_int,
        data: *mut c_char,
        width: c_int,
        height: c_int,
    ) -> *mut XvImage;
    pub fn XvShmCreateImage(
        display: *mut Display,
        port: XvPortID,
        id: c_int,
        data: *mut c_char,
        width: c_int,
        height: c_int,
        shminfo: *mut ShmSegmentInfo,
    ) -> *mut XvImage;
    pub fn XvPutImage(
        display: *mut Display,
        port: XvPortID,
        d: Drawable,
        gc: GC,
        image: *mut XvImage,
        src_x: c_int,
        src_y: c_int,
        src_w: c_uint,
        src_h: c_uint,
        dest_x: c_int,
        dest_y: c_int,
        dest_w: c_uint,
        dest_h: c_uint,
    ) -> c_int;
    pub fn XvShmPutImage(
        display: *mut Display,
        port: XvPortID,
        d: Drawable,
        gc: GC,
        image: *mut XvImage,
        src_x: c_int,
        src_y: c_int,
        src_w: c_uint,
        src_h: c_uint,
        dest_x: c_int,
        dest_y: c_int,
        dest_w: c_uint,
        dest_h: c_uint,
        send_event: Bool,
    ) -> c_int;
}
