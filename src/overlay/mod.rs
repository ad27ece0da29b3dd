// src/overlay/mod.rs

//! Hardware scaling through XVideo: port negotiation, YUV images and the
//! conversion from the emulator's palette into them.

pub mod format;
pub mod image;
pub mod port;
pub mod yuv;

pub use format::{FourCc, YuvLayout, PREFERRED_FORMATS};
pub use image::OverlayImage;
pub use port::{negotiate, OverlayPort};
pub use yuv::YuvTable;
