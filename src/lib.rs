// src/lib.rs

//! Video output layer for an emulator's X11 front end.
//!
//! A [`Canvas`] owns the pixel backing store of one window. It prefers a
//! hardware-scaled XVideo overlay, then an MIT-SHM image, then a plain
//! image, and falls back silently when the server cannot provide a tier.

pub mod canvas;
pub mod config;
pub mod error;
pub mod framebuffer;
pub mod geometry;
pub mod overlay;
pub mod refresh;
pub mod render;
pub mod server;
pub mod shm;

pub use canvas::{Canvas, CanvasFlags, RenderPath};
pub use config::{CanvasRequest, VideoConfig};
pub use error::VideoError;
pub use geometry::{place, size_hints, AspectPolicy, MAX_DIMENSION, Presentation, Rect, Region, Scale, Size, SizeHints};
pub use overlay::FourCc;
pub use refresh::Presenter;
pub use render::{FrameSource, Palette, Rgb};
pub use server::{DisplayServer, XlibServer};
