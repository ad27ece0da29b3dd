// src/error.rs

//! Error type shared by every stage of the video layer.
//!
//! Most variants are recovered internally by dropping one tier down the
//! degradation chain; only a failure of the last tier reaches the caller of
//! [`Canvas::create`](crate::canvas::Canvas::create).

use crate::geometry::Region;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    /// The OS or the server could not provide memory for a backing store.
    #[error("cannot allocate {0}")]
    ResourceExhaustion(String),

    /// A System V shared memory call failed.
    #[error("shared memory {op} failed: {errno}")]
    SharedMemory {
        op: &'static str,
        #[source]
        errno: Errno,
    },

    /// The server refused a request, possibly asynchronously.
    #[error("display server rejected {0}")]
    ProtocolRejection(&'static str),

    /// No overlay adaptor, port or format matched. A capability result, not a fault.
    #[error("no usable XVideo port")]
    HardwareUnavailable,

    /// A dirty region does not fit the buffer that is currently allocated.
    #[error("dirty region {region:?} exceeds the {width}x{height} buffer")]
    StaleGeometry {
        region: Region,
        width: u32,
        height: u32,
    },

    /// The canvas was used after `destroy`.
    #[error("canvas has already been destroyed")]
    Destroyed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VideoError {
    /// True for errors that leave the canvas usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VideoError::StaleGeometry { .. } | VideoError::HardwareUnavailable
        )
    }
}
