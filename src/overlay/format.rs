// src/overlay/format.rs

//! YUV pixel layouts understood by the overlay path.

use std::fmt;
use std::str::FromStr;

/// A four-character code as used by XVideo image format ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const UYVY: FourCc = FourCc::from_bytes(*b"UYVY");
    pub const YUY2: FourCc = FourCc::from_bytes(*b"YUY2");
    pub const YVYU: FourCc = FourCc::from_bytes(*b"YVYU");
    pub const YV12: FourCc = FourCc::from_bytes(*b"YV12");
    pub const I420: FourCc = FourCc::from_bytes(*b"I420");
    pub const IYUV: FourCc = FourCc::from_bytes(*b"IYUV");

    /// Little-endian packing, same as the C `FOURCC` macros.
    pub const fn from_bytes(b: [u8; 4]) -> Self {
        FourCc(u32::from_le_bytes(b))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Memory layout of this format, if it is one we can render.
    pub fn layout(self) -> Option<YuvLayout> {
        match self {
            FourCc::UYVY => Some(YuvLayout::Packed { y0: 1, u: 0, y1: 3, v: 2 }),
            FourCc::YUY2 => Some(YuvLayout::Packed { y0: 0, u: 1, y1: 2, v: 3 }),
            FourCc::YVYU => Some(YuvLayout::Packed { y0: 0, u: 3, y1: 2, v: 1 }),
            FourCc::YV12 => Some(YuvLayout::Planar { u_plane: 2, v_plane: 1 }),
            FourCc::I420 | FourCc::IYUV => Some(YuvLayout::Planar { u_plane: 1, v_plane: 2 }),
            _ => None,
        }
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("fourcc must be exactly 4 bytes, got {:?}", s))?;
        Ok(FourCc::from_bytes(bytes))
    }
}

/// Formats in preference order: packed 4:2:2 before planar 4:2:0.
pub const PREFERRED_FORMATS: [FourCc; 6] = [
    FourCc::UYVY,
    FourCc::YUY2,
    FourCc::YVYU,
    FourCc::YV12,
    FourCc::I420,
    FourCc::IYUV, // duplicate of I420
];

/// Byte positions of a packed macropixel, or plane indices of a planar image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YuvLayout {
    /// Two pixels in four bytes, chroma shared horizontally.
    Packed { y0: usize, u: usize, y1: usize, v: usize },
    /// Full-size luma plane 0, quarter-size chroma planes.
    Planar { u_plane: usize, v_plane: usize },
}

impl YuvLayout {
    /// Alignment the dirty rectangle has to be widened to, in pixels.
    pub fn alignment(&self) -> (u32, u32) {
        match self {
            YuvLayout::Packed { .. } => (2, 1),
            YuvLayout::Planar { .. } => (2, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn fourcc_parses_and_displays() {
        let f: FourCc = "UYVY".parse().unwrap();
        assert_eq!(f, FourCc::UYVY);
        assert_eq!(f.to_string(), "UYVY");
        assert_eq!(FourCc::UYVY.0, 0x5956_5955);
        assert!("UYV".parse::<FourCc>().is_err());
        assert!("UYVYY".parse::<FourCc>().is_err());
    }

    #[test_log::test]
    fn packed_formats_prefer_over_planar() {
        let first_planar = PREFERRED_FORMATS
            .iter()
            .position(|f| matches!(f.layout(), Some(YuvLayout::Planar { .. })))
            .unwrap();
        assert!(PREFERRED_FORMATS[..first_planar]
            .iter()
            .all(|f| matches!(f.layout(), Some(YuvLayout::Packed { .. }))));
    }

    #[test_log::test]
    fn every_preferred_format_has_a_layout() {
        assert!(PREFERRED_FORMATS.iter().all(|f| f.layout().is_some()));
        assert_eq!(FourCc::from_bytes(*b"RV32").layout(), None);
    }
}
