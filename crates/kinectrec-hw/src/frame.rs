//! Frame types: packed BGRX color and float depth buffers, synchronized frame sets.

use std::fmt;
use std::str::FromStr;

/// Native depth/IR sensor resolution.
pub const DEPTH_WIDTH: u32 = 512;
pub const DEPTH_HEIGHT: u32 = 424;

/// Native color sensor resolution.
pub const COLOR_WIDTH: u32 = 1920;
pub const COLOR_HEIGHT: u32 = 1080;

/// The kind of image a frame holds. Also names its output subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    /// Packed BGRX color at color resolution.
    Color,
    /// Float IR amplitude at depth resolution.
    Infrared,
    /// Float millimetres at depth resolution.
    Depth,
    /// Color resampled into depth space (packed BGRX).
    Registered,
    /// Depth resampled to color resolution (float millimetres).
    BigDepth,
}

impl FrameKind {
    pub const ALL: [FrameKind; 5] = [
        FrameKind::Color,
        FrameKind::Infrared,
        FrameKind::Depth,
        FrameKind::Registered,
        FrameKind::BigDepth,
    ];

    /// Short name used for directories and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Color => "rgb",
            FrameKind::Infrared => "ir",
            FrameKind::Depth => "depth",
            FrameKind::Registered => "registered",
            FrameKind::BigDepth => "bigdepth",
        }
    }

    /// Whether pixels are packed BGRX bytes rather than `f32` distances.
    pub fn is_packed_color(self) -> bool {
        matches!(self, FrameKind::Color | FrameKind::Registered)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" | "color" => Ok(FrameKind::Color),
            "ir" | "infrared" => Ok(FrameKind::Infrared),
            "depth" => Ok(FrameKind::Depth),
            "registered" => Ok(FrameKind::Registered),
            "bigdepth" | "big-depth" => Ok(FrameKind::BigDepth),
            other => Err(FrameError::UnknownKind(other.to_string())),
        }
    }
}

/// A single image buffer of 4-byte elements.
///
/// Color kinds hold one packed B,G,R,X pixel per element (in memory order);
/// depth and IR kinds hold one native-endian `f32` per element.
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// Pixel data, row-major, `width * height` elements.
    pub data: Vec<u32>,
    pub width: u32,
    pub height: u32,
    pub kind: FrameKind,
    /// Driver sequence number of the frame set this frame belongs to.
    pub sequence: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Zero-filled frame. For depth kinds zero means "no reading".
    pub fn new(kind: FrameKind, width: u32, height: u32) -> Self {
        Self {
            data: vec![0; (width as usize) * (height as usize)],
            width,
            height,
            kind,
            sequence: 0,
        }
    }

    /// Wrap an existing word buffer, checking its length against the dimensions.
    pub fn from_words(
        kind: FrameKind,
        width: u32,
        height: u32,
        data: Vec<u32>,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            kind,
            sequence: 0,
        })
    }

    /// Build a float frame from distance values.
    pub fn from_depth(
        kind: FrameKind,
        width: u32,
        height: u32,
        values: &[f32],
    ) -> Result<Self, FrameError> {
        Self::from_words(kind, width, height, values.iter().map(|v| v.to_bits()).collect())
    }

    /// Number of pixels implied by the dimensions.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// True when the frame has a non-zero size and the buffer matches it.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.pixel_count()
    }

    pub fn pixels(&self) -> &[u32] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.data
    }

    /// Float view of the buffer (depth and IR kinds).
    pub fn depth(&self) -> &[f32] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn depth_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Raw bytes in memory order. For color kinds this is B,G,R,X per pixel.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Fill every element with the same float value.
    pub fn fill_depth(&mut self, value: f32) {
        self.data.fill(value.to_bits());
    }
}

/// Pack one color pixel so that its in-memory bytes read B,G,R,X.
pub fn bgrx(b: u8, g: u8, r: u8) -> u32 {
    u32::from_ne_bytes([b, g, r, 0])
}

/// Unpack a BGRX pixel into `[r, g, b]`.
pub fn bgrx_to_rgb(pixel: u32) -> [u8; 3] {
    let [b, g, r, _] = pixel.to_ne_bytes();
    [r, g, b]
}

/// One time-aligned color/IR/depth triple delivered by the driver.
#[derive(Debug, Clone)]
pub struct FrameSet {
    pub color: Frame,
    pub ir: Frame,
    pub depth: Frame,
}

impl FrameSet {
    pub fn sequence(&self) -> u32 {
        self.color.sequence
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unknown frame kind: {0} (expected rgb, ir, depth, registered or bigdepth)")]
    UnknownKind(String),
}
