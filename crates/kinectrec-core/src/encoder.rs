//! Image encoding: JPEG for color, 16-bit grayscale PNG for depth and IR,
//! BMP for color registered into depth space.
//!
//! Encoders only produce bytes in memory; nothing touches the filesystem
//! until encoding has fully succeeded.

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageBuffer, Luma, Rgb};
use kinectrec_hw::frame::bgrx_to_rgb;
use kinectrec_hw::{Frame, FrameKind};
use thiserror::Error;

/// Fixed JPEG quality preset. The `image` encoder has no fast-DCT mode, so
/// quality and 4:4:4 chroma are the only tunables carried over.
pub const JPEG_QUALITY: u8 = 98;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{kind} frame is empty")]
    EmptyFrame { kind: FrameKind },
    #[error("{kind} frame buffer holds {actual} pixels, dimensions need {expected}")]
    InvalidBuffer {
        kind: FrameKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} frame cannot be encoded as {encoding:?}")]
    WrongKind { kind: FrameKind, encoding: Encoding },
    #[error("image encoder failed: {0}")]
    Image(#[from] image::ImageError),
}

/// On-disk format of a frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy color, 4:4:4, [`JPEG_QUALITY`].
    Jpeg,
    /// Single-channel 16-bit millimetres.
    Png16Gray,
    /// Uncompressed 24-bit color.
    Bmp,
}

impl Encoding {
    pub fn for_kind(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Color => Encoding::Jpeg,
            FrameKind::Registered => Encoding::Bmp,
            FrameKind::Infrared | FrameKind::Depth | FrameKind::BigDepth => Encoding::Png16Gray,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Jpeg => "jpg",
            Encoding::Png16Gray => "png",
            Encoding::Bmp => "bmp",
        }
    }
}

/// Encode a frame in the format its kind is stored in.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    match Encoding::for_kind(frame.kind) {
        Encoding::Jpeg => encode_jpeg(frame),
        Encoding::Png16Gray => encode_png16_gray(frame),
        Encoding::Bmp => encode_bmp(frame),
    }
}

/// Encode packed BGRX color as JPEG: quality 98, no chroma subsampling.
///
/// The `image` encoder always writes full-resolution chroma and uses its
/// integer DCT; there is no separate fast-DCT switch to flip.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    check_frame(frame, Encoding::Jpeg)?;
    let rgb = rgb_buffer(frame)?;

    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok(out)
}

/// Encode float millimetres as a 16-bit grayscale PNG.
///
/// Samples are big-endian, one scanline per row, not interlaced, with
/// default compression and adaptive filtering.
pub fn encode_png16_gray(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    check_frame(frame, Encoding::Png16Gray)?;

    let samples: Vec<u16> = frame.depth().iter().map(|&v| depth_to_u16(v)).collect();
    let gray: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(frame.width, frame.height, samples).ok_or(
            EncodeError::InvalidBuffer {
                kind: frame.kind,
                expected: frame.pixel_count(),
                actual: frame.data.len(),
            },
        )?;

    let mut out = Vec::new();
    gray.write_with_encoder(PngEncoder::new_with_quality(
        &mut out,
        CompressionType::Default,
        FilterType::Adaptive,
    ))?;
    Ok(out)
}

/// Encode packed BGRX color as a 24-bit BMP.
pub fn encode_bmp(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    check_frame(frame, Encoding::Bmp)?;
    let rgb = rgb_buffer(frame)?;

    let mut out = Vec::new();
    rgb.write_with_encoder(BmpEncoder::new(&mut out))?;
    Ok(out)
}

/// Convert a distance in millimetres to a 16-bit sample.
///
/// Values below 65535 are rounded to nearest, half away from zero, and
/// negatives saturate to 0. Values at or above 65535, NaN and +inf all map
/// to 0, the "no reading" sentinel. This folds saturated measurements into
/// invalid ones; readers cannot tell the two apart.
pub fn depth_to_u16(value: f32) -> u16 {
    if value < u16::MAX as f32 {
        value.round() as u16
    } else {
        0
    }
}

fn check_frame(frame: &Frame, encoding: Encoding) -> Result<(), EncodeError> {
    let color = encoding != Encoding::Png16Gray;
    if frame.kind.is_packed_color() != color {
        return Err(EncodeError::WrongKind {
            kind: frame.kind,
            encoding,
        });
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(EncodeError::EmptyFrame { kind: frame.kind });
    }
    if frame.data.len() != frame.pixel_count() {
        return Err(EncodeError::InvalidBuffer {
            kind: frame.kind,
            expected: frame.pixel_count(),
            actual: frame.data.len(),
        });
    }
    Ok(())
}

/// Drop the padding byte and reorder BGRX to RGB.
fn rgb_buffer(frame: &Frame) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>, EncodeError> {
    let rgb: Vec<u8> = frame.pixels().iter().flat_map(|&p| bgrx_to_rgb(p)).collect();
    ImageBuffer::from_raw(frame.width, frame.height, rgb).ok_or(EncodeError::InvalidBuffer {
        kind: frame.kind,
        expected: frame.pixel_count(),
        actual: frame.data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::flip_horizontal;
    use kinectrec_hw::frame::bgrx;

    fn flat_color(kind: FrameKind, width: u32, height: u32, pixel: u32) -> Frame {
        Frame::from_words(kind, width, height, vec![pixel; (width * height) as usize]).unwrap()
    }

    fn decode_luma16(bytes: &[u8]) -> ImageBuffer<Luma<u16>, Vec<u16>> {
        let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png).unwrap();
        assert_eq!(img.color(), image::ColorType::L16);
        img.to_luma16()
    }

    /// Sampling factors of each component in the baseline frame header.
    fn jpeg_sampling_factors(bytes: &[u8]) -> Vec<u8> {
        let sof = bytes
            .windows(2)
            .position(|w| w == [0xFF, 0xC0])
            .expect("no SOF0 marker");
        let components = bytes[sof + 9] as usize;
        (0..components).map(|i| bytes[sof + 11 + i * 3]).collect()
    }

    #[test]
    fn test_depth_to_u16_rounding_and_sentinel() {
        assert_eq!(depth_to_u16(0.0), 0);
        assert_eq!(depth_to_u16(1.4), 1);
        assert_eq!(depth_to_u16(1.5), 2);
        assert_eq!(depth_to_u16(1000.4), 1000);
        assert_eq!(depth_to_u16(65534.4), 65534);
        assert_eq!(depth_to_u16(65535.0), 0);
        assert_eq!(depth_to_u16(70000.0), 0);
        assert_eq!(depth_to_u16(f32::INFINITY), 0);
        assert_eq!(depth_to_u16(f32::NAN), 0);
        assert_eq!(depth_to_u16(-5.0), 0);
    }

    #[test]
    fn test_png_round_trip() {
        let values = [
            0.0,
            1.4,
            1.5,
            1000.4,
            4500.0,
            65534.4,
            65535.0,
            70000.0,
            f32::INFINITY,
            f32::NAN,
        ];
        let frame = Frame::from_depth(FrameKind::Depth, 5, 2, &values).unwrap();

        let decoded = decode_luma16(&encode_png16_gray(&frame).unwrap());

        assert_eq!(decoded.dimensions(), (5, 2));
        assert_eq!(
            decoded.as_raw(),
            &vec![0u16, 1, 2, 1000, 4500, 65534, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_png_header_is_16bit_gray_non_interlaced() {
        let frame = Frame::new(FrameKind::BigDepth, 3, 2);
        let png = encode_png16_gray(&frame).unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes([png[16], png[17], png[18], png[19]]), 3);
        assert_eq!(u32::from_be_bytes([png[20], png[21], png[22], png[23]]), 2);
        assert_eq!(png[24], 16, "bit depth");
        assert_eq!(png[25], 0, "grayscale");
        assert_eq!(png[28], 0, "no interlacing");
    }

    #[test]
    fn test_flip_then_png_scenario() {
        let mut frame = Frame::new(FrameKind::Depth, 512, 424);
        frame.depth_mut()[0] = 1000.4;
        frame.depth_mut()[511] = 500.0;

        flip_horizontal(&mut frame);
        assert_eq!(frame.depth()[0], 500.0);

        let decoded = decode_luma16(&encode(&frame).unwrap());
        assert_eq!(decoded.get_pixel(0, 0).0[0], 500);
        assert_eq!(decoded.get_pixel(511, 0).0[0], 1000);
    }

    #[test]
    fn test_jpeg_is_444_and_decodes() {
        let frame = flat_color(FrameKind::Color, 32, 16, bgrx(30, 60, 200));
        let jpeg = encode_jpeg(&frame).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(jpeg_sampling_factors(&jpeg), vec![0x11, 0x11, 0x11]);

        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 16));
        let [r, g, b] = decoded.get_pixel(10, 10).0;
        assert!(r.abs_diff(200) <= 4 && g.abs_diff(60) <= 4 && b.abs_diff(30) <= 4);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let frame = flat_color(FrameKind::Color, 16, 16, bgrx(1, 2, 3));
        assert_eq!(encode_jpeg(&frame).unwrap(), encode_jpeg(&frame).unwrap());

        let depth = Frame::from_depth(FrameKind::Depth, 2, 1, &[10.0, 20.0]).unwrap();
        assert_eq!(encode(&depth).unwrap(), encode(&depth).unwrap());
    }

    #[test]
    fn test_bmp_is_lossless() {
        let mut frame = Frame::new(FrameKind::Registered, 4, 3);
        for (i, px) in frame.data.iter_mut().enumerate() {
            *px = bgrx(i as u8, 100, 255 - i as u8);
        }
        let bmp = encode(&frame).unwrap();
        assert_eq!(&bmp[..2], b"BM");

        let decoded = image::load_from_memory_with_format(&bmp, image::ImageFormat::Bmp)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.get_pixel(1, 0).0, [254, 100, 1]);
        assert_eq!(decoded.get_pixel(3, 2).0, [244, 100, 11]);
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let frame = Frame::new(FrameKind::Depth, 0, 0);
        assert!(matches!(
            encode_png16_gray(&frame),
            Err(EncodeError::EmptyFrame {
                kind: FrameKind::Depth
            })
        ));
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut frame = Frame::new(FrameKind::Color, 4, 4);
        frame.data.truncate(10);
        assert!(matches!(
            encode_jpeg(&frame),
            Err(EncodeError::InvalidBuffer {
                expected: 16,
                actual: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let depth = Frame::new(FrameKind::Depth, 2, 2);
        assert!(matches!(
            encode_jpeg(&depth),
            Err(EncodeError::WrongKind {
                encoding: Encoding::Jpeg,
                ..
            })
        ));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(Encoding::for_kind(FrameKind::Color).extension(), "jpg");
        assert_eq!(Encoding::for_kind(FrameKind::Registered).extension(), "bmp");
        assert_eq!(Encoding::for_kind(FrameKind::BigDepth).extension(), "png");
    }
}
