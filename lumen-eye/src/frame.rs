//! Camera buffer to engine image conversion
//!
//! Everything here is a pure function of its input. A buffer that does not
//! match its declared geometry is rejected instead of being read partially.

use crate::error::VisionError;
use bytes::Bytes;
use image::{imageops, ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on pixels per frame
const MAX_PIXELS: u64 = 100_000_000;

/// Pixel layouts a camera may hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single plane, 4 bytes per pixel (R, G, B, A)
    Rgba8888,
    /// Single plane, 3 bytes per pixel
    Rgb888,
    /// Single plane, 3 bytes per pixel in OpenCV order
    Bgr888,
    /// Three planes (Y, U, V), chroma subsampled 2x2
    Yuv420,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420 => 3,
            _ => 1,
        }
    }

    /// Bytes per pixel in the first plane
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
            PixelFormat::Rgb888 | PixelFormat::Bgr888 => 3,
            PixelFormat::Yuv420 => 1,
        }
    }
}

/// One plane of a camera buffer
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two horizontally adjacent samples
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    #[inline]
    fn sample(&self, x: usize, y: usize) -> &[u8] {
        let start = y * self.row_stride + x * self.pixel_stride;
        &self.data[start..]
    }
}

/// Clockwise rotation that turns a frame upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative values
    pub fn from_degrees(degrees: i32) -> Result<Self, VisionError> {
        if degrees % 90 != 0 {
            return Err(VisionError::Frame(format!(
                "Rotation must be a multiple of 90 degrees, got {}",
                degrees
            )));
        }

        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            _ => Rotation::Deg270,
        })
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Which way the lens points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    Back,
    Front,
}

/// Rotation needed to show a sensor image upright on the current display.
///
/// Front cameras are mirrored, so display rotation adds to the sensor
/// orientation instead of being subtracted from it.
pub fn relative_rotation(
    sensor_orientation: i32,
    display_rotation: i32,
    facing: LensFacing,
) -> Result<Rotation, VisionError> {
    let sensor = Rotation::from_degrees(sensor_orientation)?.degrees() as i32;
    let display = Rotation::from_degrees(display_rotation)?.degrees() as i32;

    let degrees = match facing {
        LensFacing::Back => sensor - display,
        LensFacing::Front => sensor + display,
    };
    Rotation::from_degrees(degrees)
}

/// A frame as delivered by the camera
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub rotation: Rotation,
    /// Capture time in milliseconds on a monotonic clock
    pub timestamp_ms: i64,
}

impl RawFrame {
    /// Tightly packed single-plane frame
    pub fn packed(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
        timestamp_ms: i64,
    ) -> Self {
        let bpp = format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            planes: vec![Plane::new(data, width as usize * bpp, bpp)],
            rotation: Rotation::Deg0,
            timestamp_ms,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Upright RGB image ready for the engine
#[derive(Debug, Clone)]
pub struct AdaptedFrame {
    pub image: RgbImage,
    /// Rotation that was applied
    pub rotation: Rotation,
    pub timestamp_ms: i64,
}

/// Convert a camera frame into an upright RGB image
pub fn adapt_frame(frame: &RawFrame) -> Result<AdaptedFrame, VisionError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(VisionError::Frame(format!(
            "Invalid frame dimensions {}x{}",
            frame.width, frame.height
        )));
    }

    let pixels = frame.width as u64 * frame.height as u64;
    if pixels > MAX_PIXELS {
        return Err(VisionError::Frame(format!(
            "Frame too large: {} pixels (max {})",
            pixels, MAX_PIXELS
        )));
    }

    let expected = frame.format.plane_count();
    if frame.planes.len() != expected {
        return Err(VisionError::Frame(format!(
            "{:?} frame needs {} plane(s), got {}",
            frame.format,
            expected,
            frame.planes.len()
        )));
    }

    let upright = match frame.format {
        PixelFormat::Yuv420 => yuv420_to_rgb(frame)?,
        _ => packed_to_rgb(frame)?,
    };

    Ok(AdaptedFrame {
        image: rotate(upright, frame.rotation),
        rotation: frame.rotation,
        timestamp_ms: frame.timestamp_ms,
    })
}

/// Rotate an image clockwise
pub fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

/// Decode an encoded still photo (JPEG, PNG, ...)
pub fn decode_photo(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    if bytes.is_empty() {
        return Err(VisionError::Frame("Photo buffer is empty".to_string()));
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Read and decode a photo from disk
pub fn open_photo(path: &Path) -> Result<RgbImage, VisionError> {
    let bytes = std::fs::read(path)?;
    decode_photo(&bytes)
}

fn check_plane(
    plane: &Plane,
    width: usize,
    height: usize,
    sample_bytes: usize,
    name: &str,
) -> Result<(), VisionError> {
    if plane.pixel_stride < sample_bytes {
        return Err(VisionError::Frame(format!(
            "{} plane pixel stride {} smaller than sample size {}",
            name, plane.pixel_stride, sample_bytes
        )));
    }

    let row_bytes = (width - 1)
        .checked_mul(plane.pixel_stride)
        .and_then(|n| n.checked_add(sample_bytes))
        .ok_or_else(|| VisionError::Frame(format!("{} plane row size overflows", name)))?;
    if plane.row_stride < row_bytes {
        return Err(VisionError::Frame(format!(
            "{} plane row stride {} smaller than a row of {} bytes",
            name, plane.row_stride, row_bytes
        )));
    }

    let required = (height - 1)
        .checked_mul(plane.row_stride)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or_else(|| VisionError::Frame(format!("{} plane size overflows", name)))?;

    if plane.data.len() < required {
        return Err(VisionError::Frame(format!(
            "{} plane holds {} bytes, {} needed",
            name,
            plane.data.len(),
            required
        )));
    }

    Ok(())
}

fn packed_to_rgb(frame: &RawFrame) -> Result<RgbImage, VisionError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let plane = &frame.planes[0];
    let bpp = frame.format.bytes_per_pixel();
    check_plane(plane, w, h, bpp, "pixel")?;

    let bgr = frame.format == PixelFormat::Bgr888;
    Ok(ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
        let px = plane.sample(x as usize, y as usize);
        if bgr {
            image::Rgb([px[2], px[1], px[0]])
        } else {
            image::Rgb([px[0], px[1], px[2]])
        }
    }))
}

fn yuv420_to_rgb(frame: &RawFrame) -> Result<RgbImage, VisionError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
    let (y_plane, u_plane, v_plane) = (&frame.planes[0], &frame.planes[1], &frame.planes[2]);

    check_plane(y_plane, w, h, 1, "Y")?;
    check_plane(u_plane, cw, ch, 1, "U")?;
    check_plane(v_plane, cw, ch, 1, "V")?;

    Ok(ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane.sample(x, y)[0] as f32;
        let u = u_plane.sample(x / 2, y / 2)[0] as f32 - 128.0;
        let v = v_plane.sample(x / 2, y / 2)[0] as f32 - 128.0;

        // BT.601 full range
        let r = luma + 1.402 * v;
        let g = luma - 0.344_136 * u - 0.714_136 * v;
        let b = luma + 1.772 * u;
        image::Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
    }))
}

#[inline]
fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_frame(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 7, 255]);
            }
        }
        RawFrame::packed(width, height, PixelFormat::Rgba8888, data, 10)
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let adapted = adapt_frame(&rgba_frame(3, 2)).unwrap();
        assert_eq!(adapted.image.dimensions(), (3, 2));
        assert_eq!(adapted.image.get_pixel(2, 1).0, [2, 1, 7]);
        assert_eq!(adapted.timestamp_ms, 10);
    }

    #[test]
    fn test_bgr_is_swapped() {
        let frame = RawFrame::packed(1, 1, PixelFormat::Bgr888, vec![1u8, 2, 3], 0);
        let adapted = adapt_frame(&frame).unwrap();
        assert_eq!(adapted.image.get_pixel(0, 0).0, [3, 2, 1]);
    }

    #[test]
    fn test_row_padding_is_skipped() {
        // 2x2 RGB with 2 bytes of padding per row
        let data = vec![1u8, 1, 1, 2, 2, 2, 0, 0, 3, 3, 3, 4, 4, 4, 0, 0];
        let frame = RawFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Rgb888,
            planes: vec![Plane::new(data, 8, 3)],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        let image = adapt_frame(&frame).unwrap().image;
        assert_eq!(image.get_pixel(1, 0).0, [2, 2, 2]);
        assert_eq!(image.get_pixel(0, 1).0, [3, 3, 3]);
    }

    #[test]
    fn test_rotation_90_swaps_dimensions() {
        let frame = rgba_frame(4, 2).with_rotation(Rotation::Deg90);
        let adapted = adapt_frame(&frame).unwrap();
        assert_eq!(adapted.image.dimensions(), (2, 4));
        // Bottom-left source pixel (0, 1) lands at top-left after a clockwise turn
        assert_eq!(adapted.image.get_pixel(0, 0).0, [0, 1, 7]);
    }

    #[test]
    fn test_short_buffer_fails_fast() {
        let frame = RawFrame::packed(4, 4, PixelFormat::Rgba8888, vec![0u8; 60], 0);
        let err = adapt_frame(&frame).unwrap_err();
        assert!(err.to_string().contains("needed"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let frame = RawFrame::packed(0, 4, PixelFormat::Rgb888, Vec::<u8>::new(), 0);
        assert!(adapt_frame(&frame).is_err());
    }

    #[test]
    fn test_wrong_plane_count() {
        let mut frame = rgba_frame(2, 2);
        frame.format = PixelFormat::Yuv420;
        let err = adapt_frame(&frame).unwrap_err();
        assert!(err.to_string().contains("plane"));
    }

    #[test]
    fn test_row_stride_smaller_than_row() {
        let frame = RawFrame {
            width: 4,
            height: 1,
            format: PixelFormat::Rgb888,
            planes: vec![Plane::new(vec![0u8; 64], 6, 3)],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        assert!(adapt_frame(&frame).is_err());
    }

    #[test]
    fn test_yuv_gray() {
        // Neutral chroma gives gray output equal to luma
        let frame = RawFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Yuv420,
            planes: vec![
                Plane::new(vec![100u8, 100, 100, 100], 2, 1),
                Plane::new(vec![128u8], 1, 1),
                Plane::new(vec![128u8], 1, 1),
            ],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        let image = adapt_frame(&frame).unwrap().image;
        for px in image.pixels() {
            assert_eq!(px.0, [100, 100, 100]);
        }
    }

    #[test]
    fn test_yuv_interleaved_chroma() {
        // Semi-planar layout: U and V share a buffer with pixel stride 2
        let uv = Bytes::from(vec![128u8, 255]);
        let frame = RawFrame {
            width: 1,
            height: 1,
            format: PixelFormat::Yuv420,
            planes: vec![
                Plane::new(vec![128u8], 1, 1),
                Plane::new(uv.slice(0..1), 2, 2),
                Plane::new(uv.slice(1..2), 2, 2),
            ],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        // row stride 2 with a 1-byte plane is still enough for a single sample
        let px = adapt_frame(&frame).unwrap().image.get_pixel(0, 0).0;
        assert_eq!(px[0], 255);
        assert!(px[1] < 128);
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn test_relative_rotation() {
        assert_eq!(
            relative_rotation(90, 0, LensFacing::Back).unwrap(),
            Rotation::Deg90
        );
        assert_eq!(
            relative_rotation(90, 90, LensFacing::Back).unwrap(),
            Rotation::Deg0
        );
        assert_eq!(
            relative_rotation(270, 90, LensFacing::Front).unwrap(),
            Rotation::Deg0
        );
        assert!(relative_rotation(30, 0, LensFacing::Back).is_err());
    }

    #[test]
    fn test_decode_photo_png() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 1, image::Rgb([9, 8, 7]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        img.write_to(&mut encoded, image::ImageOutputFormat::Png).unwrap();

        let decoded = decode_photo(encoded.get_ref()).unwrap();
        assert_eq!(decoded.get_pixel(1, 1).0, [9, 8, 7]);
    }

    #[test]
    fn test_decode_photo_garbage() {
        assert!(decode_photo(&[]).is_err());
        assert!(matches!(
            decode_photo(&[1, 2, 3, 4]),
            Err(VisionError::Image(_))
        ));
    }

    #[test]
    fn test_huge_pixel_stride_is_rejected() {
        let frame = RawFrame {
            width: 3,
            height: 1,
            format: PixelFormat::Rgb888,
            planes: vec![Plane::new(vec![0u8; 16], 16, usize::MAX / 2 + 1)],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        let err = adapt_frame(&frame).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_huge_row_stride_is_rejected() {
        let frame = RawFrame {
            width: 3,
            height: 4,
            format: PixelFormat::Rgb888,
            planes: vec![Plane::new(vec![0u8; 16], usize::MAX / 2 + 1, 3)],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        assert!(matches!(adapt_frame(&frame), Err(VisionError::Frame(_))));
    }

    #[test]
    fn test_huge_chroma_stride_is_rejected() {
        let y = Plane::new(vec![0u8; 16], 4, 1);
        let chroma = Plane::new(vec![0u8; 4], 2, usize::MAX / 2 + 1);
        let frame = RawFrame {
            width: 4,
            height: 4,
            format: PixelFormat::Yuv420,
            planes: vec![y, chroma.clone(), chroma],
            rotation: Rotation::Deg0,
            timestamp_ms: 0,
        };
        assert!(matches!(adapt_frame(&frame), Err(VisionError::Frame(_))));
    }
}
