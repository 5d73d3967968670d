//! Frame <-> array conversion
//!
//! Frames are turned into `H x W x C` arrays by decoding their buffer to
//! packed RGB (or gray). Arrays are turned back into 32-bit `Bgrx32`/`Bgra32`
//! frames, using a reference frame as metadata template so that sequence
//! number, presentation times and capture timestamp survive processing.

use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use ndarray::Array3;
use tracing::trace;

use super::decoder::decode_frame;
use super::frame::{ArrayView, Frame, FrameMetadata, FrameProperties, PixelFormat};
use crate::error::ConvertError;

/// Convert `frame` into an array view. Invalid frames give an empty array.
///
/// The frame is handed back alongside the array so callers can use it as the
/// template for [`array_to_frame`].
pub fn frame_to_array(frame: Frame) -> Result<(ArrayView, Frame), ConvertError> {
    if !frame.is_valid() {
        return Ok((ArrayView::empty(frame.clone()), frame));
    }

    let decoded = decode_frame(&frame)?;
    let pixels = Array3::from_shape_vec(
        (decoded.height, decoded.width, decoded.channels),
        decoded.data,
    )?;
    trace!(sequence = frame.sequence(), shape = ?pixels.dim(), "frame converted to array");

    Ok((ArrayView::new(pixels, frame.clone()), frame))
}

/// Convert `array` into a frame carrying the properties and capture timestamp
/// of `reference`.
///
/// | channels | interpretation     | format   |
/// |----------|--------------------|----------|
/// | 1        | gray               | `Bgrx32` |
/// | 2        | gray + alpha       | `Bgra32` |
/// | 3        | RGB                | `Bgrx32` |
/// | 4        | RGB + alpha        | `Bgra32` |
///
/// An empty array returns `reference` unchanged.
pub fn array_to_frame(array: &ArrayView, reference: &Frame) -> Result<Frame, ConvertError> {
    if array.is_empty() {
        return Ok(reference.clone());
    }

    let (height, width, channels) = array.pixels.dim();
    if !(1..=4).contains(&channels) {
        return Err(ConvertError::InvalidChannels(channels));
    }
    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(ConvertError::InvalidDimensions(height, width));
    };

    let mut buf = Vec::with_capacity(width * height * 4);
    for px in array.pixels.rows() {
        let bgra = match channels {
            1 => [px[0], px[0], px[0], 255],
            2 => [px[0], px[0], px[0], px[1]],
            3 => [px[2], px[1], px[0], 255],
            _ => [px[2], px[1], px[0], px[3]],
        };
        buf.extend_from_slice(&bgra);
    }

    let format = if channels % 2 == 0 {
        PixelFormat::Bgra32
    } else {
        PixelFormat::Bgrx32
    };

    Ok(Frame {
        data: Bytes::from(buf),
        meta: Arc::new(FrameMetadata {
            width: w,
            height: h,
            stride: w * 4,
            format,
            props: reference.properties().clone(),
        }),
        timestamp: reference.timestamp,
    })
}

/// Pipeline component converting frames to arrays
///
/// Players send an invalid frame at the end of a stream. With
/// `ignore_null_frame` set such frames are swallowed, otherwise they become
/// empty arrays.
#[derive(Debug, Clone)]
pub struct FrameToArrayConverter {
    pub ignore_null_frame: bool,
}

impl Default for FrameToArrayConverter {
    fn default() -> Self {
        Self {
            ignore_null_frame: true,
        }
    }
}

impl FrameToArrayConverter {
    pub fn new(ignore_null_frame: bool) -> Self {
        Self { ignore_null_frame }
    }

    pub fn convert(&self, frame: Frame) -> Result<Option<ArrayView>, ConvertError> {
        if !frame.is_valid() && self.ignore_null_frame {
            return Ok(None);
        }
        let (array, _) = frame_to_array(frame)?;
        Ok(Some(array))
    }
}

/// Pipeline component converting arrays to frames with explicit properties
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayToFrameConverter;

impl ArrayToFrameConverter {
    /// Empty arrays become an invalid frame carrying `props`.
    pub fn convert(
        &self,
        array: &ArrayView,
        props: FrameProperties,
    ) -> Result<Frame, ConvertError> {
        if array.is_empty() {
            return Ok(Frame::invalid(props));
        }
        Ok(array_to_frame(array, &array.source)?.with_properties(props))
    }
}

impl ArrayView {
    /// Copy the pixels into an `image` buffer (1, 3 or 4 channels).
    pub fn to_image(&self) -> Result<DynamicImage, ConvertError> {
        let (height, width, channels) = self.pixels.dim();
        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        let (w, h) = (width as u32, height as u32);
        let bad_dims = || ConvertError::InvalidDimensions(height, width);

        if self.is_empty() {
            return Err(bad_dims());
        }

        let image = match channels {
            1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, raw).ok_or_else(bad_dims)?),
            3 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, raw).ok_or_else(bad_dims)?),
            4 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, raw).ok_or_else(bad_dims)?),
            n => return Err(ConvertError::InvalidChannels(n)),
        };
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::time::Duration;

    fn props(sequence: u64) -> FrameProperties {
        FrameProperties {
            sequence,
            start_time: Some(Duration::from_micros(40_000 * sequence)),
            end_time: Some(Duration::from_micros(40_000 * (sequence + 1))),
            ..Default::default()
        }
    }

    fn rgb_frame() -> Frame {
        // 2x1: red, green
        Frame::new(
            Bytes::from(vec![255, 0, 0, 0, 255, 0]),
            2,
            1,
            PixelFormat::Rgb24,
            props(5),
        )
    }

    #[test]
    fn test_frame_to_array_shape() {
        let (array, frame) = frame_to_array(rgb_frame()).unwrap();
        assert_eq!(array.pixels.dim(), (1, 2, 3));
        assert_eq!(array.pixels[[0, 1, 1]], 255);
        assert_eq!(frame.sequence(), 5);
        assert_eq!(array.sequence(), 5);
    }

    #[test]
    fn test_invalid_frame_gives_empty_array() {
        let (array, _) = frame_to_array(Frame::invalid(props(1))).unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_timestamps() {
        let frame = rgb_frame();
        let (array, reference) = frame_to_array(frame.clone()).unwrap();
        let back = array_to_frame(&array, &reference).unwrap();

        assert_eq!(back.timestamp, frame.timestamp);
        assert_eq!(back.properties(), frame.properties());
        assert_eq!(back.meta.format, PixelFormat::Bgrx32);
        assert_eq!(&back.data[..], &[0, 0, 255, 255, 0, 255, 0, 255]);

        let (again, _) = frame_to_array(back).unwrap();
        assert_eq!(again.pixels, array.pixels);
    }

    #[test]
    fn test_array_to_frame_channel_layouts() {
        let reference = rgb_frame();

        let gray = ArrayView::new(array![[[7u8]]], reference.clone());
        let frame = array_to_frame(&gray, &reference).unwrap();
        assert_eq!(&frame.data[..], &[7, 7, 7, 255]);

        let gray_alpha = ArrayView::new(array![[[7u8, 9]]], reference.clone());
        let frame = array_to_frame(&gray_alpha, &reference).unwrap();
        assert_eq!(frame.meta.format, PixelFormat::Bgra32);
        assert_eq!(&frame.data[..], &[7, 7, 7, 9]);

        let rgba = ArrayView::new(array![[[1u8, 2, 3, 4]]], reference.clone());
        let frame = array_to_frame(&rgba, &reference).unwrap();
        assert_eq!(&frame.data[..], &[3, 2, 1, 4]);
    }

    #[test]
    fn test_array_to_frame_rejects_five_channels() {
        let reference = rgb_frame();
        let view = ArrayView::new(Array3::zeros((1, 1, 5)), reference.clone());
        let err = array_to_frame(&view, &reference).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidChannels(5)));
    }

    #[test]
    fn test_empty_array_returns_reference() {
        let reference = rgb_frame();
        let frame = array_to_frame(&ArrayView::empty(reference.clone()), &reference).unwrap();
        assert_eq!(frame.data, reference.data);
        assert_eq!(frame.meta.format, PixelFormat::Rgb24);
    }

    #[test]
    fn test_frame_converter_ignores_null_frames() {
        let converter = FrameToArrayConverter::default();
        assert!(converter.convert(Frame::invalid(props(0))).unwrap().is_none());

        let converter = FrameToArrayConverter::new(false);
        let array = converter.convert(Frame::invalid(props(0))).unwrap().unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn test_array_converter_empty_gives_invalid_frame() {
        let converter = ArrayToFrameConverter;
        let frame = converter
            .convert(&ArrayView::empty(rgb_frame()), props(8))
            .unwrap();
        assert!(!frame.is_valid());
        assert_eq!(frame.sequence(), 8);
    }

    #[test]
    fn test_array_converter_applies_properties() {
        let (array, _) = frame_to_array(rgb_frame()).unwrap();
        let mut p = props(11);
        p.mirrored = true;
        let frame = ArrayToFrameConverter.convert(&array, p.clone()).unwrap();
        assert_eq!(frame.properties(), &p);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_to_image() {
        let (array, _) = frame_to_array(rgb_frame()).unwrap();
        let image = array.to_image().unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);

        let bad = ArrayView::new(Array3::zeros((1, 1, 2)), rgb_frame());
        assert!(matches!(bad.to_image(), Err(ConvertError::InvalidChannels(2))));
    }
}
