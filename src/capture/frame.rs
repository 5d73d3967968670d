use bytes::Bytes;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded video frame with zero-copy semantics
///
/// Frames are never mutated in place. Processing produces a new frame that
/// carries the same [`FrameProperties`] and capture `timestamp`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    /// Bytes per row. Zero for compressed formats.
    pub stride: u32,
    pub format: PixelFormat,
    pub props: FrameProperties,
}

/// Presentation properties that survive conversion and processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameProperties {
    pub sequence: u64,
    /// Presentation start time; the logical timestamp of the frame
    pub start_time: Option<Duration>,
    pub end_time: Option<Duration>,
    pub mirrored: bool,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Bgrx32,
    Gray8,
    Yuyv4,
    Mjpeg,
    Nv12,
    Invalid,
}

impl PixelFormat {
    /// Bytes per pixel of packed formats. `None` for planar, compressed and
    /// invalid formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 | PixelFormat::Bgrx32 => Some(4),
            PixelFormat::Mjpeg | PixelFormat::Nv12 | PixelFormat::Invalid => None,
        }
    }
}

impl Frame {
    /// Wrap a packed pixel buffer. The stride is derived from the format.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        props: FrameProperties,
    ) -> Self {
        let stride = format
            .bytes_per_pixel()
            .map(|bpp| width.saturating_mul(bpp as u32))
            .unwrap_or(0);

        Self {
            data,
            meta: Arc::new(FrameMetadata {
                width,
                height,
                stride,
                format,
                props,
            }),
            timestamp: Instant::now(),
        }
    }

    /// Empty frame signalling end-of-stream or no-op
    pub fn invalid(props: FrameProperties) -> Self {
        Self {
            data: Bytes::new(),
            meta: Arc::new(FrameMetadata {
                width: 0,
                height: 0,
                stride: 0,
                format: PixelFormat::Invalid,
                props,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.meta.format != PixelFormat::Invalid
            && !self.data.is_empty()
            && self.meta.width > 0
            && self.meta.height > 0
    }

    pub fn properties(&self) -> &FrameProperties {
        &self.meta.props
    }

    pub fn sequence(&self) -> u64 {
        self.meta.props.sequence
    }

    /// Same frame data with new properties
    pub fn with_properties(&self, props: FrameProperties) -> Self {
        let mut meta = (*self.meta).clone();
        meta.props = props;
        Self {
            data: self.data.clone(),
            meta: Arc::new(meta),
            timestamp: self.timestamp,
        }
    }
}

/// Pixel data of a frame as an `H x W x C` array
///
/// `source` is the frame the pixels were taken from. It is the metadata
/// template when the array is turned back into a frame.
#[derive(Debug, Clone)]
pub struct ArrayView {
    pub pixels: Array3<u8>,
    pub source: Frame,
}

impl ArrayView {
    pub fn new(pixels: Array3<u8>, source: Frame) -> Self {
        Self { pixels, source }
    }

    /// Zero-size array with shape `(0, 0, 0)`
    pub fn empty(source: Frame) -> Self {
        Self {
            pixels: Array3::zeros((0, 0, 0)),
            source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    pub fn sequence(&self) -> u64 {
        self.source.sequence()
    }

    /// Replace the pixels, keeping the source frame
    pub fn map_pixels<F>(self, f: F) -> Self
    where
        F: FnOnce(Array3<u8>) -> Array3<u8>,
    {
        Self {
            pixels: f(self.pixels),
            source: self.source,
        }
    }
}

/// Processed array and processed frame derived from one input
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub array: ArrayView,
    pub frame: Frame,
}

impl WorkResult {
    pub fn sequence(&self) -> u64 {
        self.frame.sequence()
    }

    /// Time since the input frame was captured
    pub fn latency(&self) -> Duration {
        self.frame.timestamp.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(sequence: u64) -> FrameProperties {
        FrameProperties {
            sequence,
            start_time: Some(Duration::from_millis(sequence * 33)),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_frame() {
        let frame = Frame::invalid(props(3));
        assert!(!frame.is_valid());
        assert_eq!(frame.sequence(), 3);
    }

    #[test]
    fn test_packed_frame_stride() {
        let data = Bytes::from(vec![0u8; 2 * 2 * 3]);
        let frame = Frame::new(data, 2, 2, PixelFormat::Rgb24, props(0));
        assert!(frame.is_valid());
        assert_eq!(frame.meta.stride, 6);

        let data = Bytes::from_static(&[0xff, 0xd8]);
        let jpeg = Frame::new(data, 2, 2, PixelFormat::Mjpeg, props(0));
        assert_eq!(jpeg.meta.stride, 0);
    }

    #[test]
    fn test_wide_frame_stride_saturates() {
        let frame = Frame::new(Bytes::new(), 1 << 30, 1, PixelFormat::Bgra32, props(0));
        assert_eq!(frame.meta.stride, u32::MAX);
    }

    #[test]
    fn test_empty_array_view() {
        let view = ArrayView::empty(Frame::invalid(props(1)));
        assert!(view.is_empty());
        assert_eq!(view.pixels.dim(), (0, 0, 0));
    }

    #[test]
    fn test_with_properties_keeps_data() {
        let frame = Frame::new(Bytes::from(vec![7u8; 3]), 1, 1, PixelFormat::Rgb24, props(1));
        let relabelled = frame.with_properties(props(9));
        assert_eq!(relabelled.sequence(), 9);
        assert_eq!(relabelled.data, frame.data);
        assert_eq!(relabelled.timestamp, frame.timestamp);
    }
}
