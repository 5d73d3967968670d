//! Frame producers
//!
//! A [`FrameSource`] is anything that emits frames on the thread that polls
//! it. The pipeline makes no other assumption about the transport.

use std::time::Duration;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument};

use super::convert::FrameToArrayConverter;
use super::frame::{ArrayView, Frame, FrameProperties, PixelFormat};
use crate::SourceConfig;

pub trait FrameSource: Send {
    /// Next frame of the stream.
    ///
    /// An invalid frame is the end-of-stream sentinel; `None` means the
    /// source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// Deterministic moving-gradient source
pub struct TestPatternSource {
    config: SourceConfig,
    interval: Duration,
    sequence: u64,
    finished: bool,
}

impl TestPatternSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let bpp = config
            .format
            .bytes_per_pixel()
            .ok_or_else(|| eyre!("test pattern needs a packed format, got {:?}", config.format))?;
        if config.format == PixelFormat::Yuyv4 && config.width % 2 != 0 {
            return Err(eyre!("YUYV test pattern needs an even width"));
        }
        if config.fps == 0 {
            return Err(eyre!("fps must be positive"));
        }

        info!(
            "Test pattern source: {}x{} {:?} ({} bytes/pixel) at {} fps",
            config.width, config.height, config.format, bpp, config.fps
        );

        Ok(Self {
            interval: Duration::from_secs(1) / config.fps,
            config,
            sequence: 0,
            finished: false,
        })
    }

    pub fn frame_interval(&self) -> Duration {
        self.interval
    }

    fn render(&self) -> Bytes {
        let SourceConfig {
            width,
            height,
            format,
            ..
        } = self.config;
        let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
        let shift = self.sequence % w;
        let mut data = Vec::with_capacity(
            width as usize * height as usize * format.bytes_per_pixel().unwrap_or(0),
        );

        for y in 0..u64::from(height) {
            for x in 0..u64::from(width) {
                let r = ((x + shift) % w * 255 / w) as u8;
                let g = (y * 255 / h) as u8;
                let b = (shift % 256) as u8;
                match format {
                    PixelFormat::Rgb24 => data.extend_from_slice(&[r, g, b]),
                    PixelFormat::Bgr24 => data.extend_from_slice(&[b, g, r]),
                    PixelFormat::Rgba32 => data.extend_from_slice(&[r, g, b, 255]),
                    PixelFormat::Bgra32 | PixelFormat::Bgrx32 => {
                        data.extend_from_slice(&[b, g, r, 255])
                    }
                    PixelFormat::Gray8 => data.push(r),
                    // Luma ramp with neutral chroma, one Y U or Y V pair per pixel
                    PixelFormat::Yuyv4 => data.extend_from_slice(&[16 + r / 2, 128]),
                    PixelFormat::Mjpeg | PixelFormat::Nv12 | PixelFormat::Invalid => {}
                }
            }
        }
        Bytes::from(data)
    }
}

/// `interval * sequence` without truncating the sequence number
fn start_time(interval: Duration, sequence: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(sequence));
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

impl FrameSource for TestPatternSource {
    #[instrument(skip(self), fields(sequence = self.sequence))]
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let start_time = start_time(self.interval, self.sequence);
        let props = FrameProperties {
            sequence: self.sequence,
            start_time: Some(start_time),
            end_time: Some(start_time + self.interval),
            ..Default::default()
        };

        if self.config.frame_count.is_some_and(|n| self.sequence >= n) {
            debug!("Test pattern finished, emitting end-of-stream");
            self.finished = true;
            return Ok(Some(Frame::invalid(props)));
        }

        let frame = Frame::new(
            self.render(),
            self.config.width,
            self.config.height,
            self.config.format,
            props,
        );
        self.sequence += 1;
        Ok(Some(frame))
    }
}

/// Array-producing adapter over a frame source
///
/// Pulls frames from `source` and yields them as arrays through a
/// [`FrameToArrayConverter`]. End-of-stream frames are skipped or yielded as
/// empty arrays depending on the converter.
pub struct ArrayStream<S> {
    source: S,
    converter: FrameToArrayConverter,
}

impl<S: FrameSource> ArrayStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            converter: FrameToArrayConverter::default(),
        }
    }

    pub fn with_converter(source: S, converter: FrameToArrayConverter) -> Self {
        Self { source, converter }
    }

    pub fn next_array(&mut self) -> Result<Option<ArrayView>> {
        while let Some(frame) = self.source.next_frame()? {
            if let Some(array) = self.converter.convert(frame)? {
                return Ok(Some(array));
            }
        }
        Ok(None)
    }
}

impl<S: FrameSource> Iterator for ArrayStream<S> {
    type Item = Result<ArrayView>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_array().transpose()
    }
}
