use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::{Frame, PixelFormat};
use crate::error::ConvertError;

/// Tightly packed pixels decoded from a frame buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    /// 1 (gray) or 3 (RGB)
    pub channels: usize,
    pub data: Vec<u8>,
}

/// Decode a valid frame into packed gray or RGB24 pixels, honouring stride.
pub fn decode_frame(frame: &Frame) -> Result<DecodedImage, ConvertError> {
    let meta = &frame.meta;
    match meta.format {
        PixelFormat::Mjpeg => decode_jpeg(&frame.data),
        PixelFormat::Gray8 => repack(frame, 1, |px, out| out.push(px[0])),
        PixelFormat::Rgb24 => repack(frame, 3, |px, out| out.extend_from_slice(&px[..3])),
        PixelFormat::Bgr24 => {
            repack(frame, 3, |px, out| out.extend_from_slice(&[px[2], px[1], px[0]]))
        }
        PixelFormat::Rgba32 => repack(frame, 3, |px, out| out.extend_from_slice(&px[..3])),
        // Strip X/A off BGRX/BGRA
        PixelFormat::Bgra32 | PixelFormat::Bgrx32 => {
            repack(frame, 3, |px, out| out.extend_from_slice(&[px[2], px[1], px[0]]))
        }
        PixelFormat::Yuyv4 => decode_yuyv(frame),
        format @ (PixelFormat::Nv12 | PixelFormat::Invalid) => {
            Err(ConvertError::UnsupportedFormat(format))
        }
    }
}

/// Check the buffer covers `height` rows of `row_bytes` at the frame stride
fn checked_rows(frame: &Frame, row_bytes: usize) -> Result<usize, ConvertError> {
    let height = frame.meta.height as usize;
    let stride = (frame.meta.stride as usize).max(row_bytes);
    let expected = match height {
        0 => 0,
        h => stride * (h - 1) + row_bytes,
    };

    if frame.data.len() < expected {
        return Err(ConvertError::BufferTooSmall {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(stride)
}

fn repack<F>(frame: &Frame, channels: usize, mut pixel: F) -> Result<DecodedImage, ConvertError>
where
    F: FnMut(&[u8], &mut Vec<u8>),
{
    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;
    let bpp = frame
        .meta
        .format
        .bytes_per_pixel()
        .ok_or(ConvertError::UnsupportedFormat(frame.meta.format))?;
    let row_bytes = width * bpp;
    let stride = checked_rows(frame, row_bytes)?;

    let mut data = Vec::with_capacity(width * height * channels);
    for row in 0..height {
        let start = row * stride;
        for px in frame.data[start..start + row_bytes].chunks_exact(bpp) {
            pixel(px, &mut data);
        }
    }

    Ok(DecodedImage {
        width,
        height,
        channels,
        data,
    })
}

fn decode_jpeg(data: &[u8]) -> Result<DecodedImage, ConvertError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or(ConvertError::UnsupportedFormat(PixelFormat::Mjpeg))?;

    let channels = match info.pixel_format {
        JpegPixelFormat::L8 => 1,
        JpegPixelFormat::RGB24 => 3,
        _ => return Err(ConvertError::UnsupportedFormat(PixelFormat::Mjpeg)),
    };

    Ok(DecodedImage {
        width: info.width as usize,
        height: info.height as usize,
        channels,
        data: pixels,
    })
}

/// YUYV 4:2:2 to RGB24 using integer BT.601 coefficients
fn decode_yuyv(frame: &Frame) -> Result<DecodedImage, ConvertError> {
    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;
    if width % 2 != 0 {
        return Err(ConvertError::InvalidDimensions(height, width));
    }
    let row_bytes = width * 2;
    let stride = checked_rows(frame, row_bytes)?;

    let mut data = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let start = row * stride;
        for quad in frame.data[start..start + row_bytes].chunks_exact(4) {
            let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
            data.extend_from_slice(&yuv_to_rgb(y0, u, v));
            data.extend_from_slice(&yuv_to_rgb(y1, u, v));
        }
    }

    Ok(DecodedImage {
        width,
        height,
        channels: 3,
        data,
    })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
