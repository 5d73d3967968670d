//! Integration tests for frame/array conversion

mod common;

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use common::test_frame;
use framepipe::capture::{
    array_to_frame, frame_to_array, ArrayStream, ArrayToFrameConverter, FrameProperties,
    FrameSource, PixelFormat, TestPatternSource,
};
use framepipe::{ConvertError, Frame, SourceConfig};
use image::{DynamicImage, ImageFormat, RgbImage};
use proptest::prelude::*;

fn packed_format() -> impl Strategy<Value = PixelFormat> {
    prop_oneof![
        Just(PixelFormat::Rgb24),
        Just(PixelFormat::Bgr24),
        Just(PixelFormat::Rgba32),
        Just(PixelFormat::Bgra32),
        Just(PixelFormat::Bgrx32),
        Just(PixelFormat::Gray8),
    ]
}

proptest! {
    #[test]
    fn prop_round_trip_keeps_timestamp_and_properties(
        width in 1u32..16,
        height in 1u32..16,
        format in packed_format(),
        sequence in any::<u64>(),
        start_ms in 0u64..1_000_000,
        seed in any::<u8>(),
    ) {
        let bpp = format.bytes_per_pixel().unwrap();
        let data: Vec<u8> = (0..(width * height) as usize * bpp)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        let props = FrameProperties {
            sequence,
            start_time: Some(Duration::from_millis(start_ms)),
            end_time: Some(Duration::from_millis(start_ms + 33)),
            ..Default::default()
        };
        let frame = Frame::new(Bytes::from(data), width, height, format, props);

        let (array, reference) = frame_to_array(frame.clone()).unwrap();
        let back = array_to_frame(&array, &reference).unwrap();

        prop_assert_eq!(back.timestamp, frame.timestamp);
        prop_assert_eq!(back.properties(), frame.properties());
        prop_assert_eq!((back.meta.width, back.meta.height), (width, height));
        prop_assert_eq!(back.data.len(), (width * height * 4) as usize);
    }
}

#[test]
fn test_mjpeg_frame_decodes() {
    let rgb = RgbImage::from_fn(16, 8, |x, _| image::Rgb([(x * 16) as u8, 128, 64]));
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();

    let frame = Frame::new(
        Bytes::from(jpeg),
        16,
        8,
        PixelFormat::Mjpeg,
        FrameProperties::default(),
    );
    let (array, _) = frame_to_array(frame).unwrap();
    assert_eq!(array.pixels.dim(), (8, 16, 3));
}

#[test]
fn test_unsupported_format_is_an_error() {
    let frame = Frame::new(
        Bytes::from(vec![0; 24]),
        4,
        4,
        PixelFormat::Nv12,
        FrameProperties::default(),
    );
    assert!(matches!(
        frame_to_array(frame),
        Err(ConvertError::UnsupportedFormat(PixelFormat::Nv12))
    ));
}

#[test]
fn test_converter_carries_explicit_properties() {
    let (array, _) = frame_to_array(test_frame(2)).unwrap();
    let props = FrameProperties {
        sequence: 42,
        mirrored: true,
        ..Default::default()
    };

    let frame = ArrayToFrameConverter.convert(&array, props.clone()).unwrap();
    assert_eq!(frame.properties(), &props);
    assert_eq!(frame.meta.format, PixelFormat::Bgrx32);

    let empty = framepipe::ArrayView::empty(test_frame(3));
    let eos = ArrayToFrameConverter.convert(&empty, props.clone()).unwrap();
    assert!(!eos.is_valid());
    assert_eq!(eos.properties(), &props);
}

#[test]
fn test_pattern_stream_to_snapshot() {
    let config = SourceConfig {
        width: 8,
        height: 6,
        fps: 30,
        format: PixelFormat::Bgra32,
        frame_count: Some(3),
    };
    let mut source = TestPatternSource::new(config.clone()).unwrap();
    assert_eq!(source.frame_interval(), Duration::from_secs(1) / 30);
    assert!(source.next_frame().unwrap().unwrap().is_valid());

    let arrays: Vec<_> = ArrayStream::new(TestPatternSource::new(config).unwrap())
        .collect::<color_eyre::Result<_>>()
        .unwrap();
    assert_eq!(arrays.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("last.png");
    arrays[2].to_image().unwrap().save(&path).unwrap();
    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (8, 6));
}
