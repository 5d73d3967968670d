pub mod convert;
pub mod decoder;
pub mod frame;
pub mod source;

pub use convert::{
    array_to_frame, frame_to_array, ArrayToFrameConverter, FrameToArrayConverter,
};
pub use frame::{
    ArrayView, Frame, FrameMetadata, FrameProperties, PixelFormat, Rotation, WorkResult,
};
pub use source::{ArrayStream, FrameSource, TestPatternSource};
