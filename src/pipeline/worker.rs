use color_eyre::Result;

use crate::capture::convert::{array_to_frame, frame_to_array};
use crate::capture::frame::{ArrayView, Frame, WorkResult};

/// User-pluggable processing step
///
/// A worker runs synchronously on the processor's thread and never on the
/// producer or UI thread. Errors and panics are not caught here; the
/// [`Processor`](super::Processor) publishes them on its error channel.
pub trait Worker: Send + 'static {
    /// Process one array. A zero-size array is the end-of-stream sentinel and
    /// must be returned unchanged.
    fn process_array(&mut self, array: ArrayView) -> Result<ArrayView>;

    /// Process one frame into the processed array/frame pair.
    ///
    /// The default converts the frame to an array, runs
    /// [`process_array`](Self::process_array) and converts back using the
    /// input frame as metadata template. Overrides must keep the input's
    /// properties and timestamp on the output frame.
    fn process_frame(&mut self, frame: Frame) -> Result<WorkResult> {
        let (array, frame) = frame_to_array(frame)?;
        let array = if array.is_empty() {
            array
        } else {
            self.process_array(array)?
        };
        let frame = array_to_frame(&array, &frame)?;
        Ok(WorkResult { array, frame })
    }

    fn name(&self) -> &str {
        "worker"
    }
}

impl<W: Worker + ?Sized> Worker for Box<W> {
    #[inline]
    fn process_array(&mut self, array: ArrayView) -> Result<ArrayView> {
        (**self).process_array(array)
    }

    #[inline]
    fn process_frame(&mut self, frame: Frame) -> Result<WorkResult> {
        (**self).process_frame(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Worker that returns its input
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Worker for Passthrough {
    fn process_array(&mut self, array: ArrayView) -> Result<ArrayView> {
        Ok(array)
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Worker built from a closure over arrays
pub struct FnWorker<F> {
    name: String,
    f: F,
}

impl<F> FnWorker<F>
where
    F: FnMut(ArrayView) -> Result<ArrayView> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Worker for FnWorker<F>
where
    F: FnMut(ArrayView) -> Result<ArrayView> + Send + 'static,
{
    fn process_array(&mut self, array: ArrayView) -> Result<ArrayView> {
        if array.is_empty() {
            return Ok(array);
        }
        (self.f)(array)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
