//! The pull-based sample source abstraction every pipeline stage implements.

use crate::buffer::Planes;
use crate::error::Result;
use crate::format::AudioFormat;

/// A stage that yields decoded or converted samples on demand.
///
/// ## Contract
/// - `read_raw` returns planes borrowed from the source; the borrow ends before the next
///   `read_raw` or `close`, so no view survives a second pull.
/// - `Ok` with zero frames is a valid, non-terminal result. Call again.
/// - `Err(StreamError::EndOfStream)` is sticky: every later call returns it too.
/// - Any other error is fatal for that call and is never retried internally.
///
/// [`StreamError::EndOfStream`]: crate::error::StreamError::EndOfStream
pub trait SampleSource {
    /// Format of the samples this source produces.
    fn format(&self) -> AudioFormat;

    /// Pull the next block of samples.
    fn read_raw(&mut self) -> Result<Planes<'_>>;

    /// Release the source and everything it owns.
    ///
    /// Consuming `self` makes a second close, or a read after close, a compile error.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn read_raw(&mut self) -> Result<Planes<'_>> {
        (**self).read_raw()
    }
}
