//! Typed, zero-copy views over a [`SampleSource`].
//!
//! A reader checks the source's storage once at construction and afterwards reinterprets
//! each pull's planes as slices of `T`. The returned slices borrow the reader, so they are
//! gone before the next `read`.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::buffer::Planes;
use crate::error::{Result, StreamError};
use crate::format::{AudioFormat, SampleFormat};
use crate::source::SampleSource;

/// Rust element types matching a sample encoding.
pub trait Sample: Pod {
    const PACKED: SampleFormat;
    const PLANAR: SampleFormat;
}

impl Sample for u8 {
    const PACKED: SampleFormat = SampleFormat::PackedU8;
    const PLANAR: SampleFormat = SampleFormat::PlanarU8;
}

impl Sample for i16 {
    const PACKED: SampleFormat = SampleFormat::PackedS16;
    const PLANAR: SampleFormat = SampleFormat::PlanarS16;
}

impl Sample for i32 {
    const PACKED: SampleFormat = SampleFormat::PackedS32;
    const PLANAR: SampleFormat = SampleFormat::PlanarS32;
}

impl Sample for f32 {
    const PACKED: SampleFormat = SampleFormat::PackedF32;
    const PLANAR: SampleFormat = SampleFormat::PlanarF32;
}

impl Sample for f64 {
    const PACKED: SampleFormat = SampleFormat::PackedF64;
    const PLANAR: SampleFormat = SampleFormat::PlanarF64;
}

fn check_storage(found: SampleFormat, expected: SampleFormat) -> Result<()> {
    if found != expected {
        return Err(StreamError::FormatMismatch { expected, found });
    }
    Ok(())
}

/// Interleaved samples of one packed storage.
pub struct PackedReader<S, T> {
    source: S,
    _sample: PhantomData<T>,
}

/// Packed signed 16-bit view.
pub type PackedS16Reader<S> = PackedReader<S, i16>;

impl<S: SampleSource, T: Sample> PackedReader<S, T> {
    /// Fails with [`StreamError::FormatMismatch`] unless `source` produces `T::PACKED`.
    pub fn new(source: S) -> Result<Self> {
        check_storage(source.format().storage, T::PACKED)?;
        Ok(Self {
            source,
            _sample: PhantomData,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.source.format()
    }

    /// Read the next block: `channels * frames` interleaved samples, without copying.
    ///
    /// An empty slice is not end of stream; that is reported as
    /// `Err(StreamError::EndOfStream)`.
    pub fn read(&mut self) -> Result<&[T]> {
        let channels = self.source.format().num_channels();
        let planes = self.source.read_raw()?;
        if planes.is_empty() {
            return Ok(&[]);
        }
        let n = channels * planes.frames();
        let samples = planes.plane_as::<T>(0)?;
        samples
            .get(..n)
            .ok_or_else(|| StreamError::upstream(format!("plane holds {} of {n} samples", samples.len())))
    }

    /// Give the wrapped source back.
    pub fn into_inner(self) -> S {
        self.source
    }

    pub fn close(self) {
        self.source.close();
    }
}

/// One typed slice per channel.
#[derive(Clone, Copy, Debug)]
pub struct TypedPlanes<'a, T> {
    planes: Planes<'a>,
    _sample: PhantomData<T>,
}

impl<'a, T: Sample> TypedPlanes<'a, T> {
    pub fn frames(&self) -> usize {
        self.planes.frames()
    }

    pub fn channels(&self) -> usize {
        self.planes.count()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Samples of `channel`, `frames()` long.
    pub fn channel(&self, channel: usize) -> Result<&'a [T]> {
        self.planes.plane_as::<T>(channel)
    }
}

/// Per-channel samples of one planar storage.
pub struct PlanarReader<S, T> {
    source: S,
    _sample: PhantomData<T>,
}

impl<S: SampleSource, T: Sample> PlanarReader<S, T> {
    /// Fails with [`StreamError::FormatMismatch`] unless `source` produces `T::PLANAR`.
    pub fn new(source: S) -> Result<Self> {
        check_storage(source.format().storage, T::PLANAR)?;
        Ok(Self {
            source,
            _sample: PhantomData,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.source.format()
    }

    pub fn read(&mut self) -> Result<TypedPlanes<'_, T>> {
        let planes = self.source.read_raw()?;
        Ok(TypedPlanes {
            planes,
            _sample: PhantomData,
        })
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    pub fn close(self) {
        self.source.close();
    }
}
