//! Streaming resample stage.
//!
//! Wraps a [`SampleSource`] and a [`Converter`] and emits the source's audio in a target
//! [`AudioFormat`]. Output is written into a stage-owned [`PlaneBuffer`] that grows to fit the
//! largest block seen so far and is never shrunk.
//!
//! ## End of stream
//! Once the wrapped source reports end-of-stream the stage stops pulling and drains the
//! converter. Zero converter output is only terminal in that drain mode; mid-stream it is an
//! ordinary empty result.

use crate::buffer::{PlaneBuffer, Planes, PlanesMut};
use crate::config::ResampleConfig;
use crate::convert::RubatoConverter;
use crate::error::{Result, StreamError};
use crate::format::AudioFormat;
use crate::source::SampleSource;

/// A sample rate / format conversion engine.
pub trait Converter {
    /// Convert `input` into `output`, returning frames written per plane.
    ///
    /// `None` asks the converter to flush what it still buffers. The return value never
    /// exceeds `output.capacity()`; anything that does not fit is kept for the next call.
    fn convert(&mut self, input: Option<&Planes<'_>>, output: &mut PlanesMut<'_>) -> Result<usize>;
}

/// A source converted to another format, or the source itself when no conversion is needed.
pub enum Resampled<S, C> {
    Passthrough(S),
    Converted(Resampler<S, C>),
}

impl<S, C> Resampled<S, C> {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Resampled::Passthrough(_))
    }
}

impl<S: SampleSource, C: Converter> SampleSource for Resampled<S, C> {
    fn format(&self) -> AudioFormat {
        match self {
            Resampled::Passthrough(s) => s.format(),
            Resampled::Converted(r) => r.format(),
        }
    }

    fn read_raw(&mut self) -> Result<Planes<'_>> {
        match self {
            Resampled::Passthrough(s) => s.read_raw(),
            Resampled::Converted(r) => r.read_raw(),
        }
    }

    fn close(self) {
        match self {
            Resampled::Passthrough(s) => s.close(),
            Resampled::Converted(r) => r.close(),
        }
    }
}

/// Convert `source` to `to` using the Rubato-backed converter.
pub fn resample<S: SampleSource>(
    source: S,
    to: AudioFormat,
    cfg: &ResampleConfig,
) -> Result<Resampled<S, RubatoConverter>> {
    resample_with(source, to, |from, to| RubatoConverter::new(from, to, cfg))
}

/// Convert `source` to `to`, building the converter with `make` only if the formats differ.
pub fn resample_with<S, C, F>(source: S, to: AudioFormat, make: F) -> Result<Resampled<S, C>>
where
    S: SampleSource,
    C: Converter,
    F: FnOnce(&AudioFormat, &AudioFormat) -> Result<C>,
{
    let from = source.format();
    if from == to {
        tracing::debug!(rate_hz = to.rate, "resample skipped");
        return Ok(Resampled::Passthrough(source));
    }
    let converter = make(&from, &to)?;
    Ok(Resampled::Converted(Resampler::new(source, converter, to)))
}

/// Converts a source's planes to a target format on every pull.
///
/// Fields drop in declaration order: converter, output buffer, then the wrapped source.
pub struct Resampler<S, C> {
    converter: C,
    output: PlaneBuffer,
    source: S,
    format: AudioFormat,
    ratio: f64,
    source_eof: bool,
    drained: bool,
}

impl<S: SampleSource, C: Converter> Resampler<S, C> {
    /// Wrap `source` with `converter`, producing `to`.
    pub fn new(source: S, converter: C, to: AudioFormat) -> Self {
        let from = source.format();
        let ratio = match from.rate {
            0 => 1.0,
            r => to.rate as f64 / r as f64,
        };
        tracing::debug!(
            from_hz = from.rate,
            to_hz = to.rate,
            from_storage = ?from.storage,
            to_storage = ?to.storage,
            "resampling"
        );
        Self {
            converter,
            output: PlaneBuffer::new(&to),
            source,
            format: to,
            ratio,
            source_eof: false,
            drained: false,
        }
    }

    /// Frames per plane currently allocated for output.
    pub fn capacity(&self) -> usize {
        self.output.capacity()
    }
}

impl<S: SampleSource, C: Converter> SampleSource for Resampler<S, C> {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_raw(&mut self) -> Result<Planes<'_>> {
        if self.drained {
            return Err(StreamError::EndOfStream);
        }

        let input = if self.source_eof {
            None
        } else {
            match self.source.read_raw() {
                Ok(planes) => Some(planes),
                Err(StreamError::EndOfStream) => {
                    tracing::debug!("resampler source exhausted, draining");
                    self.source_eof = true;
                    None
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(planes) = &input {
            let required = (planes.frames() as f64 * self.ratio).ceil() as usize;
            if self.output.grow(required)? {
                tracing::debug!(frames = required, "resample buffer grown");
            }
        }

        let capacity = self.output.capacity();
        let produced = self
            .converter
            .convert(input.as_ref(), &mut self.output.planes_mut())?;
        if produced > capacity {
            return Err(StreamError::upstream(format!(
                "converter wrote {produced} frames into room for {capacity}"
            )));
        }

        if produced == 0 {
            if self.source_eof {
                tracing::debug!("resampler drained");
                self.drained = true;
                return Err(StreamError::EndOfStream);
            }
            return Ok(Planes::empty());
        }
        self.output.planes(produced)
    }

    fn close(self) {
        tracing::debug!("resampler closed");
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::decode::tests::Log;
    use crate::format::{ChannelLayout, SampleFormat};

    fn mono(rate: u32, storage: SampleFormat) -> AudioFormat {
        AudioFormat::new(rate, storage, ChannelLayout::MONO)
    }

    /// Yields scripted blocks of packed S16 mono frames.
    struct Blocks {
        format: AudioFormat,
        blocks: VecDeque<Result<Vec<i16>>>,
        current: Vec<i16>,
        log: Option<Log>,
    }

    impl Blocks {
        fn new(rate: u32, blocks: Vec<Result<Vec<i16>>>) -> Self {
            Self {
                format: mono(rate, SampleFormat::PackedS16),
                blocks: blocks.into(),
                current: Vec::new(),
                log: None,
            }
        }
    }

    impl SampleSource for Blocks {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn read_raw(&mut self) -> Result<Planes<'_>> {
            match self.blocks.pop_front() {
                Some(Ok(block)) => {
                    self.current = block;
                    let bytes: &[u8] = bytemuck::cast_slice(&self.current);
                    Planes::new(bytes, bytes.len(), 1, self.current.len(), 2)
                }
                Some(Err(e)) => Err(e),
                None => Err(StreamError::EndOfStream),
            }
        }
    }

    impl Drop for Blocks {
        fn drop(&mut self) {
            if let Some(log) = &self.log {
                log.borrow_mut().push("source");
            }
        }
    }

    /// Writes `output_for(input frames)` frames per call, filled with the call index.
    /// Holds back `tail` frames it emits one per flush call.
    struct Scripted {
        ratio: f64,
        tail: usize,
        calls: Rc<Cell<usize>>,
        log: Option<Log>,
    }

    impl Scripted {
        fn new(ratio: f64, tail: usize) -> Self {
            Self {
                ratio,
                tail,
                calls: Rc::default(),
                log: None,
            }
        }
    }

    impl Converter for Scripted {
        fn convert(
            &mut self,
            input: Option<&Planes<'_>>,
            output: &mut PlanesMut<'_>,
        ) -> Result<usize> {
            self.calls.set(self.calls.get() + 1);
            let n = match input {
                Some(planes) => ((planes.frames() as f64) * self.ratio).floor() as usize,
                None if self.tail > 0 => {
                    self.tail -= 1;
                    1
                }
                None => 0,
            };
            let n = n.min(output.capacity());
            let call = self.calls.get() as i16;
            for p in 0..output.count() {
                output.plane_as_mut::<i16>(p)?[..n].fill(call);
            }
            Ok(n)
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            if let Some(log) = &self.log {
                log.borrow_mut().push("converter");
            }
        }
    }

    #[test]
    fn equal_formats_pass_the_source_through() {
        let built = Cell::new(false);
        let source = Blocks::new(8_000, vec![Ok(vec![5, 6])]);
        let target = source.format();
        let mut out = resample_with(source, target, |_, _| {
            built.set(true);
            Ok(Scripted::new(1.0, 0))
        })
        .unwrap();
        assert!(out.is_passthrough());
        assert!(!built.get());
        assert_eq!(out.read_raw().unwrap().plane_as::<i16>(0).unwrap(), &[5, 6]);
    }

    #[test]
    fn capacity_grows_monotonically() {
        let sizes = [10usize, 40, 5, 0, 80, 20];
        let blocks = sizes.iter().map(|&n| Ok(vec![0i16; n])).collect();
        let source = Blocks::new(8_000, blocks);
        let target = mono(16_000, SampleFormat::PlanarS16);
        let mut r = Resampler::new(source, Scripted::new(2.0, 0), target);

        let mut last = 0;
        for &n in &sizes {
            let _ = r.read_raw().unwrap();
            let required = n * 2;
            assert!(r.capacity() >= last);
            assert!(r.capacity() >= required);
            last = r.capacity();
        }
        assert_eq!(last, 160);
    }

    #[test]
    fn zero_output_mid_stream_is_not_end_of_stream() {
        let source = Blocks::new(8_000, vec![Ok(vec![]), Ok(vec![1, 2, 3, 4])]);
        let target = mono(4_000, SampleFormat::PackedS16);
        let mut r = Resampler::new(source, Scripted::new(0.5, 0), target);

        let first = r.read_raw().unwrap();
        assert!(first.is_empty());
        assert_eq!(r.read_raw().unwrap().frames(), 2);
        assert!(r.read_raw().unwrap_err().is_end_of_stream());
    }

    #[test]
    fn drains_converter_after_source_ends() {
        let source = Blocks::new(8_000, vec![Ok(vec![1; 4])]);
        let target = mono(8_000, SampleFormat::PackedS32);
        let mut r = Resampler::new(source, Scripted::new(1.0, 3), target);

        assert_eq!(r.read_raw().unwrap().frames(), 4);
        for _ in 0..3 {
            assert_eq!(r.read_raw().unwrap().frames(), 1);
        }
        for _ in 0..3 {
            assert!(r.read_raw().unwrap_err().is_end_of_stream());
        }
    }

    #[test]
    fn end_of_stream_does_not_call_converter_again() {
        let source = Blocks::new(8_000, vec![]);
        let converter = Scripted::new(1.0, 0);
        let calls = converter.calls.clone();
        let mut r = Resampler::new(source, converter, mono(16_000, SampleFormat::PackedS16));
        assert!(r.read_raw().unwrap_err().is_end_of_stream());
        assert!(r.read_raw().unwrap_err().is_end_of_stream());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn source_errors_propagate_unchanged() {
        let source = Blocks::new(
            8_000,
            vec![Err(StreamError::Allocation("no memory".into()))],
        );
        let mut r = Resampler::new(source, Scripted::new(1.0, 0), mono(16_000, SampleFormat::PackedS16));
        assert!(matches!(r.read_raw(), Err(StreamError::Allocation(_))));
    }

    /// Reports blocks too long for any output buffer to hold.
    struct Oversized;

    impl SampleSource for Oversized {
        fn format(&self) -> AudioFormat {
            mono(8_000, SampleFormat::PackedS16)
        }

        fn read_raw(&mut self) -> Result<Planes<'_>> {
            Planes::new(&[], 0, 1, usize::MAX / 2, 0)
        }
    }

    #[test]
    fn output_allocation_failure_surfaces_from_read() {
        let converter = Scripted::new(2.0, 0);
        let calls = converter.calls.clone();
        let mut r = Resampler::new(Oversized, converter, mono(16_000, SampleFormat::PackedS16));
        assert!(matches!(r.read_raw(), Err(StreamError::Allocation(_))));
        assert_eq!(r.capacity(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn planar_output_has_one_plane_per_channel() {
        let source = Blocks::new(8_000, vec![Ok(vec![0; 6])]);
        let target = AudioFormat::new(8_000, SampleFormat::PlanarS16, ChannelLayout::STEREO);
        let mut r = Resampler::new(source, Scripted::new(1.0, 0), target);
        let planes = r.read_raw().unwrap();
        assert_eq!(planes.count(), 2);
        assert_eq!(planes.plane_as::<i16>(0).unwrap(), &[1; 6]);
        assert_eq!(planes.plane_as::<i16>(1).unwrap(), &[1; 6]);
    }

    #[test]
    fn close_releases_converter_then_source() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut source = Blocks::new(8_000, vec![]);
        source.log = Some(log.clone());
        let mut converter = Scripted::new(1.0, 0);
        converter.log = Some(log.clone());
        let r = resample_with(source, mono(16_000, SampleFormat::PackedS16), |_, _| Ok(converter))
            .unwrap();
        r.close();
        assert_eq!(*log.borrow(), vec!["converter", "source"]);
    }
}
