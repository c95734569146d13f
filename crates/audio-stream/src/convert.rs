//! Rubato-backed sample rate and format converter.
//!
//! Input planes are decoded to interleaved `f32`, remixed to the target channel count and
//! fed to Rubato's streaming sinc resampler in fixed-size chunks. Output is trimmed of the
//! resampler's leading delay, queued, and encoded into the target storage as the caller's
//! buffer allows.

use std::collections::VecDeque;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::buffer::{Planes, PlanesMut};
use crate::config::ResampleConfig;
use crate::error::{Result, StreamError};
use crate::format::{AudioFormat, SampleType};
use crate::resample::Converter;

/// Converts between any two [`AudioFormat`]s with a known storage and at least one channel.
pub struct RubatoConverter {
    from: AudioFormat,
    to: AudioFormat,
    channels: usize,
    resampler: Option<Box<dyn Resampler<f32>>>,
    chunk_frames: usize,
    ratio: f64,
    /// Interleaved input waiting for a full chunk.
    pending: Vec<f32>,
    /// Interleaved output not yet handed to the caller.
    ready: VecDeque<f32>,
    scratch: Vec<f32>,
    /// One source frame decoded to `f32`.
    decoded: Vec<f32>,
    remixed: Vec<f32>,
    /// Leading output frames still to drop (resampler delay).
    skip: usize,
    frames_in: u64,
    frames_out: u64,
    flushed: bool,
}

impl RubatoConverter {
    pub fn new(from: &AudioFormat, to: &AudioFormat, cfg: &ResampleConfig) -> Result<Self> {
        for (side, f) in [("source", from), ("target", to)] {
            if f.rate == 0 || f.storage.sample_type().is_none() || f.num_channels() == 0 {
                return Err(StreamError::upstream(format!("unsupported {side} format {f:?}")));
            }
        }
        let channels = to.num_channels();
        let chunk_frames = cfg.chunk_frames.max(1);
        let ratio = to.rate as f64 / from.rate as f64;

        let resampler: Option<Box<dyn Resampler<f32>>> = if from.rate == to.rate {
            None
        } else {
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len: cfg.sinc_len,
                f_cutoff: calculate_cutoff(cfg.sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: cfg.oversampling_factor,
                window,
            };
            let r = Async::<f32>::new_sinc(
                ratio,
                cfg.max_relative_ratio,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| StreamError::Allocation(format!("resampler init: {e}")))?;
            Some(Box::new(r))
        };

        let (scratch, skip) = match &resampler {
            Some(r) => (vec![0.0f32; r.output_frames_max() * channels], r.output_delay()),
            None => (Vec::new(), 0),
        };

        Ok(Self {
            from: *from,
            to: *to,
            channels,
            resampler,
            chunk_frames,
            ratio,
            pending: Vec::with_capacity(chunk_frames * channels),
            ready: VecDeque::new(),
            scratch,
            decoded: vec![0.0; from.num_channels()],
            remixed: vec![0.0; channels],
            skip,
            frames_in: 0,
            frames_out: 0,
            flushed: false,
        })
    }

    /// Frames produced and queued but not yet delivered.
    pub fn queued_frames(&self) -> usize {
        self.ready.len() / self.channels
    }

    /// Decode `planes`, remix, and append to the pending input.
    fn push_input(&mut self, planes: &Planes<'_>) -> Result<()> {
        let Some(kind) = self.from.storage.sample_type() else {
            return Err(StreamError::upstream("source has no sample storage"));
        };
        for f in 0..planes.frames() {
            for (c, s) in self.decoded.iter_mut().enumerate() {
                let (plane, idx) = self.from.locate(f, c);
                *s = load(kind, planes.plane(plane), idx)?;
            }
            remix(&self.decoded, &mut self.remixed);
            if self.resampler.is_some() {
                self.pending.extend_from_slice(&self.remixed);
            } else {
                self.ready.extend(self.remixed.iter().copied());
                self.frames_out += 1;
            }
        }
        self.frames_in += planes.frames() as u64;
        Ok(())
    }

    /// Resample every full chunk of pending input.
    fn process_pending(&mut self) -> Result<()> {
        let block = self.chunk_frames * self.channels;
        let pending = std::mem::take(&mut self.pending);
        let mut offset = 0;
        while pending.len() - offset >= block {
            self.process_chunk(&pending[offset..offset + block], self.chunk_frames, None)?;
            offset += block;
        }
        self.pending = pending;
        self.pending.drain(..offset);
        Ok(())
    }

    /// Run one resampler call and queue its output, minus any leading delay.
    fn process_chunk(&mut self, input: &[f32], frames: usize, partial: Option<usize>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let channels = self.channels;

        let input_adapter = InterleavedSlice::new(input, channels, frames)
            .map_err(|e| StreamError::upstream(format!("interleaved slice (input): {e}")))?;
        let out_capacity_frames = self.scratch.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, channels, out_capacity_frames)
                .map_err(|e| StreamError::upstream(format!("interleaved slice (output): {e}")))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| StreamError::upstream(format!("resampler process: {e}")))?;

        let dropped = nbr_out.min(self.skip);
        self.skip -= dropped;
        let kept = &self.scratch[dropped * channels..nbr_out * channels];
        self.ready.extend(kept.iter().copied());
        self.frames_out += (nbr_out - dropped) as u64;
        Ok(())
    }

    /// Push the partial chunk and the filter tail through, then trim the total output to
    /// `round(frames_in * ratio)`.
    fn flush(&mut self) -> Result<()> {
        self.flushed = true;
        if self.resampler.is_none() {
            return Ok(());
        }
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;

        let tail = std::mem::take(&mut self.pending);
        let tail_frames = tail.len() / self.channels;
        if tail_frames > 0 {
            self.process_chunk(&tail, tail_frames, Some(tail_frames))?;
        }

        let silence = vec![0.0f32; self.chunk_frames * self.channels];
        let per_round = (self.chunk_frames as f64 * self.ratio).max(1.0);
        let missing = expected.saturating_sub(self.frames_out) as f64 + self.skip as f64;
        let max_rounds = (missing / per_round).ceil() as usize + 2;
        let mut rounds = 0;
        while self.frames_out < expected && rounds < max_rounds {
            self.process_chunk(&silence, self.chunk_frames, None)?;
            rounds += 1;
        }

        if self.frames_out > expected {
            let extra = (self.frames_out - expected) as usize * self.channels;
            self.ready.truncate(self.ready.len().saturating_sub(extra));
            self.frames_out = expected;
        }
        tracing::debug!(
            frames_in = self.frames_in,
            frames_out = self.frames_out,
            "converter flushed"
        );
        Ok(())
    }

    /// Encode up to `output.capacity()` queued frames into the target planes.
    fn deliver(&mut self, output: &mut PlanesMut<'_>) -> Result<usize> {
        let Some(kind) = self.to.storage.sample_type() else {
            return Err(StreamError::upstream("target has no sample storage"));
        };
        let n = self.queued_frames().min(output.capacity());
        for f in 0..n {
            for c in 0..self.channels {
                let v = self.ready.pop_front().unwrap_or(0.0);
                let (plane, idx) = self.to.locate(f, c);
                store(kind, output.plane_mut(plane), idx, v)?;
            }
        }
        Ok(n)
    }
}

impl Converter for RubatoConverter {
    fn convert(&mut self, input: Option<&Planes<'_>>, output: &mut PlanesMut<'_>) -> Result<usize> {
        match input {
            Some(planes) => {
                self.push_input(planes)?;
                self.process_pending()?;
            }
            None if !self.flushed => self.flush()?,
            None => {}
        }
        self.deliver(output)
    }
}

/// Map `src` channels onto `dst` channels.
///
/// Equal counts copy through, mono fans out, a mono target takes the mean, anything else
/// keeps matching channel positions and silences the rest.
fn remix(src: &[f32], dst: &mut [f32]) {
    match (src.len(), dst.len()) {
        (a, b) if a == b => dst.copy_from_slice(src),
        (1, _) => dst.fill(src[0]),
        (a, 1) => dst[0] = src.iter().sum::<f32>() / a as f32,
        _ => {
            for (c, d) in dst.iter_mut().enumerate() {
                *d = src.get(c).copied().unwrap_or(0.0);
            }
        }
    }
}

fn element<'a>(bytes: &'a [u8], idx: usize, width: usize) -> Result<&'a [u8]> {
    bytes
        .get(idx * width..(idx + 1) * width)
        .ok_or_else(|| StreamError::upstream(format!("sample {idx} outside plane")))
}

fn element_mut<'a>(bytes: &'a mut [u8], idx: usize, width: usize) -> Result<&'a mut [u8]> {
    bytes
        .get_mut(idx * width..(idx + 1) * width)
        .ok_or_else(|| StreamError::upstream(format!("sample {idx} outside plane")))
}

/// Read sample `idx` of a plane as `f32` in [-1, 1].
fn load(kind: SampleType, plane: &[u8], idx: usize) -> Result<f32> {
    let b = element(plane, idx, kind.bytes())?;
    Ok(match kind {
        SampleType::U8 => (f32::from(b[0]) - 128.0) / 128.0,
        SampleType::S16 => f32::from(bytemuck::pod_read_unaligned::<i16>(b)) / 32_768.0,
        SampleType::S32 => {
            (f64::from(bytemuck::pod_read_unaligned::<i32>(b)) / 2_147_483_648.0) as f32
        }
        SampleType::F32 => bytemuck::pod_read_unaligned::<f32>(b),
        SampleType::F64 => bytemuck::pod_read_unaligned::<f64>(b) as f32,
    })
}

/// Write `v` as sample `idx` of a plane, clamping integer encodings to their range.
fn store(kind: SampleType, plane: &mut [u8], idx: usize, v: f32) -> Result<()> {
    let b = element_mut(plane, idx, kind.bytes())?;
    match kind {
        SampleType::U8 => b[0] = ((v * 128.0).round() + 128.0).clamp(0.0, 255.0) as u8,
        SampleType::S16 => {
            let s = (v * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16;
            b.copy_from_slice(bytemuck::bytes_of(&s));
        }
        SampleType::S32 => {
            let s = (f64::from(v) * 2_147_483_648.0)
                .round()
                .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
            b.copy_from_slice(bytemuck::bytes_of(&s));
        }
        SampleType::F32 => b.copy_from_slice(bytemuck::bytes_of(&v)),
        SampleType::F64 => b.copy_from_slice(bytemuck::bytes_of(&f64::from(v))),
    }
    Ok(())
}
