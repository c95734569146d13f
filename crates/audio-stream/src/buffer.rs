//! Sample plane storage and the borrowed views handed out by sources.
//!
//! Every stage keeps its samples in a [`PlaneBuffer`]: one 8-byte aligned allocation in which
//! each plane starts at a multiple of the plane stride. Readers get a [`Planes`] view that
//! borrows the owning stage, so the borrow checker ends the view's life at the next pull.

use bytemuck::Pod;

use crate::error::{Result, StreamError};
use crate::format::AudioFormat;

/// Read-only view of the planes produced by one pull from a source.
///
/// For packed storage there is a single plane with all channels interleaved; for planar
/// storage there is one plane per channel. Each plane is exactly
/// `frames * bytes_per_sample * channels_per_plane` bytes long.
#[derive(Clone, Copy, Debug)]
pub struct Planes<'a> {
    data: &'a [u8],
    stride: usize,
    plane_len: usize,
    count: usize,
    frames: usize,
}

impl<'a> Planes<'a> {
    /// A result carrying no buffer and no frames.
    pub fn empty() -> Self {
        Self {
            data: &[],
            stride: 0,
            plane_len: 0,
            count: 0,
            frames: 0,
        }
    }

    /// View `count` planes spaced `stride` bytes apart, each holding `frames` frames of
    /// `frame_bytes` bytes.
    ///
    /// Fails if the planes would not fit in `data`.
    pub fn new(
        data: &'a [u8],
        stride: usize,
        count: usize,
        frames: usize,
        frame_bytes: usize,
    ) -> Result<Self> {
        let plane_len = frames
            .checked_mul(frame_bytes)
            .ok_or_else(|| StreamError::upstream("plane length overflow"))?;
        if plane_len > stride && count > 1 {
            return Err(StreamError::upstream("planes overlap"));
        }
        let end = match count {
            0 => 0,
            n => (n - 1) * stride + plane_len,
        };
        if end > data.len() {
            return Err(StreamError::upstream(format!(
                "planes need {end} bytes, buffer holds {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            stride,
            plane_len,
            count,
            frames,
        })
    }

    /// Frames per plane.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of planes.
    pub fn count(&self) -> usize {
        self.count
    }

    /// `true` when the source returned no buffer at all.
    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.frames == 0
    }

    /// Raw bytes of plane `index`.
    pub fn plane(&self, index: usize) -> &'a [u8] {
        if index >= self.count {
            return &[];
        }
        let start = index * self.stride;
        &self.data[start..start + self.plane_len]
    }

    /// Plane `index` reinterpreted as samples of type `T`, without copying.
    pub fn plane_as<T: Pod>(&self, index: usize) -> Result<&'a [T]> {
        bytemuck::try_cast_slice(self.plane(index))
            .map_err(|e| StreamError::upstream(format!("plane {index} cast: {e:?}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.count).map(|i| self.plane(i))
    }
}

/// Writable view over a stage's planes, `capacity` frames each.
#[derive(Debug)]
pub struct PlanesMut<'a> {
    data: &'a mut [u8],
    stride: usize,
    count: usize,
    capacity: usize,
    frame_bytes: usize,
}

impl PlanesMut<'_> {
    /// Frames that fit in each plane.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes of plane `index`, `capacity * frame_bytes` long.
    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        if index >= self.count {
            return &mut [];
        }
        let start = index * self.stride;
        let len = self.capacity * self.frame_bytes;
        &mut self.data[start..start + len]
    }

    /// Plane `index` as a mutable slice of `T`.
    pub fn plane_as_mut<T: Pod>(&mut self, index: usize) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.plane_mut(index))
            .map_err(|e| StreamError::upstream(format!("plane {index} cast: {e:?}")))
    }
}

/// Growable storage for the planes of one [`AudioFormat`].
///
/// Capacity is counted in frames per plane and never shrinks. Planes are laid out back to
/// back; the stride is recomputed whenever the storage is reallocated.
#[derive(Debug, Default)]
pub struct PlaneBuffer {
    words: Vec<u64>,
    planes: usize,
    frame_bytes: usize,
    capacity: usize,
}

impl PlaneBuffer {
    /// Empty buffer shaped for `format`. Nothing is allocated until the first grow.
    pub fn new(format: &AudioFormat) -> Self {
        Self {
            words: Vec::new(),
            planes: format.num_planes(),
            frame_bytes: format.plane_frame_bytes(),
            capacity: 0,
        }
    }

    /// Frames per plane currently allocated.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distance in bytes between the starts of consecutive planes.
    ///
    /// Rounded up to whole words so every plane start stays 8-byte aligned.
    pub fn stride(&self) -> usize {
        (self.capacity * self.frame_bytes).div_ceil(8) * 8
    }

    /// Make room for at least `frames` frames per plane.
    ///
    /// Returns `true` if the storage was reallocated. Existing contents are not preserved.
    pub fn grow(&mut self, frames: usize) -> Result<bool> {
        if frames <= self.capacity {
            return Ok(false);
        }
        let plane_bytes = frames
            .checked_mul(self.frame_bytes)
            .ok_or_else(|| StreamError::Allocation(format!("{frames} frames overflow")))?;
        let words = plane_bytes
            .div_ceil(8)
            .checked_mul(self.planes)
            .ok_or_else(|| StreamError::Allocation(format!("{frames} frames overflow")))?;

        let mut fresh: Vec<u64> = Vec::new();
        fresh.try_reserve_exact(words)?;
        fresh.resize(words, 0);
        self.words = fresh;
        self.capacity = frames;
        Ok(true)
    }

    /// View of the first `frames` frames of every plane.
    pub fn planes(&self, frames: usize) -> Result<Planes<'_>> {
        if frames > self.capacity {
            return Err(StreamError::upstream(format!(
                "{frames} frames exceed capacity {}",
                self.capacity
            )));
        }
        Planes::new(
            bytemuck::cast_slice(&self.words),
            self.stride(),
            self.planes,
            frames,
            self.frame_bytes,
        )
    }

    /// Writable view of the whole capacity.
    pub fn planes_mut(&mut self) -> PlanesMut<'_> {
        let stride = self.stride();
        PlanesMut {
            data: bytemuck::cast_slice_mut(&mut self.words),
            stride,
            count: self.planes,
            capacity: self.capacity,
            frame_bytes: self.frame_bytes,
        }
    }
}

/// Reusable decode target owned by a decoder stage.
///
/// A codec fills it on every successful decode; its contents stay valid only until the
/// next submission.
#[derive(Debug)]
pub struct Frame {
    buf: PlaneBuffer,
    frames: usize,
}

impl Frame {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            buf: PlaneBuffer::new(&format),
            frames: 0,
        }
    }

    /// Frames held by the last decode.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Prepare to receive `frames` frames and return the planes to fill.
    pub fn prepare(&mut self, frames: usize) -> Result<PlanesMut<'_>> {
        self.frames = 0;
        if self.buf.grow(frames)? {
            tracing::debug!(frames, "decode frame buffer grown");
        }
        self.frames = frames;
        let mut out = self.buf.planes_mut();
        out.capacity = frames;
        Ok(out)
    }

    /// Planes written by the last decode.
    pub fn planes(&self) -> Result<Planes<'_>> {
        self.buf.planes(self.frames)
    }
}
