//! Sample and stream format descriptions.
//!
//! [`AudioFormat`] is the unit of agreement between pipeline stages: two stages can be
//! chained without conversion only when their formats compare equal.

use symphonia::core::audio::Channels;

/// Memory layout of a single sample.
///
/// Packed formats interleave all channels in one plane; planar formats keep one plane per
/// channel. Samples are stored in native byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// No samples; the "no format" sentinel.
    #[default]
    Unknown,
    PackedU8,
    PackedS16,
    PackedS32,
    PackedF32,
    PackedF64,
    PlanarU8,
    PlanarS16,
    PlanarS32,
    PlanarF32,
    PlanarF64,
}

/// Element encoding shared by the packed and planar variant of a [`SampleFormat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    S16,
    S32,
    F32,
    F64,
}

impl SampleType {
    /// Width of one element in bytes.
    pub fn bytes(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::S16 => 2,
            SampleType::S32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }
}

impl SampleFormat {
    /// Element encoding, or `None` for [`SampleFormat::Unknown`].
    pub fn sample_type(self) -> Option<SampleType> {
        use SampleFormat::*;
        match self {
            Unknown => None,
            PackedU8 | PlanarU8 => Some(SampleType::U8),
            PackedS16 | PlanarS16 => Some(SampleType::S16),
            PackedS32 | PlanarS32 => Some(SampleType::S32),
            PackedF32 | PlanarF32 => Some(SampleType::F32),
            PackedF64 | PlanarF64 => Some(SampleType::F64),
        }
    }

    /// Bytes per sample; `0` for [`SampleFormat::Unknown`].
    pub fn bytes_per_sample(self) -> usize {
        self.sample_type().map_or(0, SampleType::bytes)
    }

    pub fn is_planar(self) -> bool {
        use SampleFormat::*;
        matches!(self, PlanarU8 | PlanarS16 | PlanarS32 | PlanarF32 | PlanarF64)
    }

    pub fn is_packed(self) -> bool {
        self != SampleFormat::Unknown && !self.is_planar()
    }

    /// Packed format with the same element encoding.
    pub fn packed(self) -> SampleFormat {
        match self.sample_type() {
            Some(t) => SampleFormat::from_type(t, false),
            None => SampleFormat::Unknown,
        }
    }

    /// Planar format with the same element encoding.
    pub fn planar(self) -> SampleFormat {
        match self.sample_type() {
            Some(t) => SampleFormat::from_type(t, true),
            None => SampleFormat::Unknown,
        }
    }

    pub fn from_type(sample_type: SampleType, planar: bool) -> SampleFormat {
        use SampleFormat::*;
        match (sample_type, planar) {
            (SampleType::U8, false) => PackedU8,
            (SampleType::S16, false) => PackedS16,
            (SampleType::S32, false) => PackedS32,
            (SampleType::F32, false) => PackedF32,
            (SampleType::F64, false) => PackedF64,
            (SampleType::U8, true) => PlanarU8,
            (SampleType::S16, true) => PlanarS16,
            (SampleType::S32, true) => PlanarS32,
            (SampleType::F32, true) => PlanarF32,
            (SampleType::F64, true) => PlanarF64,
        }
    }
}

/// Speaker channel bitmask.
///
/// Bit positions follow the usual WAVE/FFmpeg order (front left = bit 0, front right = bit 1,
/// front centre = bit 2, LFE = bit 3, ...), which is also the order Symphonia's [`Channels`]
/// uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    pub const MONO: ChannelLayout = ChannelLayout(0x4);
    pub const STEREO: ChannelLayout = ChannelLayout(0x3);
    pub const SURROUND: ChannelLayout = ChannelLayout(0x7);
    pub const QUAD: ChannelLayout = ChannelLayout(0x33);
    pub const FIVE_POINT_ZERO: ChannelLayout = ChannelLayout(0x37);
    pub const FIVE_POINT_ONE: ChannelLayout = ChannelLayout(0x3f);
    pub const SIX_POINT_ONE: ChannelLayout = ChannelLayout(0x70f);
    pub const SEVEN_POINT_ONE: ChannelLayout = ChannelLayout(0x63f);

    /// Default layout for `channels` speakers.
    ///
    /// Counts without a conventional layout get the lowest `channels` bits set.
    pub fn default_for(channels: usize) -> ChannelLayout {
        match channels {
            0 => ChannelLayout(0),
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND,
            4 => Self::QUAD,
            5 => Self::FIVE_POINT_ZERO,
            6 => Self::FIVE_POINT_ONE,
            7 => Self::SIX_POINT_ONE,
            8 => Self::SEVEN_POINT_ONE,
            n if n >= 64 => ChannelLayout(u64::MAX),
            n => ChannelLayout((1u64 << n) - 1),
        }
    }

    /// Number of channels present in the mask.
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

}

impl From<Channels> for ChannelLayout {
    /// Any single channel maps to [`ChannelLayout::MONO`]; Symphonia decoders disagree on
    /// which speaker a mono stream occupies.
    fn from(channels: Channels) -> Self {
        match channels.count() {
            1 => ChannelLayout::MONO,
            _ => ChannelLayout(u64::from(channels.bits())),
        }
    }
}

/// Rate, storage and channel layout of a sample stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second.
    pub rate: u32,
    pub storage: SampleFormat,
    pub layout: ChannelLayout,
}

impl AudioFormat {
    /// The "no format" sentinel: zero rate, no storage, no channels.
    pub const NONE: AudioFormat = AudioFormat {
        rate: 0,
        storage: SampleFormat::Unknown,
        layout: ChannelLayout(0),
    };

    pub fn new(rate: u32, storage: SampleFormat, layout: ChannelLayout) -> Self {
        Self {
            rate,
            storage,
            layout,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.layout.count()
    }

    /// `1` for packed storage, one per channel for planar storage, `0` for no storage.
    pub fn num_planes(&self) -> usize {
        if self.storage.is_planar() {
            self.num_channels()
        } else if self.storage.is_packed() {
            1
        } else {
            0
        }
    }

    /// Channels interleaved within a single plane.
    pub fn channels_per_plane(&self) -> usize {
        if self.storage.is_planar() {
            1
        } else {
            self.num_channels()
        }
    }

    /// Bytes one frame occupies within a single plane.
    pub fn plane_frame_bytes(&self) -> usize {
        self.storage.bytes_per_sample() * self.channels_per_plane()
    }

    /// Plane index and element index of `channel` within `frame`.
    pub fn locate(&self, frame: usize, channel: usize) -> (usize, usize) {
        if self.storage.is_planar() {
            (channel, frame)
        } else {
            (0, frame * self.num_channels() + channel)
        }
    }
}
