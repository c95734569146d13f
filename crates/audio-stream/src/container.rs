//! Symphonia-backed demuxer and codec.
//!
//! Uses Symphonia to:
//! - probe the input container and pick the best audio track
//! - read that track's packets ([`Demuxer`])
//! - decode them into planar frames of the stream's storage ([`SymphoniaCodec`])

use std::fs::File;
use std::path::Path;
use std::sync::Once;

use anyhow::{Context, anyhow};
use bytemuck::Pod;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{
    CODEC_TYPE_NULL, CODEC_TYPE_PCM_ALAW, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32BE_PLANAR,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F32LE_PLANAR, CODEC_TYPE_PCM_F64BE,
    CODEC_TYPE_PCM_F64BE_PLANAR, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_F64LE_PLANAR,
    CODEC_TYPE_PCM_MULAW, CodecParameters, DecoderOptions,
};
use symphonia::core::conv::{ConvertibleSample, FromSample};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::{Sample, SampleFormat as SymphoniaSampleFormat};

use crate::buffer::{Frame, PlanesMut};
use crate::decode::{Codec, DecodeStatus, Decoder, PacketSlice, PacketSource};
use crate::error::{Result, StreamError};
use crate::format::{AudioFormat, ChannelLayout, SampleFormat, SampleType};

static INIT: Once = Once::new();

/// Prepare the codec and format registries. Safe to call any number of times.
pub fn init() {
    INIT.call_once(|| {
        let _ = symphonia::default::get_probe();
        let _ = symphonia::default::get_codecs();
        tracing::debug!("symphonia registries ready");
    });
}

/// Decoder stage produced by [`Container::open_audio_stream`].
pub type FileDecoder = Decoder<Demuxer, SymphoniaCodec>;

/// An opened, probed media container.
pub struct Container {
    reader: Box<dyn FormatReader>,
}

/// Open the file at `path` and probe its container format.
pub fn open_file(path: impl AsRef<Path>) -> Result<Container> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    Container::open_media_source(Box::new(file), hint)
}

impl Container {
    /// Probe an arbitrary Symphonia [`MediaSource`] (seekable or not).
    pub fn open_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Container> {
        init();
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        Ok(Container {
            reader: probed.format,
        })
    }

    /// Bind a decoder to the best audio track and return it as a sample source.
    pub fn open_audio_stream(self) -> Result<FileDecoder> {
        let track = best_audio_track(self.reader.tracks(), self.reader.default_track())
            .ok_or_else(|| anyhow!("No audio track"))?;
        let track_id = track.id;
        let codec = SymphoniaCodec::new(&track.codec_params)?;
        tracing::debug!(track_id, "audio track selected");
        Ok(Decoder::new(
            Demuxer {
                reader: self.reader,
                track_id,
            },
            codec,
        ))
    }
}

/// The default track when it carries audio, else the first track that does.
fn best_audio_track<'a>(tracks: &'a [Track], default: Option<&'a Track>) -> Option<&'a Track> {
    let is_audio = |t: &&Track| {
        t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some()
    };
    default.filter(is_audio).or_else(|| tracks.iter().find(is_audio))
}

/// Packets of one track of a container.
pub struct Demuxer {
    reader: Box<dyn FormatReader>,
    track_id: u32,
}

impl PacketSource for Demuxer {
    fn next_packet(&mut self) -> Result<Packet> {
        loop {
            let packet = self.reader.next_packet()?;
            if packet.track_id() == self.track_id {
                return Ok(packet);
            }
        }
    }
}

/// Planar storage the stream described by `params` decodes to.
///
/// Uses the declared sample format when there is one. Readers that leave it unset (integer
/// PCM in WAVE/AIFF, FLAC) declare a bit width instead; lossy codecs declare neither and
/// decode to `f32`.
pub fn storage_for(params: &CodecParameters) -> SampleFormat {
    use SymphoniaSampleFormat as S;
    let sample_type = match params.sample_format {
        Some(S::U8) => SampleType::U8,
        Some(S::S8 | S::S16) => SampleType::S16,
        Some(S::U16 | S::U24 | S::S24 | S::U32 | S::S32) => SampleType::S32,
        Some(S::F64) => SampleType::F64,
        Some(S::F32) => SampleType::F32,
        None => declared_width(params),
    };
    SampleFormat::from_type(sample_type, true)
}

fn declared_width(params: &CodecParameters) -> SampleType {
    match params.codec {
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F32LE_PLANAR
        | CODEC_TYPE_PCM_F32BE_PLANAR => return SampleType::F32,
        CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE | CODEC_TYPE_PCM_F64LE_PLANAR
        | CODEC_TYPE_PCM_F64BE_PLANAR => return SampleType::F64,
        CODEC_TYPE_PCM_ALAW | CODEC_TYPE_PCM_MULAW => return SampleType::S16,
        _ => {}
    }
    match params.bits_per_sample {
        Some(1..=8) => SampleType::U8,
        Some(9..=16) => SampleType::S16,
        Some(_) => SampleType::S32,
        None => SampleType::F32,
    }
}

/// Symphonia decoder adapted to the [`Codec`] interface.
pub struct SymphoniaCodec {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    format: AudioFormat,
}

impl SymphoniaCodec {
    pub fn new(params: &CodecParameters) -> Result<Self> {
        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let channels = params.channels.ok_or_else(|| anyhow!("Unknown channels"))?;
        let format = AudioFormat::new(
            rate,
            storage_for(params),
            ChannelLayout::from(channels),
        );
        let decoder = symphonia::default::get_codecs().make(params, &DecoderOptions::default())?;
        Ok(Self { decoder, format })
    }
}

impl Codec for SymphoniaCodec {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn decode(&mut self, input: Option<PacketSlice<'_>>, frame: &mut Frame) -> Result<DecodeStatus> {
        // Symphonia decoders keep no frames back, so a drain request never yields one.
        let Some(slice) = input else {
            return Ok(DecodeStatus::default());
        };
        let data = slice.data();
        if data.is_empty() {
            return Ok(DecodeStatus::default());
        }

        let decoded = if slice.offset == 0 {
            self.decoder.decode(slice.packet)
        } else {
            let p = slice.packet;
            let rest = Packet::new_from_slice(p.track_id(), p.ts(), p.dur(), data);
            self.decoder.decode(&rest)
        };
        let decoded = match decoded {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!(error = msg, "skipping undecodable packet");
                return Ok(DecodeStatus {
                    consumed: data.len(),
                    got_frame: false,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(DecodeStatus {
                consumed: data.len(),
                got_frame: false,
            });
        }
        let channels = decoded.spec().channels.count();
        if channels != self.format.num_channels() {
            return Err(StreamError::upstream(format!(
                "decoded {channels} channels, stream declares {}",
                self.format.num_channels()
            )));
        }

        let mut out = frame.prepare(frames)?;
        match self.format.storage.sample_type() {
            Some(SampleType::U8) => copy_decoded::<u8>(decoded, &mut out)?,
            Some(SampleType::S16) => copy_decoded::<i16>(decoded, &mut out)?,
            Some(SampleType::S32) => copy_decoded::<i32>(decoded, &mut out)?,
            Some(SampleType::F32) => copy_decoded::<f32>(decoded, &mut out)?,
            Some(SampleType::F64) => copy_decoded::<f64>(decoded, &mut out)?,
            None => return Err(StreamError::upstream("stream has no sample storage")),
        }
        Ok(DecodeStatus {
            consumed: data.len(),
            got_frame: true,
        })
    }
}

/// Convert a decoded buffer of any Symphonia sample type into planar `T` planes.
fn copy_decoded<T>(decoded: AudioBufferRef<'_>, out: &mut PlanesMut<'_>) -> Result<()>
where
    T: ConvertibleSample + Pod,
{
    match decoded {
        AudioBufferRef::U8(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::U16(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::U24(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::U32(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::S8(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::S16(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::S24(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::S32(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::F32(buf) => copy_planes::<_, T>(&*buf, out),
        AudioBufferRef::F64(buf) => copy_planes::<_, T>(&*buf, out),
    }
}

fn copy_planes<F, T>(src: &AudioBuffer<F>, out: &mut PlanesMut<'_>) -> Result<()>
where
    F: Sample,
    T: FromSample<F> + Pod,
{
    for ch in 0..out.count() {
        let dst = out.plane_as_mut::<T>(ch)?;
        for (d, &s) in dst.iter_mut().zip(src.chan(ch)) {
            *d = T::from_sample(s);
        }
    }
    Ok(())
}
