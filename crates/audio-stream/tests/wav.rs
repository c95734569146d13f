use std::io::Write;

use audio_stream::reader::PlanarReader;
use audio_stream::{
    AudioFormat, ChannelLayout, PackedS16Reader, ResampleConfig, SampleFormat, SampleSource,
    StreamError, open_file, resample,
};

const RATE: u32 = 8_000;
const FRAMES: usize = 3_000;

fn sample(frame: usize, channel: usize) -> i16 {
    let v = ((frame * 37) % 2_000) as i16 - 1_000;
    if channel == 0 { v } else { -v / 2 }
}

/// Minimal 16-bit PCM WAVE file with `channels` channels.
fn wav_bytes(channels: u16) -> Vec<u8> {
    let block_align = 2 * channels;
    let data_len = (FRAMES * block_align as usize) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&RATE.to_le_bytes());
    out.extend_from_slice(&(RATE * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for f in 0..FRAMES {
        for c in 0..usize::from(channels) {
            out.extend_from_slice(&sample(f, c).to_le_bytes());
        }
    }
    out
}

fn wav_file(channels: u16) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    file.write_all(&wav_bytes(channels)).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn decodes_pcm_wav_as_planar_s16() {
    let file = wav_file(2);
    let decoder = open_file(file.path()).unwrap().open_audio_stream().unwrap();
    assert_eq!(
        decoder.format(),
        AudioFormat::new(RATE, SampleFormat::PlanarS16, ChannelLayout::STEREO)
    );

    let mut reader = PlanarReader::<_, i16>::new(decoder).unwrap();
    let mut frame = 0;
    loop {
        match reader.read() {
            Ok(planes) => {
                let left = planes.channel(0).unwrap();
                let right = planes.channel(1).unwrap();
                for (i, (&l, &r)) in left.iter().zip(right).enumerate() {
                    assert_eq!(l, sample(frame + i, 0));
                    assert_eq!(r, sample(frame + i, 1));
                }
                frame += planes.frames();
            }
            Err(StreamError::EndOfStream) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(frame, FRAMES);
    assert!(reader.read().unwrap_err().is_end_of_stream());
    reader.close();
}

#[test]
fn interleaves_wav_without_changing_samples() {
    let file = wav_file(2);
    let decoder = open_file(file.path()).unwrap().open_audio_stream().unwrap();
    let target = AudioFormat::new(RATE, SampleFormat::PackedS16, ChannelLayout::STEREO);
    let stage = resample(decoder, target, &ResampleConfig::default()).unwrap();
    let mut reader = PackedS16Reader::new(stage).unwrap();

    let mut got = Vec::new();
    loop {
        match reader.read() {
            Ok(samples) => got.extend_from_slice(samples),
            Err(StreamError::EndOfStream) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let expected: Vec<i16> = (0..FRAMES)
        .flat_map(|f| [sample(f, 0), sample(f, 1)])
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn resamples_wav_to_mono_at_double_rate() {
    let file = wav_file(2);
    let decoder = open_file(file.path()).unwrap().open_audio_stream().unwrap();
    let target = AudioFormat::new(RATE * 2, SampleFormat::PackedF32, ChannelLayout::MONO);
    let mut stage = resample(decoder, target, &ResampleConfig::default()).unwrap();

    let mut frames = 0;
    loop {
        match stage.read_raw() {
            Ok(planes) => {
                assert!(planes.is_empty() || planes.count() == 1);
                frames += planes.frames();
            }
            Err(StreamError::EndOfStream) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(frames, FRAMES * 2);
    stage.close();
}

#[test]
fn mono_wav_at_its_own_format_is_passed_through() {
    let file = wav_file(1);
    let decoder = open_file(file.path()).unwrap().open_audio_stream().unwrap();
    let native = AudioFormat::new(RATE, SampleFormat::PlanarS16, ChannelLayout::MONO);
    assert_eq!(decoder.format(), native);

    let stage = resample(decoder, native, &ResampleConfig::default()).unwrap();
    assert!(stage.is_passthrough());
    let mut reader = PlanarReader::<_, i16>::new(stage).unwrap();
    let mut got = Vec::new();
    loop {
        match reader.read() {
            Ok(planes) => got.extend_from_slice(planes.channel(0).unwrap()),
            Err(StreamError::EndOfStream) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let expected: Vec<i16> = (0..FRAMES).map(|f| sample(f, 0)).collect();
    assert_eq!(got, expected);
}

#[test]
fn non_audio_file_fails_to_open() {
    let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    file.write_all(b"definitely not audio").unwrap();
    assert!(open_file(file.path()).is_err());
}
