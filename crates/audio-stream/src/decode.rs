//! Streaming audio decode stage.
//!
//! [`Decoder`] drives a packet source and a codec one step per pull:
//! - fetch a packet when the previous one is used up
//! - submit the unread part of it (or an empty drain request once packets run out)
//! - hand back the decoded frame, an empty result, or end-of-stream

use symphonia::core::formats::Packet;

use crate::buffer::{Frame, Planes};
use crate::error::{Result, StreamError};
use crate::format::AudioFormat;
use crate::source::SampleSource;

/// Supplier of encoded packets for one selected stream.
pub trait PacketSource {
    /// Next packet, or `Err(StreamError::EndOfStream)` once the stream has no more.
    fn next_packet(&mut self) -> Result<Packet>;
}

/// Unread tail of a packet submitted to a codec.
#[derive(Clone, Copy)]
pub struct PacketSlice<'a> {
    pub packet: &'a Packet,
    /// Bytes of `packet` already consumed by earlier submissions.
    pub offset: usize,
}

impl<'a> PacketSlice<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.packet.buf().get(self.offset..).unwrap_or_default()
    }
}

/// Outcome of one codec submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStatus {
    /// Bytes of the submitted data the codec used.
    pub consumed: usize,
    /// Whether `frame` now holds decoded samples.
    pub got_frame: bool,
}

/// A codec bound to one stream.
pub trait Codec {
    /// Format of the frames this codec writes.
    fn format(&self) -> AudioFormat;

    /// Decode from `input` into `frame`.
    ///
    /// `None` asks the codec to drain frames it is still holding.
    fn decode(&mut self, input: Option<PacketSlice<'_>>, frame: &mut Frame) -> Result<DecodeStatus>;
}

/// Presents a decoded elementary stream as a [`SampleSource`].
///
/// Fields drop in declaration order: the codec and its frame are released before the
/// packet source.
pub struct Decoder<P, C> {
    codec: C,
    frame: Frame,
    packets: P,
    packet: Option<Packet>,
    cursor: usize,
    packets_eof: bool,
    frames_eof: bool,
}

impl<P: PacketSource, C: Codec> Decoder<P, C> {
    pub fn new(packets: P, codec: C) -> Self {
        let format = codec.format();
        tracing::debug!(
            rate_hz = format.rate,
            storage = ?format.storage,
            channels = format.num_channels(),
            "decoder opened"
        );
        Self {
            codec,
            frame: Frame::new(format),
            packets,
            packet: None,
            cursor: 0,
            packets_eof: false,
            frames_eof: false,
        }
    }

    /// Bytes of the in-flight packet not yet consumed.
    fn remaining(&self) -> usize {
        self.packet
            .as_ref()
            .map_or(0, |p| p.buf().len().saturating_sub(self.cursor))
    }

    fn fetch_packet(&mut self) -> Result<()> {
        match self.packets.next_packet() {
            Ok(packet) => {
                self.packet = Some(packet);
                self.cursor = 0;
                Ok(())
            }
            Err(StreamError::EndOfStream) => {
                tracing::debug!("packet source exhausted, draining codec");
                self.packets_eof = true;
                self.packet = None;
                self.cursor = 0;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<P: PacketSource, C: Codec> SampleSource for Decoder<P, C> {
    fn format(&self) -> AudioFormat {
        self.codec.format()
    }

    /// Note: may return zero frames without being at end of stream.
    fn read_raw(&mut self) -> Result<Planes<'_>> {
        if self.frames_eof {
            return Err(StreamError::EndOfStream);
        }
        if self.remaining() == 0 && !self.packets_eof {
            self.fetch_packet()?;
        }

        let remaining = self.remaining();
        let input = self.packet.as_ref().map(|packet| PacketSlice {
            packet,
            offset: self.cursor,
        });
        let status = self.codec.decode(input, &mut self.frame)?;

        let consumed = if status.consumed > remaining {
            tracing::warn!(
                reported = status.consumed,
                remaining,
                "codec reported more bytes than submitted, clamping"
            );
            remaining
        } else {
            status.consumed
        };
        self.cursor += consumed;

        if status.got_frame {
            return self.frame.planes();
        }
        if self.packets_eof {
            self.frames_eof = true;
            return Err(StreamError::EndOfStream);
        }
        Ok(Planes::empty())
    }

    fn close(self) {
        tracing::debug!("decoder closed");
        drop(self);
    }
}
