//! Pull-based audio decode and resample pipeline.
//!
//! ```text
//! reader (typed view) -> Resampled (optional) -> Decoder -> Symphonia codec/demuxer
//! ```
//!
//! Every stage implements [`SampleSource`]; each pull travels depth-first through the whole
//! chain on the caller's thread.

pub mod buffer;
pub mod config;
pub mod container;
pub mod convert;
pub mod decode;
pub mod error;
pub mod format;
pub mod reader;
pub mod resample;
pub mod source;

pub use buffer::Planes;
pub use config::ResampleConfig;
pub use container::{Container, init, open_file};
pub use error::{Result, StreamError};
pub use format::{AudioFormat, ChannelLayout, SampleFormat};
pub use reader::{PackedReader, PackedS16Reader, PlanarReader};
pub use resample::{Resampled, resample};
pub use source::SampleSource;
