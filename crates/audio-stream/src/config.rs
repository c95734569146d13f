/// Tuning parameters for the sample-rate converter.
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames fed to the resampler per processing call.
    ///
    /// Larger values reduce per-call overhead at the cost of latency.
    pub chunk_frames: usize,
    /// Length of the windowed sinc interpolation filter.
    pub sinc_len: usize,
    /// Number of intermediate points sampled between sinc filter taps.
    pub oversampling_factor: usize,
    /// Headroom for later ratio adjustments, relative to the initial ratio.
    pub max_relative_ratio: f64,
}

impl Default for ResampleConfig {
    /// Defaults tuned for transparent quality at moderate CPU cost.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            sinc_len: 128,
            oversampling_factor: 256,
            max_relative_ratio: 1.1,
        }
    }
}
