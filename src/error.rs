use thiserror::Error;

/// Errors raised while configuring or driving a feature session.
///
/// All variants are fatal for the call that produced them. None of them are
/// transient: inputs are in-memory and deterministic, so retrying the same
/// call yields the same error.
#[derive(Debug, Error)]
pub enum FbankError {
  #[error("Must have at least 3 mel bins, got {num_bins}")]
  TooFewBins { num_bins: usize },

  #[error("Bad frequency bounds: low {low_freq}, high {high_freq}, nyquist {nyquist}")]
  InvalidFrequencyRange {
    low_freq: f32,
    high_freq: f32,
    nyquist: f32,
  },

  #[error("Bad VTLN range ({vtln_low}, {vtln_high}) for bounds ({low_freq}, {high_freq})")]
  InvalidVtlnRange {
    vtln_low: f32,
    vtln_high: f32,
    low_freq: f32,
    high_freq: f32,
  },

  /// The VTLN breakpoints fall outside `(low_freq, high_freq)` for the given warp factor.
  #[error(
    "VTLN cutoffs ({vtln_low_cutoff}, {vtln_high_cutoff}) with warp {warp_factor} \
     are not inside ({low_freq}, {high_freq})"
  )]
  InvalidVtlnCutoffs {
    vtln_low_cutoff: f32,
    vtln_high_cutoff: f32,
    low_freq: f32,
    high_freq: f32,
    warp_factor: f32,
  },

  #[error("Mel bin {bin} has no non-zero weights; too many bins for the spectrum resolution")]
  EmptyBin { bin: usize },

  #[error("Power spectrum has {len} bins but the mel bank reads up to {needed}")]
  SpectrumTooShort { len: usize, needed: usize },

  #[error("Output holds {len} values but the mel bank has {expected} bins")]
  OutputSizeMismatch { len: usize, expected: usize },

  #[error("Incorrect weight matrix: row {row} has no non-zero weights")]
  InvalidWeights { row: usize },

  /// A computed energy was NaN or infinite. This points at a bug upstream, not at user input.
  #[error("Mel bin {bin} produced a non-finite energy ({value})")]
  NonFiniteEnergy { bin: usize, value: f32 },

  #[error("Unknown feature type '{0}', expected one of: fbank, mfcc, whisper")]
  UnknownFeatureKind(String),

  #[error("Unknown window type '{0}'")]
  UnknownWindowType(String),

  #[error("Unsupported mel normalization '{0}'")]
  UnknownNorm(String),

  #[error("num_ceps ({num_ceps}) must not exceed num_bins ({num_bins})")]
  TooManyCeps { num_ceps: usize, num_bins: usize },

  #[error("Invalid frame options: {0}")]
  InvalidFrameOptions(String),

  #[error("Sample rate mismatch: expected {expected}, got {actual}")]
  SampleRateMismatch { expected: f32, actual: f32 },

  #[error("AcceptWaveform called after InputFinished")]
  InputAlreadyFinished,

  #[error("No frames ready, call accept_waveform first")]
  NoFramesReady,

  #[error("Frame {frame} is not available (buffered frames are {first}..{end})")]
  FrameUnavailable {
    frame: usize,
    first: usize,
    end: usize,
  },

  #[error("Last consumed frame {last_consumed} is beyond the {ready} frames ready")]
  ConsumedBeyondReady { last_consumed: usize, ready: usize },

  #[error("Invalid configuration: {0}")]
  InvalidConfig(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FbankError>;

impl FbankError {
  /// True for errors that indicate an internal inconsistency rather than caller misuse.
  pub fn is_internal(&self) -> bool {
    matches!(self, FbankError::NonFiniteEnergy { .. })
  }
}
