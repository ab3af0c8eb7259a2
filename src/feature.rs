use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FbankError, Result};
use crate::fbank::FbankComputer;
use crate::frame_source::{FrameOptions, SpectrumFrame};
use crate::mfcc::MfccComputer;
use crate::options::FeatureOptions;
use crate::whisper::WhisperComputer;

/// Feature variant a session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
  Fbank,
  Mfcc,
  Whisper,
}

impl FeatureKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      FeatureKind::Fbank => "fbank",
      FeatureKind::Mfcc => "mfcc",
      FeatureKind::Whisper => "whisper",
    }
  }
}

impl fmt::Display for FeatureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FeatureKind {
  type Err = FbankError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "fbank" => Ok(FeatureKind::Fbank),
      "mfcc" => Ok(FeatureKind::Mfcc),
      "whisper" | "whisper-style" => Ok(FeatureKind::Whisper),
      other => Err(FbankError::UnknownFeatureKind(other.to_string())),
    }
  }
}

/// Turns one power spectrum into one feature vector.
pub enum FeatureComputer {
  Fbank(FbankComputer),
  Mfcc(MfccComputer),
  Whisper(WhisperComputer),
}

impl FeatureComputer {
  /// Resolves the variant named in `opts` and builds its computer.
  pub fn new(opts: &FeatureOptions) -> Result<Self> {
    let computer = match opts.kind()? {
      FeatureKind::Fbank => Self::Fbank(FbankComputer::new(opts.fbank_options()?, opts.vtln_warp)?),
      FeatureKind::Mfcc => Self::Mfcc(MfccComputer::new(opts.mfcc_options()?, opts.vtln_warp)?),
      FeatureKind::Whisper => Self::Whisper(WhisperComputer::new(opts.whisper_options())?),
    };
    Ok(computer)
  }

  pub fn kind(&self) -> FeatureKind {
    match self {
      Self::Fbank(_) => FeatureKind::Fbank,
      Self::Mfcc(_) => FeatureKind::Mfcc,
      Self::Whisper(_) => FeatureKind::Whisper,
    }
  }

  pub fn frame_options(&self) -> &FrameOptions {
    match self {
      Self::Fbank(c) => &c.options().frame_opts,
      Self::Mfcc(c) => &c.options().frame_opts,
      Self::Whisper(c) => &c.options().frame_opts,
    }
  }

  pub fn dim(&self) -> usize {
    match self {
      Self::Fbank(c) => c.dim(),
      Self::Mfcc(c) => c.dim(),
      Self::Whisper(c) => c.dim(),
    }
  }

  pub fn compute(&mut self, frame: SpectrumFrame<'_>, feature: &mut [f32]) -> Result<()> {
    match self {
      Self::Fbank(c) => c.compute(frame, feature),
      Self::Mfcc(c) => c.compute(frame, feature),
      Self::Whisper(c) => c.compute(frame, feature),
    }
  }
}
