use serde::{Deserialize, Serialize};

use crate::algorithm::WindowType;
use crate::error::Result;
use crate::fbank::FbankOptions;
use crate::feature::FeatureKind;
use crate::frame_source::FrameOptions;
use crate::mel_banks::{MelBankOptions, MelNorm};
use crate::mfcc::MfccOptions;
use crate::whisper::WhisperOptions;

const MFCC_NUM_BINS: usize = 23;
const MFCC_HIGH_FREQ: f32 = -200.0;

/// One configuration structure for every feature variant.
///
/// Variant and window names are kept as strings here and resolved when a
/// session is created, so building options never fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
  pub dither: f32,
  /// Seed for the dither noise; a fresh random seed is used when unset.
  pub dither_seed: Option<u64>,
  pub snip_edges: bool,
  pub sample_rate: f32,
  pub num_bins: usize,
  pub num_ceps: usize,
  #[serde(alias = "frame_shift")]
  pub frame_shift_ms: f32,
  #[serde(alias = "frame_length")]
  pub frame_length_ms: f32,
  pub energy_floor: f32,
  pub debug_mel: bool,
  pub window_type: String,
  pub feature_type: String,

  pub low_freq: f32,
  /// Defaults to the Nyquist frequency for fbank and 200 Hz below it for mfcc.
  pub high_freq: Option<f32>,
  pub vtln_low: f32,
  pub vtln_high: f32,
  pub vtln_warp: f32,
  pub htk_compat: bool,
  pub htk_mode: bool,
  pub is_librosa: bool,
  pub use_slaney_mel_scale: bool,
  pub floor_to_int_bin: bool,
  /// Only consulted by the librosa-style construction.
  pub norm: Option<String>,
  /// Defaults to false for fbank and true for mfcc.
  pub use_energy: Option<bool>,
  pub use_log_fbank: bool,
  pub use_power: bool,
  pub cepstral_lifter: f32,
}

impl Default for FeatureOptions {
  fn default() -> Self {
    Self {
      dither: 1.0,
      dither_seed: None,
      snip_edges: true,
      sample_rate: 16000.0,
      num_bins: 25,
      num_ceps: 13,
      frame_shift_ms: 10.0,
      frame_length_ms: 25.0,
      energy_floor: 0.0,
      debug_mel: false,
      window_type: "povey".to_string(),
      feature_type: "fbank".to_string(),
      low_freq: 20.0,
      high_freq: None,
      vtln_low: 100.0,
      vtln_high: -500.0,
      vtln_warp: 1.0,
      htk_compat: false,
      htk_mode: false,
      is_librosa: false,
      use_slaney_mel_scale: true,
      floor_to_int_bin: false,
      norm: Some("slaney".to_string()),
      use_energy: None,
      use_log_fbank: true,
      use_power: true,
      cepstral_lifter: 22.0,
    }
  }
}

impl FeatureOptions {
  /// Builds options from the shared boundary fields; everything else keeps its default.
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    dither: f32,
    snip_edges: bool,
    sample_rate: f32,
    num_bins: usize,
    num_ceps: usize,
    frame_shift_ms: f32,
    frame_length_ms: f32,
    energy_floor: f32,
    debug_mel: bool,
    window_type: &str,
    feature_type: &str,
  ) -> Self {
    Self {
      dither,
      snip_edges,
      sample_rate,
      num_bins,
      num_ceps,
      frame_shift_ms,
      frame_length_ms,
      energy_floor,
      debug_mel,
      window_type: window_type.to_string(),
      feature_type: feature_type.to_string(),
      ..Default::default()
    }
  }

  pub fn from_json(json: &str) -> Result<Self> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn kind(&self) -> Result<FeatureKind> {
    self.feature_type.parse()
  }

  pub fn frame_options(&self) -> Result<FrameOptions> {
    Ok(FrameOptions {
      samp_freq: self.sample_rate,
      frame_shift_ms: self.frame_shift_ms,
      frame_length_ms: self.frame_length_ms,
      dither: self.dither,
      window_type: self.window_type.parse::<WindowType>()?,
      snip_edges: self.snip_edges,
      ..Default::default()
    })
  }

  fn mel_options(&self, num_bins: usize, default_high_freq: f32) -> Result<MelBankOptions> {
    let norm = self
      .norm
      .as_deref()
      .filter(|n| !n.is_empty())
      .map(str::parse::<MelNorm>)
      .transpose()?;
    Ok(MelBankOptions {
      num_bins,
      low_freq: self.low_freq,
      high_freq: self.high_freq.unwrap_or(default_high_freq),
      vtln_low: self.vtln_low,
      vtln_high: self.vtln_high,
      debug_mel: self.debug_mel,
      htk_mode: self.htk_mode,
      is_librosa: self.is_librosa,
      use_slaney_mel_scale: self.use_slaney_mel_scale,
      floor_to_int_bin: self.floor_to_int_bin,
      norm,
    })
  }

  pub fn fbank_options(&self) -> Result<FbankOptions> {
    Ok(FbankOptions {
      frame_opts: self.frame_options()?,
      mel_opts: self.mel_options(self.num_bins, 0.0)?,
      use_energy: self.use_energy.unwrap_or(false),
      energy_floor: self.energy_floor,
      htk_compat: self.htk_compat,
      use_log_fbank: self.use_log_fbank,
      use_power: self.use_power,
      ..Default::default()
    })
  }

  /// MFCC options; `num_bins == 0` selects the usual 23 bins.
  pub fn mfcc_options(&self) -> Result<MfccOptions> {
    let num_bins = if self.num_bins == 0 {
      MFCC_NUM_BINS
    } else {
      self.num_bins
    };
    Ok(MfccOptions {
      frame_opts: self.frame_options()?,
      mel_opts: self.mel_options(num_bins, MFCC_HIGH_FREQ)?,
      num_ceps: self.num_ceps,
      use_energy: self.use_energy.unwrap_or(true),
      energy_floor: self.energy_floor,
      cepstral_lifter: self.cepstral_lifter,
      htk_compat: self.htk_compat,
      ..Default::default()
    })
  }

  /// Whisper-style options; only the sample rate and bin count carry over.
  pub fn whisper_options(&self) -> WhisperOptions {
    WhisperOptions::new(self.sample_rate, self.num_bins)
  }
}
