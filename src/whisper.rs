use serde::{Deserialize, Serialize};

use crate::algorithm::WindowType;
use crate::error::Result;
use crate::frame_source::{FrameOptions, SpectrumFrame};
use crate::mel_banks::{MelBankOptions, MelBanks, MelNorm};

const LOG_FLOOR: f32 = 1e-10;

/// Simplified whisper-style log-Mel features.
///
/// Frame geometry is fixed: 25 ms periodic Hann windows every 10 ms with no
/// dither, pre-emphasis, DC removal or power-of-two padding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperOptions {
  pub frame_opts: FrameOptions,
  pub dim: usize,
}

impl Default for WhisperOptions {
  fn default() -> Self {
    Self::new(16000.0, 80)
  }
}

impl WhisperOptions {
  pub fn new(samp_freq: f32, dim: usize) -> Self {
    Self {
      frame_opts: FrameOptions {
        samp_freq,
        frame_shift_ms: 10.0,
        frame_length_ms: 25.0,
        dither: 0.0,
        preemph_coeff: 0.0,
        remove_dc_offset: false,
        window_type: WindowType::Hann,
        round_to_power_of_two: false,
        snip_edges: false,
        ..Default::default()
      },
      dim,
    }
  }

  pub fn mel_opts(&self) -> MelBankOptions {
    MelBankOptions {
      num_bins: self.dim,
      low_freq: 0.0,
      high_freq: 0.0,
      is_librosa: true,
      use_slaney_mel_scale: true,
      norm: Some(MelNorm::Slaney),
      ..Default::default()
    }
  }
}

pub struct WhisperComputer {
  opts: WhisperOptions,
  mel_banks: MelBanks,
}

impl WhisperComputer {
  pub fn new(opts: WhisperOptions) -> Result<Self> {
    let mel_banks = MelBanks::new(&opts.mel_opts(), &opts.frame_opts, 1.0)?;
    Ok(Self { opts, mel_banks })
  }

  pub fn options(&self) -> &WhisperOptions {
    &self.opts
  }

  pub fn dim(&self) -> usize {
    self.opts.dim
  }

  pub fn compute(&mut self, frame: SpectrumFrame<'_>, feature: &mut [f32]) -> Result<()> {
    let out = &mut feature[..self.opts.dim];
    self.mel_banks.compute(frame.power, out)?;
    for x in out.iter_mut() {
      *x = x.max(LOG_FLOOR).log10();
    }
    Ok(())
  }
}
