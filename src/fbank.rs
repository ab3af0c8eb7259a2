use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame_source::{FrameOptions, SpectrumFrame};
use crate::mel_banks::{MelBankOptions, MelBanks};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FbankOptions {
  pub frame_opts: FrameOptions,
  pub mel_opts: MelBankOptions,
  /// Add an extra dimension with the frame log-energy.
  pub use_energy: bool,
  pub energy_floor: f32,
  /// Take the energy before pre-emphasis and windowing.
  pub raw_energy: bool,
  /// Put the energy last instead of first.
  pub htk_compat: bool,
  pub use_log_fbank: bool,
  /// Use power rather than magnitude in the filter bank.
  pub use_power: bool,
}

impl Default for FbankOptions {
  fn default() -> Self {
    Self {
      frame_opts: FrameOptions::default(),
      mel_opts: MelBankOptions {
        num_bins: 23,
        ..Default::default()
      },
      use_energy: false,
      energy_floor: 0.0,
      raw_energy: true,
      htk_compat: false,
      use_log_fbank: true,
      use_power: true,
    }
  }
}

pub(crate) fn log_energy_floor(energy_floor: f32) -> Option<f32> {
  (energy_floor > 0.0).then(|| energy_floor.ln())
}

/// Log Mel filter bank energies.
pub struct FbankComputer {
  opts: FbankOptions,
  mel_banks: MelBanks,
  log_energy_floor: Option<f32>,
  magnitude: Vec<f32>,
}

impl FbankComputer {
  pub fn new(opts: FbankOptions, vtln_warp: f32) -> Result<Self> {
    let mel_banks = MelBanks::new(&opts.mel_opts, &opts.frame_opts, vtln_warp)?;
    Ok(Self {
      log_energy_floor: log_energy_floor(opts.energy_floor),
      mel_banks,
      magnitude: Vec::new(),
      opts,
    })
  }

  pub fn options(&self) -> &FbankOptions {
    &self.opts
  }

  pub fn dim(&self) -> usize {
    self.opts.mel_opts.num_bins + usize::from(self.opts.use_energy)
  }

  pub fn compute(&mut self, frame: SpectrumFrame<'_>, feature: &mut [f32]) -> Result<()> {
    let spectrum = if self.opts.use_power {
      frame.power
    } else {
      self.magnitude.clear();
      self.magnitude.extend(frame.power.iter().map(|p| p.sqrt()));
      &self.magnitude
    };

    let num_bins = self.opts.mel_opts.num_bins;
    let mel_offset = usize::from(self.opts.use_energy && !self.opts.htk_compat);
    let mel_out = &mut feature[mel_offset..mel_offset + num_bins];
    self.mel_banks.compute(spectrum, mel_out)?;

    if self.opts.use_log_fbank {
      for x in mel_out.iter_mut() {
        *x = x.max(f32::EPSILON).ln();
      }
    }

    if self.opts.use_energy {
      let mut energy = if self.opts.raw_energy {
        frame.raw_log_energy
      } else {
        frame.log_energy
      };
      if let Some(floor) = self.log_energy_floor {
        energy = energy.max(floor);
      }
      let energy_index = if self.opts.htk_compat { num_bins } else { 0 };
      feature[energy_index] = energy;
    }
    Ok(())
  }
}
