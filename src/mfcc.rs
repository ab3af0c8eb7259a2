use serde::{Deserialize, Serialize};
use std::f32::consts::SQRT_2;

use crate::algorithm;
use crate::error::{FbankError, Result};
use crate::fbank::log_energy_floor;
use crate::frame_source::{FrameOptions, SpectrumFrame};
use crate::mel_banks::{MelBankOptions, MelBanks};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccOptions {
  pub frame_opts: FrameOptions,
  pub mel_opts: MelBankOptions,
  /// Number of cepstra, C0 included.
  pub num_ceps: usize,
  /// Replace C0 with the frame log-energy.
  pub use_energy: bool,
  pub energy_floor: f32,
  pub raw_energy: bool,
  /// Lifter coefficient, 0 disables liftering.
  pub cepstral_lifter: f32,
  /// Move C0 to the end, HTK style.
  pub htk_compat: bool,
}

impl Default for MfccOptions {
  fn default() -> Self {
    Self {
      frame_opts: FrameOptions::default(),
      mel_opts: MelBankOptions {
        num_bins: 23,
        ..Default::default()
      },
      num_ceps: 13,
      use_energy: true,
      energy_floor: 0.0,
      raw_energy: true,
      cepstral_lifter: 22.0,
      htk_compat: false,
    }
  }
}

/// Mel-frequency cepstral coefficients.
pub struct MfccComputer {
  opts: MfccOptions,
  mel_banks: MelBanks,
  dct_matrix: Vec<f32>,
  lifter_coeffs: Option<Vec<f32>>,
  log_energy_floor: Option<f32>,
  mel_energies: Vec<f32>,
}

impl MfccComputer {
  pub fn new(opts: MfccOptions, vtln_warp: f32) -> Result<Self> {
    let num_bins = opts.mel_opts.num_bins;
    if opts.num_ceps > num_bins {
      return Err(FbankError::TooManyCeps {
        num_ceps: opts.num_ceps,
        num_bins,
      });
    }
    let mel_banks = MelBanks::new(&opts.mel_opts, &opts.frame_opts, vtln_warp)?;
    let lifter_coeffs = (opts.cepstral_lifter != 0.0)
      .then(|| algorithm::lifter_coeffs(opts.cepstral_lifter, opts.num_ceps));

    Ok(Self {
      mel_banks,
      dct_matrix: algorithm::dct_matrix(opts.num_ceps, num_bins),
      lifter_coeffs,
      log_energy_floor: log_energy_floor(opts.energy_floor),
      mel_energies: vec![0.0; num_bins],
      opts,
    })
  }

  pub fn options(&self) -> &MfccOptions {
    &self.opts
  }

  pub fn dim(&self) -> usize {
    self.opts.num_ceps
  }

  pub fn compute(&mut self, frame: SpectrumFrame<'_>, feature: &mut [f32]) -> Result<()> {
    let num_ceps = self.opts.num_ceps;

    // Mel -> log -> DCT -> lifter
    self.mel_banks.compute(frame.power, &mut self.mel_energies)?;
    for x in self.mel_energies.iter_mut() {
      *x = x.max(f32::EPSILON).ln();
    }
    let cepstrum = &mut feature[..num_ceps];
    algorithm::dct(&self.dct_matrix, &self.mel_energies, cepstrum);
    if let Some(coeffs) = &self.lifter_coeffs {
      for (c, w) in cepstrum.iter_mut().zip(coeffs) {
        *c *= w;
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
      cepstrum[0] = energy;
    }

    if self.opts.htk_compat {
      let mut energy = cepstrum[0];
      if !self.opts.use_energy {
        // scale C0 as HTK does
        energy *= SQRT_2;
      }
      cepstrum.rotate_left(1);
      cepstrum[num_ceps - 1] = energy;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(power: &[f32]) -> SpectrumFrame<'_> {
    SpectrumFrame {
      raw_log_energy: 5.0,
      log_energy: 4.0,
      power,
    }
  }

  #[test]
  fn c0_is_replaced_by_energy() {
    let mut c = MfccComputer::new(MfccOptions::default(), 1.0).unwrap();
    assert_eq!(c.dim(), 13);
    let mut out = vec![0.0; 13];
    c.compute(frame(&[1.0; 257]), &mut out).unwrap();
    assert_eq!(out[0], 5.0);
    assert!(out.iter().all(|x| x.is_finite()));
  }

  #[test]
  fn flat_log_spectrum_only_feeds_c0() {
    let opts = MfccOptions {
      use_energy: false,
      cepstral_lifter: 0.0,
      ..Default::default()
    };
    let mut c = MfccComputer::new(opts, 1.0).unwrap();
    let mut out = vec![0.0; 13];
    c.compute(frame(&[0.0; 257]), &mut out).unwrap();
    // every mel energy is ln(eps): C0 = sqrt(23) * ln(eps)
    let expected = 23f32.sqrt() * f32::EPSILON.ln();
    assert!((out[0] - expected).abs() < 1e-2);
    assert!(out[1..].iter().all(|x| x.abs() < 1e-3));
  }

  #[test]
  fn htk_compat_moves_c0_last() {
    let opts = MfccOptions {
      htk_compat: true,
      ..Default::default()
    };
    let mut c = MfccComputer::new(opts, 1.0).unwrap();
    let mut out = vec![0.0; 13];
    c.compute(frame(&[1.0; 257]), &mut out).unwrap();
    assert_eq!(out[12], 5.0);
  }

  #[test]
  fn more_ceps_than_bins_is_rejected() {
    let opts = MfccOptions {
      num_ceps: 30,
      ..Default::default()
    };
    assert!(matches!(
      MfccComputer::new(opts, 1.0),
      Err(FbankError::TooManyCeps { .. })
    ));
  }
}
