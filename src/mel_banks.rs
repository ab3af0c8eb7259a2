//! Triangular Mel filter bank.
//!
//! Two construction conventions are supported. The default one places the
//! triangles in the Mel domain and evaluates every FFT bin through the Mel
//! scale, optionally VTLN-warped. The librosa-style one converts the
//! breakpoints back to Hz first, can snap them to integer FFT bins, and can
//! apply Slaney area normalization.
//!
//! Either way each bin is stored sparsely as the first FFT index with a
//! non-zero weight plus the contiguous run of weights from there.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{FbankError, Result};
use crate::frame_source::FrameOptions;
use crate::mel_scale::{to_hz, to_mel, vtln_warp_mel};

/// Per-bin weight normalization for the librosa-style construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelNorm {
  /// Scale each triangle by `2 / (right_hz - left_hz)`.
  Slaney,
}

impl FromStr for MelNorm {
  type Err = FbankError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "slaney" => Ok(MelNorm::Slaney),
      other => Err(FbankError::UnknownNorm(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelBankOptions {
  pub num_bins: usize,
  pub low_freq: f32,
  /// Values `<= 0` are taken relative to the Nyquist frequency.
  pub high_freq: f32,
  pub vtln_low: f32,
  /// Values `< 0` are taken relative to the Nyquist frequency.
  pub vtln_high: f32,
  pub debug_mel: bool,
  /// Reproduces HTK quirks: bin 0 loses its first weight when `low_freq`
  /// is non-zero, and energies are floored at 1.0.
  pub htk_mode: bool,
  pub is_librosa: bool,
  pub use_slaney_mel_scale: bool,
  pub floor_to_int_bin: bool,
  pub norm: Option<MelNorm>,
}

impl Default for MelBankOptions {
  fn default() -> Self {
    Self {
      num_bins: 25,
      low_freq: 20.0,
      high_freq: 0.0,
      vtln_low: 100.0,
      vtln_high: -500.0,
      debug_mel: false,
      htk_mode: false,
      is_librosa: false,
      use_slaney_mel_scale: true,
      floor_to_int_bin: false,
      norm: None,
    }
  }
}

/// Resolved frequency bounds for a given sample rate.
struct Bounds {
  low_freq: f32,
  high_freq: f32,
  nyquist: f32,
}

impl MelBankOptions {
  fn bounds(&self, sample_freq: f32) -> Result<Bounds> {
    let nyquist = 0.5 * sample_freq;
    let low_freq = self.low_freq;
    let high_freq = if self.high_freq > 0.0 {
      self.high_freq
    } else {
      nyquist + self.high_freq
    };

    if low_freq < 0.0
      || low_freq >= nyquist
      || high_freq <= 0.0
      || high_freq > nyquist
      || high_freq <= low_freq
    {
      return Err(FbankError::InvalidFrequencyRange {
        low_freq,
        high_freq,
        nyquist,
      });
    }
    Ok(Bounds {
      low_freq,
      high_freq,
      nyquist,
    })
  }
}

#[derive(Debug, Clone)]
pub struct MelBanks {
  bins: Vec<(usize, Vec<f32>)>,
  debug: bool,
  htk_mode: bool,
}

impl MelBanks {
  /// Builds the bank for `opts` on the FFT resolution implied by `frame_opts`.
  pub fn new(
    opts: &MelBankOptions,
    frame_opts: &FrameOptions,
    vtln_warp_factor: f32,
  ) -> Result<Self> {
    if opts.num_bins < 3 {
      return Err(FbankError::TooFewBins {
        num_bins: opts.num_bins,
      });
    }
    let window_length_padded = frame_opts.padded_window_size();
    if window_length_padded % 2 != 0 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "padded window size {window_length_padded} must be even"
      )));
    }

    let bins = if opts.is_librosa {
      librosa_bins(opts, frame_opts)?
    } else {
      kaldi_bins(opts, frame_opts, vtln_warp_factor)?
    };

    let banks = Self {
      bins,
      debug: opts.debug_mel,
      htk_mode: opts.htk_mode,
    };
    if banks.debug {
      banks.log_bins();
    }
    Ok(banks)
  }

  /// Builds the sparse form of a dense row-major `num_rows x num_cols` matrix.
  pub fn from_weights(weights: &[f32], num_rows: usize, num_cols: usize) -> Result<Self> {
    let mut bins = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
      let start = row * num_cols;
      let this_bin = weights
        .get(start..start + num_cols)
        .ok_or(FbankError::InvalidWeights { row })?;
      let (first, weights) = sparse_run(this_bin).ok_or(FbankError::InvalidWeights { row })?;
      bins.push((first, weights));
    }
    Ok(Self {
      bins,
      debug: false,
      htk_mode: false,
    })
  }

  pub fn num_bins(&self) -> usize {
    self.bins.len()
  }

  /// `(first_fft_index, weights)` for each bin.
  pub fn bins(&self) -> &[(usize, Vec<f32>)] {
    &self.bins
  }

  /// Writes one energy per bin into `out`.
  ///
  /// Fails if `power_spectrum` does not cover every FFT index the bank uses.
  pub fn compute(&self, power_spectrum: &[f32], out: &mut [f32]) -> Result<()> {
    if out.len() != self.bins.len() {
      return Err(FbankError::OutputSizeMismatch {
        len: out.len(),
        expected: self.bins.len(),
      });
    }
    let bins = self.bins.iter().zip(out.iter_mut()).enumerate();
    for (bin, ((offset, weights), energy_out)) in bins {
      let end = offset + weights.len();
      let spectrum = power_spectrum
        .get(*offset..end)
        .ok_or(FbankError::SpectrumTooShort {
          len: power_spectrum.len(),
          needed: end,
        })?;
      let mut energy: f32 = weights.iter().zip(spectrum).map(|(w, p)| w * p).sum();

      if self.htk_mode && energy < 1.0 {
        energy = 1.0;
      }
      if !energy.is_finite() {
        return Err(FbankError::NonFiniteEnergy { bin, value: energy });
      }
      *energy_out = energy;
    }

    if self.debug {
      log::debug!("MEL BANKS: {out:?}");
    }
    Ok(())
  }

  fn log_bins(&self) {
    for (i, (offset, weights)) in self.bins.iter().enumerate() {
      log::info!("bin {i}, offset = {offset}, vec = {weights:?}");
    }
  }
}

fn sparse_run(this_bin: &[f32]) -> Option<(usize, Vec<f32>)> {
  let first = this_bin.iter().position(|&w| w != 0.0)?;
  let last = this_bin.iter().rposition(|&w| w != 0.0)?;
  Some((first, this_bin[first..=last].to_vec()))
}

#[inline]
fn triangle(x: f32, left: f32, center: f32, right: f32) -> f32 {
  if x <= center {
    (x - left) / (center - left)
  } else {
    (right - x) / (right - center)
  }
}

fn kaldi_bins(
  opts: &MelBankOptions,
  frame_opts: &FrameOptions,
  vtln_warp_factor: f32,
) -> Result<Vec<(usize, Vec<f32>)>> {
  let Bounds {
    low_freq,
    high_freq,
    nyquist,
  } = opts.bounds(frame_opts.samp_freq)?;

  let num_bins = opts.num_bins;
  let window_length_padded = frame_opts.padded_window_size();
  let num_fft_bins = window_length_padded / 2;
  let fft_bin_width = frame_opts.samp_freq / window_length_padded as f32;

  let mel_low_freq = to_mel(low_freq, false);
  let mel_high_freq = to_mel(high_freq, false);
  // num_bins + 1 because the outermost triangles spread past the centers
  let mel_freq_delta = (mel_high_freq - mel_low_freq) / (num_bins + 1) as f32;

  let vtln_low = opts.vtln_low;
  let vtln_high = if opts.vtln_high < 0.0 {
    opts.vtln_high + nyquist
  } else {
    opts.vtln_high
  };
  let warping = vtln_warp_factor != 1.0;

  if warping
    && (vtln_low < 0.0
      || vtln_low <= low_freq
      || vtln_low >= high_freq
      || vtln_high <= 0.0
      || vtln_high >= high_freq
      || vtln_high <= vtln_low)
  {
    return Err(FbankError::InvalidVtlnRange {
      vtln_low,
      vtln_high,
      low_freq,
      high_freq,
    });
  }

  let warp = |mel: f32| -> Result<f32> {
    if warping {
      vtln_warp_mel(vtln_low, vtln_high, low_freq, high_freq, vtln_warp_factor, mel)
    } else {
      Ok(mel)
    }
  };

  let fft_mels: Vec<f32> = (0..num_fft_bins)
    .map(|i| to_mel(fft_bin_width * i as f32, false))
    .collect();

  let mut bins = Vec::with_capacity(num_bins);
  let mut this_bin = vec![0.0f32; num_fft_bins];
  for bin in 0..num_bins {
    let left_mel = warp(mel_low_freq + bin as f32 * mel_freq_delta)?;
    let center_mel = warp(mel_low_freq + (bin + 1) as f32 * mel_freq_delta)?;
    let right_mel = warp(mel_low_freq + (bin + 2) as f32 * mel_freq_delta)?;

    this_bin.iter_mut().for_each(|w| *w = 0.0);
    for (w, &mel) in this_bin.iter_mut().zip(&fft_mels) {
      if mel > left_mel && mel < right_mel {
        *w = triangle(mel, left_mel, center_mel, right_mel);
      }
    }

    let (first, mut weights) = sparse_run(&this_bin).ok_or(FbankError::EmptyBin { bin })?;

    if opts.htk_mode && bin == 0 && mel_low_freq != 0.0 {
      weights[0] = 0.0;
    }
    bins.push((first, weights));
  }
  Ok(bins)
}

fn librosa_bins(
  opts: &MelBankOptions,
  frame_opts: &FrameOptions,
) -> Result<Vec<(usize, Vec<f32>)>> {
  let Bounds {
    low_freq,
    high_freq,
    ..
  } = opts.bounds(frame_opts.samp_freq)?;

  let num_bins = opts.num_bins;
  let sample_freq = frame_opts.samp_freq;
  let window_length_padded = frame_opts.padded_window_size();
  let num_fft_bins = window_length_padded / 2;
  let fft_bin_width = sample_freq / window_length_padded as f32;
  let slaney = opts.use_slaney_mel_scale;

  let mel_low_freq = to_mel(low_freq, slaney);
  let mel_high_freq = to_mel(high_freq, slaney);
  let mel_freq_delta = (mel_high_freq - mel_low_freq) / (num_bins + 1) as f32;

  // librosa includes the Nyquist bin, hence num_fft_bins + 1
  let fft_freqs: Vec<f32> = (0..=num_fft_bins)
    .map(|i| {
      if opts.floor_to_int_bin {
        i as f32
      } else {
        fft_bin_width * i as f32
      }
    })
    .collect();
  let to_bin_units = (window_length_padded as f32 + 1.0) / sample_freq;

  let mut bins = Vec::with_capacity(num_bins);
  let mut this_bin = vec![0.0f32; num_fft_bins + 1];
  for bin in 0..num_bins {
    let mut left_hz = to_hz(mel_low_freq + bin as f32 * mel_freq_delta, slaney);
    let mut center_hz = to_hz(mel_low_freq + (bin + 1) as f32 * mel_freq_delta, slaney);
    let mut right_hz = to_hz(mel_low_freq + (bin + 2) as f32 * mel_freq_delta, slaney);

    if opts.floor_to_int_bin {
      left_hz = (left_hz * to_bin_units).trunc();
      center_hz = (center_hz * to_bin_units).trunc();
      right_hz = (right_hz * to_bin_units).trunc();
    }

    this_bin.iter_mut().for_each(|w| *w = 0.0);
    for (w, &hz) in this_bin.iter_mut().zip(&fft_freqs) {
      if hz > left_hz && hz < right_hz {
        let mut weight = triangle(hz, left_hz, center_hz, right_hz);
        if opts.norm == Some(MelNorm::Slaney) {
          weight *= 2.0 / (right_hz - left_hz);
        }
        *w = weight;
      }
    }

    let (first, weights) = sparse_run(&this_bin).ok_or(FbankError::EmptyBin { bin })?;
    bins.push((first, weights));
  }
  Ok(bins)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::whisper::WhisperOptions;

  fn frame_opts() -> FrameOptions {
    FrameOptions {
      dither: 0.0,
      ..Default::default()
    }
  }

  fn mel_opts(num_bins: usize) -> MelBankOptions {
    MelBankOptions {
      num_bins,
      ..Default::default()
    }
  }

  #[test]
  fn builds_exactly_num_bins_non_empty_bins() {
    for num_bins in [3, 23, 25, 40, 80] {
      let banks = MelBanks::new(&mel_opts(num_bins), &frame_opts(), 1.0).unwrap();
      assert_eq!(banks.num_bins(), num_bins);
      for (offset, weights) in banks.bins() {
        assert!(!weights.is_empty());
        assert!(offset + weights.len() <= 256);
        assert!(weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
      }
    }
  }

  #[test]
  fn bins_move_up_in_frequency() {
    let banks = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    let offsets: Vec<usize> = banks.bins().iter().map(|(o, _)| *o).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
  }

  #[test]
  fn too_many_bins_fails_instead_of_truncating() {
    let err = MelBanks::new(&mel_opts(200), &frame_opts(), 1.0).unwrap_err();
    assert!(matches!(err, FbankError::EmptyBin { .. }));
  }

  #[test]
  fn too_few_bins_fails() {
    let err = MelBanks::new(&mel_opts(2), &frame_opts(), 1.0).unwrap_err();
    assert!(matches!(err, FbankError::TooFewBins { num_bins: 2 }));
  }

  #[test]
  fn bad_frequency_bounds_fail() {
    let opts = MelBankOptions {
      low_freq: 9000.0,
      ..mel_opts(23)
    };
    assert!(matches!(
      MelBanks::new(&opts, &frame_opts(), 1.0),
      Err(FbankError::InvalidFrequencyRange { .. })
    ));

    let opts = MelBankOptions {
      low_freq: 4000.0,
      high_freq: 3000.0,
      ..mel_opts(23)
    };
    assert!(matches!(
      MelBanks::new(&opts, &frame_opts(), 1.0),
      Err(FbankError::InvalidFrequencyRange { .. })
    ));
  }

  #[test]
  fn negative_high_freq_is_relative_to_nyquist() {
    let opts = MelBankOptions {
      high_freq: -400.0,
      ..mel_opts(23)
    };
    let banks = MelBanks::new(&opts, &frame_opts(), 1.0).unwrap();
    let (offset, weights) = banks.bins().last().unwrap();
    // 7600 Hz at 31.25 Hz per bin
    assert!(offset + weights.len() <= 244);
  }

  #[test]
  fn vtln_range_is_checked_only_when_warping() {
    let opts = MelBankOptions {
      vtln_low: 10.0,
      ..mel_opts(23)
    };
    assert!(MelBanks::new(&opts, &frame_opts(), 1.0).is_ok());
    assert!(matches!(
      MelBanks::new(&opts, &frame_opts(), 1.1),
      Err(FbankError::InvalidVtlnRange { .. })
    ));
  }

  #[test]
  fn warped_bank_differs_but_keeps_its_shape() {
    let plain = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    let warped = MelBanks::new(&mel_opts(23), &frame_opts(), 0.9).unwrap();
    assert_eq!(warped.num_bins(), 23);
    assert_ne!(plain.bins()[10], warped.bins()[10]);
  }

  #[test]
  fn zero_spectrum_gives_zero_energies() {
    let banks = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    let mut out = vec![f32::NAN; 23];
    banks.compute(&[0.0; 257], &mut out).unwrap();
    assert!(out.iter().all(|&e| e == 0.0));
  }

  #[test]
  fn htk_mode_floors_energies_and_drops_first_weight() {
    let opts = MelBankOptions {
      htk_mode: true,
      ..mel_opts(23)
    };
    let banks = MelBanks::new(&opts, &frame_opts(), 1.0).unwrap();
    assert_eq!(banks.bins()[0].1[0], 0.0);

    let mut out = vec![0.0; 23];
    banks.compute(&[0.0; 257], &mut out).unwrap();
    assert!(out.iter().all(|&e| e == 1.0));

    let plain = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    assert_ne!(plain.bins()[0].1[0], 0.0);
  }

  #[test]
  fn non_finite_energy_is_an_error() {
    let banks = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    let mut spectrum = vec![0.0; 257];
    spectrum[5] = f32::NAN;
    let mut out = vec![0.0; 23];
    let err = banks.compute(&spectrum, &mut out).unwrap_err();
    assert!(err.is_internal());
  }

  #[test]
  fn librosa_slaney_norm_scales_weights() {
    let frame = FrameOptions {
      round_to_power_of_two: false,
      ..frame_opts()
    };
    let base = MelBankOptions {
      num_bins: 80,
      low_freq: 0.0,
      is_librosa: true,
      ..Default::default()
    };
    let plain = MelBanks::new(&base, &frame, 1.0).unwrap();
    let normed = MelBanks::new(
      &MelBankOptions {
        norm: Some(MelNorm::Slaney),
        ..base.clone()
      },
      &frame,
      1.0,
    )
    .unwrap();

    assert_eq!(plain.num_bins(), 80);
    let (offset, weights) = plain.bins().last().unwrap();
    assert!(offset + weights.len() <= 201);
    for ((o1, w1), (o2, w2)) in plain.bins().iter().zip(normed.bins()) {
      assert_eq!(o1, o2);
      let peak1 = w1.iter().cloned().fold(0.0, f32::max);
      let peak2 = w2.iter().cloned().fold(0.0, f32::max);
      assert!(peak2 < peak1);
    }
  }

  #[test]
  fn from_weights_keeps_the_non_zero_run() {
    let weights = [0.0, 0.5, 1.0, 0.0, 0.0, 0.0, 0.0, 0.2];
    let banks = MelBanks::from_weights(&weights, 2, 4).unwrap();
    assert_eq!(banks.bins()[0], (1, vec![0.5, 1.0]));
    assert_eq!(banks.bins()[1], (3, vec![0.2]));

    let mut out = vec![0.0; 2];
    banks.compute(&[1.0, 2.0, 3.0, 4.0], &mut out).unwrap();
    assert_eq!(out, vec![4.0, 0.8]);
  }

  #[test]
  fn from_weights_rejects_empty_rows() {
    let weights = [0.0, 1.0, 0.0, 0.0];
    assert!(matches!(
      MelBanks::from_weights(&weights, 2, 2),
      Err(FbankError::InvalidWeights { row: 1 })
    ));
  }

  #[test]
  fn mel_norm_parses() {
    assert_eq!("slaney".parse::<MelNorm>().unwrap(), MelNorm::Slaney);
    assert!("area".parse::<MelNorm>().is_err());
  }

  #[test]
  fn output_must_hold_exactly_one_value_per_bin() {
    let banks = MelBanks::from_weights(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], 3, 2).unwrap();
    let mut short = vec![0.0; 2];
    assert!(matches!(
      banks.compute(&[1.0, 1.0], &mut short),
      Err(FbankError::OutputSizeMismatch {
        len: 2,
        expected: 3
      })
    ));
    let mut long = vec![0.0; 4];
    assert!(banks.compute(&[1.0, 1.0], &mut long).is_err());

    let mut out = vec![0.0; 3];
    banks.compute(&[1.0, 1.0], &mut out).unwrap();
    assert_eq!(out, vec![1.0, 1.0, 2.0]);
  }

  #[test]
  fn kaldi_first_bin_matches_reference_weights() {
    // 23 bins over 20..8000 Hz, 31.25 Hz per FFT bin
    let banks = MelBanks::new(&mel_opts(23), &frame_opts(), 1.0).unwrap();
    let (offset, weights) = &banks.bins()[0];
    assert_eq!(*offset, 1);
    assert_eq!(weights.len(), 5);
    let expected = [0.149_328, 0.552_378, 0.939_237, 0.688_845, 0.330_756];
    for (w, e) in weights.iter().zip(expected) {
      assert!((w - e).abs() < 1e-3, "{weights:?}");
    }
  }

  #[test]
  fn whisper_bank_first_bin_matches_reference_weight() {
    let opts = WhisperOptions::default();
    let banks = MelBanks::new(&opts.mel_opts(), &opts.frame_opts, 1.0).unwrap();
    assert_eq!(banks.num_bins(), 80);
    // triangle over 0..74.48 Hz at 40 Hz per bin, scaled by 2 / 74.48
    let (offset, weights) = &banks.bins()[0];
    assert_eq!(*offset, 1);
    assert_eq!(weights.len(), 1);
    assert!((weights[0] - 0.024_863).abs() < 1e-5, "{weights:?}");
  }

  #[test]
  fn floor_to_int_bin_snaps_breakpoints_to_fft_bins() {
    let opts = MelBankOptions {
      num_bins: 23,
      is_librosa: true,
      floor_to_int_bin: true,
      norm: Some(MelNorm::Slaney),
      ..Default::default()
    };
    let banks = MelBanks::new(&opts, &frame_opts(), 1.0).unwrap();
    // breakpoints 0.64, 4.64, 8.65 bin units floor to 0, 4, 8
    let (offset, weights) = &banks.bins()[0];
    assert_eq!(*offset, 1);
    let expected = [0.0625, 0.125, 0.1875, 0.25, 0.1875, 0.125, 0.0625];
    assert_eq!(weights.len(), expected.len());
    for (w, e) in weights.iter().zip(expected) {
      assert!((w - e).abs() < 1e-6, "{weights:?}");
    }
    assert_eq!(banks.bins()[1].0, 5);
  }
}
