use rand::Rng;
use rand_distr::StandardNormal;
use rustfft::{num_complex::Complex32, Fft};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::str::FromStr;

use crate::error::FbankError;

/// Analysis window applied to each frame before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
  Hamming,
  Hanning,
  Povey,
  Rectangular,
  Sine,
  Blackman,
  /// Periodic Hann window, as used by whisper-style front ends.
  Hann,
}

impl WindowType {
  pub fn as_str(&self) -> &'static str {
    match self {
      WindowType::Hamming => "hamming",
      WindowType::Hanning => "hanning",
      WindowType::Povey => "povey",
      WindowType::Rectangular => "rectangular",
      WindowType::Sine => "sine",
      WindowType::Blackman => "blackman",
      WindowType::Hann => "hann",
    }
  }
}

impl FromStr for WindowType {
  type Err = FbankError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "hamming" => Ok(WindowType::Hamming),
      "hanning" => Ok(WindowType::Hanning),
      "povey" => Ok(WindowType::Povey),
      "rectangular" => Ok(WindowType::Rectangular),
      "sine" => Ok(WindowType::Sine),
      "blackman" => Ok(WindowType::Blackman),
      "hann" => Ok(WindowType::Hann),
      other => Err(FbankError::UnknownWindowType(other.to_string())),
    }
  }
}

/// Builds the window coefficients for a frame of `len` samples.
pub fn window_function(window_type: WindowType, len: usize, blackman_coeff: f32) -> Vec<f32> {
  let n = len as f32;
  let a = if len > 1 { 2.0 * PI / (n - 1.0) } else { 0.0 };
  (0..len)
    .map(|i| {
      let i = i as f32;
      match window_type {
        WindowType::Hanning => 0.5 - 0.5 * (a * i).cos(),
        WindowType::Sine => (0.5 * a * i).sin(),
        WindowType::Hamming => 0.54 - 0.46 * (a * i).cos(),
        WindowType::Povey => (0.5 - 0.5 * (a * i).cos()).powf(0.85),
        WindowType::Rectangular => 1.0,
        WindowType::Blackman => {
          blackman_coeff - 0.5 * (a * i).cos() + (0.5 - blackman_coeff) * (2.0 * a * i).cos()
        }
        WindowType::Hann => 0.5 - 0.5 * (2.0 * PI * i / n).cos(),
      }
    })
    .collect()
}

/// Adds Gaussian noise scaled by `dither`.
pub fn dither<R: Rng>(data: &mut [f32], dither: f32, rng: &mut R) {
  if dither == 0.0 {
    return;
  }
  for x in data.iter_mut() {
    let noise: f32 = rng.sample(StandardNormal);
    *x += dither * noise;
  }
}

pub fn remove_dc_offset(data: &mut [f32]) {
  if data.is_empty() {
    return;
  }
  let mean = data.iter().sum::<f32>() / data.len() as f32;
  for x in data.iter_mut() {
    *x -= mean;
  }
}

/// `ln(max(Σx², ε))`.
#[inline]
pub fn log_energy(data: &[f32]) -> f32 {
  let energy: f32 = data.iter().map(|x| x * x).sum();
  energy.max(f32::EPSILON).ln()
}

pub fn pre_emphasis(data: &mut [f32], coeff: f32) {
  if coeff == 0.0 || data.is_empty() {
    return;
  }
  for i in (1..data.len()).rev() {
    data[i] -= coeff * data[i - 1]
  }
  data[0] -= coeff * data[0];
}

pub fn apply_window(data: &mut [f32], window: &[f32]) {
  for (x, w) in data.iter_mut().zip(window) {
    *x *= w;
  }
}

/// Power spectrum of a real frame, `fft.len() / 2 + 1` bins.
///
/// `data` shorter than the FFT size is zero-padded.
pub fn power_spectrum(
  fft: &dyn Fft<f32>,
  data: &[f32],
  complex: &mut Vec<Complex32>,
  out: &mut Vec<f32>,
) {
  let n = fft.len();
  complex.clear();
  complex.reserve(n.saturating_sub(complex.capacity()));
  complex.extend(data.iter().take(n).map(|&x| Complex32::new(x, 0.0)));
  complex.resize(n, Complex32::new(0.0, 0.0));
  if n > 0 {
    fft.process(complex);
  }
  out.clear();
  out.extend(complex.iter().take(n / 2 + 1).map(|c| c.norm_sqr()));
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Orthonormal DCT-II rows `0..num_ceps` over `num_bins` inputs, row-major.
pub fn dct_matrix(num_ceps: usize, num_bins: usize) -> Vec<f32> {
  let len = num_bins as f32;
  let a = PI / len;
  let k0 = (1.0 / len).sqrt();
  let k = (2.0 / len).sqrt();

  let mut matrix = vec![0.0; num_ceps * num_bins];
  for (i, row) in matrix.chunks_exact_mut(num_bins.max(1)).enumerate().take(num_ceps) {
    for (j, cell) in row.iter_mut().enumerate() {
      *cell = if i == 0 {
        k0
      } else {
        let ang = (j as f32 + 0.5) * i as f32 * a;
        k * ang.cos()
      };
    }
  }
  matrix
}

pub fn dct(matrix: &[f32], spectrum: &[f32], out: &mut [f32]) {
  let len = spectrum.len();
  for (row, cep_val) in matrix.chunks_exact(len.max(1)).zip(out.iter_mut()) {
    *cep_val = inner_product(row, spectrum);
  }
}

/// Sinusoidal lifter weights; C0 is left untouched.
pub fn lifter_coeffs(q: f32, num_ceps: usize) -> Vec<f32> {
  (0..num_ceps)
    .map(|i| 1.0 + 0.5 * q * (PI * i as f32 / q).sin())
    .collect()
}
