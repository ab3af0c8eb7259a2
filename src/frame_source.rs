//! Incremental framing, windowing and FFT.
//!
//! A [`FrameSource`] turns waveform chunks into a sequence of power spectra.
//! Frame indices are absolute: frame 0 is the first frame of the utterance,
//! and [`FrameSource::discard`] only moves the lower bound of what is still
//! retrievable.

use rand::{rngs::StdRng, SeedableRng};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::algorithm::{self, WindowType};
use crate::error::{FbankError, Result};

/// Frame extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameOptions {
  pub samp_freq: f32,
  pub frame_shift_ms: f32,
  pub frame_length_ms: f32,
  /// Gaussian dither amplitude, 0 disables it.
  pub dither: f32,
  pub preemph_coeff: f32,
  pub remove_dc_offset: bool,
  pub window_type: WindowType,
  pub round_to_power_of_two: bool,
  pub blackman_coeff: f32,
  pub snip_edges: bool,
}

impl Default for FrameOptions {
  fn default() -> Self {
    Self {
      samp_freq: 16000.0,
      frame_shift_ms: 10.0,
      frame_length_ms: 25.0,
      dither: 1.0,
      preemph_coeff: 0.97,
      remove_dc_offset: true,
      window_type: WindowType::Povey,
      round_to_power_of_two: true,
      blackman_coeff: 0.42,
      snip_edges: true,
    }
  }
}

impl FrameOptions {
  pub fn window_shift(&self) -> usize {
    (self.samp_freq * 0.001 * self.frame_shift_ms) as usize
  }

  pub fn window_size(&self) -> usize {
    (self.samp_freq * 0.001 * self.frame_length_ms) as usize
  }

  pub fn padded_window_size(&self) -> usize {
    let size = self.window_size();
    if self.round_to_power_of_two {
      size.next_power_of_two()
    } else {
      size
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.samp_freq.is_nan() || self.samp_freq <= 0.0 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "sample rate must be positive, got {}",
        self.samp_freq
      )));
    }
    if self.window_shift() == 0 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "frame shift of {} ms is shorter than one sample",
        self.frame_shift_ms
      )));
    }
    if self.window_size() < 2 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "frame length of {} ms gives fewer than 2 samples",
        self.frame_length_ms
      )));
    }
    if self.padded_window_size() % 2 != 0 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "padded window size {} must be even",
        self.padded_window_size()
      )));
    }
    if self.dither < 0.0 {
      return Err(FbankError::InvalidFrameOptions(format!(
        "dither must be non-negative, got {}",
        self.dither
      )));
    }
    Ok(())
  }

  /// First sample of `frame`; negative when the frame starts before the signal.
  pub fn first_sample_of_frame(&self, frame: usize) -> i64 {
    let shift = self.window_shift() as i64;
    let frame = frame as i64;
    if self.snip_edges {
      frame * shift
    } else {
      let midpoint = shift * frame + shift / 2;
      midpoint - self.window_size() as i64 / 2
    }
  }

  /// Number of complete frames in `num_samples` samples.
  ///
  /// With `flush` set, frames that run past the end of the signal are
  /// counted as well when `snip_edges` is off.
  pub fn num_frames(&self, num_samples: usize, flush: bool) -> usize {
    let shift = self.window_shift();
    let size = self.window_size();
    if self.snip_edges {
      if num_samples < size {
        0
      } else {
        1 + (num_samples - size) / shift
      }
    } else {
      let mut num_frames = (num_samples + shift / 2) / shift;
      if flush {
        return num_frames;
      }
      while num_frames > 0 {
        let end = self.first_sample_of_frame(num_frames - 1) + size as i64;
        if end <= num_samples as i64 {
          break;
        }
        num_frames -= 1;
      }
      num_frames
    }
  }
}

/// One processed frame.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumFrame<'a> {
  /// Log energy of the frame before pre-emphasis and windowing.
  pub raw_log_energy: f32,
  /// Log energy of the windowed frame.
  pub log_energy: f32,
  pub power: &'a [f32],
}

/// The windowing/FFT stage a feature session sits on top of.
///
/// Each frame is processed once, when it becomes ready, and kept until
/// discarded, so [`FrameSource::power_spectrum`] is a pure lookup.
pub trait FrameSource: Send {
  fn frame_options(&self) -> &FrameOptions;

  fn accept_waveform(&mut self, samples: &[f32]);

  /// No more samples will arrive; a trailing partial frame may become ready.
  fn input_finished(&mut self);

  fn is_finished(&self) -> bool;

  /// Total number of frames produced since the start of the utterance.
  fn num_frames_ready(&self) -> usize;

  /// Index of the oldest frame that has not been discarded.
  fn first_available_frame(&self) -> usize;

  /// Frames ready and not yet discarded.
  fn frames_ready(&self) -> usize {
    self.num_frames_ready() - self.first_available_frame()
  }

  fn power_spectrum(&self, frame: usize) -> Result<SpectrumFrame<'_>>;

  /// Drops the `n` oldest buffered frames.
  fn discard(&mut self, n: usize);
}

struct StoredFrame {
  raw_log_energy: f32,
  log_energy: f32,
  power: Vec<f32>,
}

/// [`FrameSource`] over an in-memory sample buffer.
pub struct WindowedFrameSource {
  opts: FrameOptions,
  window: Vec<f32>,
  fft: Arc<dyn Fft<f32>>,
  rng: StdRng,
  waveform: Vec<f32>,
  waveform_offset: usize,
  input_finished: bool,
  first_frame: usize,
  frames: VecDeque<StoredFrame>,
  frame_buf: Vec<f32>,
  fft_complex: Vec<Complex32>,
}

impl WindowedFrameSource {
  pub fn new(opts: FrameOptions) -> Result<Self> {
    Self::with_rng(opts, StdRng::from_entropy())
  }

  /// Like [`WindowedFrameSource::new`] with a fixed dither seed.
  pub fn with_seed(opts: FrameOptions, seed: u64) -> Result<Self> {
    Self::with_rng(opts, StdRng::seed_from_u64(seed))
  }

  fn with_rng(opts: FrameOptions, rng: StdRng) -> Result<Self> {
    opts.validate()?;
    let window =
      algorithm::window_function(opts.window_type, opts.window_size(), opts.blackman_coeff);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(opts.padded_window_size());
    Ok(Self {
      window,
      fft,
      rng,
      waveform: Vec::new(),
      waveform_offset: 0,
      input_finished: false,
      first_frame: 0,
      frames: VecDeque::new(),
      frame_buf: Vec::new(),
      fft_complex: Vec::new(),
      opts,
    })
  }

  pub fn num_fft_bins(&self) -> usize {
    self.opts.padded_window_size() / 2
  }

  fn compute_new_frames(&mut self) {
    let total = self.waveform_offset + self.waveform.len();
    let target = self.opts.num_frames(total, self.input_finished);
    for frame in self.num_frames_ready()..target {
      let stored = self.compute_frame(frame);
      self.frames.push_back(stored);
    }

    // a frame's window reflected at the signal end reaches back at most one
    // window length before its first sample
    let next_start = self.opts.first_sample_of_frame(self.num_frames_ready());
    let keep_from = (next_start - self.opts.window_size() as i64).max(0) as usize;
    if keep_from > self.waveform_offset {
      let drop = (keep_from - self.waveform_offset).min(self.waveform.len());
      self.waveform.drain(..drop);
      self.waveform_offset += drop;
    }
  }

  fn compute_frame(&mut self, frame: usize) -> StoredFrame {
    self.extract_window(frame);
    algorithm::dither(&mut self.frame_buf, self.opts.dither, &mut self.rng);
    if self.opts.remove_dc_offset {
      algorithm::remove_dc_offset(&mut self.frame_buf);
    }
    let raw_log_energy = algorithm::log_energy(&self.frame_buf);
    algorithm::pre_emphasis(&mut self.frame_buf, self.opts.preemph_coeff);
    algorithm::apply_window(&mut self.frame_buf, &self.window);
    let log_energy = algorithm::log_energy(&self.frame_buf);

    let mut power = Vec::new();
    algorithm::power_spectrum(
      self.fft.as_ref(),
      &self.frame_buf,
      &mut self.fft_complex,
      &mut power,
    );
    StoredFrame {
      raw_log_energy,
      log_energy,
      power,
    }
  }

  /// Copies the raw samples of `frame` into `frame_buf`, reflecting at the edges.
  fn extract_window(&mut self, frame: usize) {
    let size = self.opts.window_size();
    let start = self.opts.first_sample_of_frame(frame);
    let total = (self.waveform_offset + self.waveform.len()) as i64;
    let offset = self.waveform_offset as i64;

    self.frame_buf.clear();
    for i in 0..size as i64 {
      let mut s = start + i;
      // reflect until in range, signals shorter than a window may bounce twice
      while s < 0 || s >= total {
        if s < 0 {
          s = -s - 1;
        } else {
          s = 2 * total - 1 - s;
        }
      }
      debug_assert!(s >= offset, "sample {s} was already released (offset {offset})");
      self.frame_buf.push(self.waveform[(s - offset) as usize]);
    }
  }
}

impl FrameSource for WindowedFrameSource {
  fn frame_options(&self) -> &FrameOptions {
    &self.opts
  }

  fn accept_waveform(&mut self, samples: &[f32]) {
    self.waveform.extend_from_slice(samples);
    self.compute_new_frames();
  }

  fn input_finished(&mut self) {
    self.input_finished = true;
    self.compute_new_frames();
  }

  fn is_finished(&self) -> bool {
    self.input_finished
  }

  fn num_frames_ready(&self) -> usize {
    self.first_frame + self.frames.len()
  }

  fn first_available_frame(&self) -> usize {
    self.first_frame
  }

  fn power_spectrum(&self, frame: usize) -> Result<SpectrumFrame<'_>> {
    let stored = frame
      .checked_sub(self.first_frame)
      .and_then(|i| self.frames.get(i))
      .ok_or(FbankError::FrameUnavailable {
        frame,
        first: self.first_frame,
        end: self.num_frames_ready(),
      })?;
    Ok(SpectrumFrame {
      raw_log_energy: stored.raw_log_energy,
      log_energy: stored.log_energy,
      power: &stored.power,
    })
  }

  fn discard(&mut self, n: usize) {
    let n = n.min(self.frames.len());
    self.frames.drain(..n);
    self.first_frame += n;
  }
}
