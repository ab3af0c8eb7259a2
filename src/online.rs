//! Streaming feature sessions.
//!
//! A session accepts waveform chunks of any size and hands out finished
//! feature frames. Frame indices count from the start of the utterance.
//! Consumed frames are discarded from the underlying [`FrameSource`] so a long
//! utterance does not grow memory without bound.
//!
//! Two ways to drain frames:
//!
//! - [`FeatureSession::fetch_frame`] returns a borrowed view of one frame and
//!   then discards the frame before it. It assumes frames are fetched one at a
//!   time in increasing order (0, 1, 2, ...). Fetching out of order is the
//!   caller's responsibility: the discard count is not adjusted for it.
//! - [`FeatureSession::fetch_frames`] copies every frame after a watermark into
//!   an owned [`FrameBatch`] and discards everything up to the newest frame.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::ops::Deref;

use crate::error::{FbankError, Result};
use crate::feature::{FeatureComputer, FeatureKind};
use crate::frame_source::{FrameSource, WindowedFrameSource};
use crate::options::FeatureOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Accepting,
  Finished,
}

/// Feature frames copied out of a session, `num_frames x dim` row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
  data: Vec<f32>,
  dim: usize,
  first_frame: usize,
}

impl FrameBatch {
  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn num_frames(&self) -> usize {
    if self.dim == 0 {
      0
    } else {
      self.data.len() / self.dim
    }
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Utterance index of the first frame in the batch.
  pub fn first_frame(&self) -> usize {
    self.first_frame
  }

  /// Utterance index of the last frame in the batch, the next watermark.
  pub fn last_frame(&self) -> Option<usize> {
    self.num_frames().checked_sub(1).map(|n| self.first_frame + n)
  }

  pub fn frame(&self, i: usize) -> Option<&[f32]> {
    self.data.get(i * self.dim..(i + 1) * self.dim)
  }

  pub fn iter(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.dim.max(1))
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data
  }
}

/// One feature extraction run over a single utterance.
pub struct FeatureSession<S: FrameSource = WindowedFrameSource> {
  source: S,
  computer: FeatureComputer,
  frame_buf: Vec<f32>,
  state: SessionState,
}

impl FeatureSession<WindowedFrameSource> {
  /// Creates the session for the variant named in `opts`.
  pub fn new(opts: &FeatureOptions) -> Result<Self> {
    let computer = FeatureComputer::new(opts)?;
    let frame_opts = computer.frame_options().clone();
    let source = match opts.dither_seed {
      Some(seed) => WindowedFrameSource::with_seed(frame_opts, seed)?,
      None => WindowedFrameSource::new(frame_opts)?,
    };
    Ok(Self::with_source(source, computer))
  }
}

impl<S: FrameSource> FeatureSession<S> {
  pub fn with_source(source: S, computer: FeatureComputer) -> Self {
    let opts = source.frame_options();
    log::debug!(
      "created {} session: dim {}, window {} samples, shift {} samples, snip_edges {}",
      computer.kind(),
      computer.dim(),
      opts.window_size(),
      opts.window_shift(),
      opts.snip_edges
    );
    Self {
      frame_buf: vec![0.0; computer.dim()],
      source,
      computer,
      state: SessionState::Accepting,
    }
  }

  pub fn kind(&self) -> FeatureKind {
    self.computer.kind()
  }

  pub fn dim(&self) -> usize {
    self.computer.dim()
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  pub fn is_finished(&self) -> bool {
    self.state == SessionState::Finished
  }

  pub fn frame_shift_seconds(&self) -> f32 {
    self.source.frame_options().frame_shift_ms / 1000.0
  }

  pub fn accept_waveform(&mut self, sample_rate: f32, samples: &[f32]) -> Result<()> {
    if self.state == SessionState::Finished {
      log::warn!("dropping {} samples received after input finished", samples.len());
      return Err(FbankError::InputAlreadyFinished);
    }
    let expected = self.source.frame_options().samp_freq;
    if sample_rate != expected {
      log::warn!("sample rate mismatch: session runs at {expected}, got {sample_rate}");
      return Err(FbankError::SampleRateMismatch {
        expected,
        actual: sample_rate,
      });
    }
    self.source.accept_waveform(samples);
    Ok(())
  }

  /// Marks the end of the waveform. Calling it again has no effect.
  pub fn input_finished(&mut self) {
    if self.state == SessionState::Accepting {
      self.state = SessionState::Finished;
      self.source.input_finished();
    }
  }

  /// Frames ready and not yet discarded.
  pub fn frames_ready(&self) -> usize {
    self.source.frames_ready()
  }

  /// Frames produced since the start of the utterance, discarded ones included.
  pub fn num_frames_ready(&self) -> usize {
    self.source.num_frames_ready()
  }

  /// Utterance index of the oldest frame still buffered.
  pub fn first_available_frame(&self) -> usize {
    self.source.first_available_frame()
  }

  pub fn is_last_frame(&self, frame: usize) -> bool {
    self.is_finished() && frame + 1 == self.num_frames_ready()
  }

  fn load_frame(&mut self, frame: usize) -> Result<()> {
    let spectrum = self.source.power_spectrum(frame)?;
    self.computer.compute(spectrum, &mut self.frame_buf)
  }

  /// Returns frame `frame` and discards the frame fetched before it.
  ///
  /// The view lives in the session and is invalidated by the next call that
  /// takes `&mut self`.
  pub fn fetch_frame(&mut self, frame: usize) -> Result<&[f32]> {
    self.prepare_frame(frame)?;
    Ok(self.frame_buf.as_slice())
  }

  pub(crate) fn prepare_frame(&mut self, frame: usize) -> Result<()> {
    if self.frames_ready() == 0 {
      return Err(FbankError::NoFramesReady);
    }
    self.load_frame(frame)?;
    let discard = if frame == 0 { 0 } else { 1 };
    self.source.discard(discard);
    Ok(())
  }

  /// Copies every ready frame after `last_consumed` and discards them.
  ///
  /// `last_consumed == 0` means nothing has been consumed yet and returns
  /// every buffered frame. Otherwise the batch starts at `last_consumed + 1`.
  pub fn fetch_frames(&mut self, last_consumed: usize) -> Result<FrameBatch> {
    if self.frames_ready() == 0 {
      return Err(FbankError::NoFramesReady);
    }
    let first = self.first_available_frame();
    let end = self.num_frames_ready();
    let start = if last_consumed == 0 {
      first
    } else {
      last_consumed + 1
    };
    if start > end {
      return Err(FbankError::ConsumedBeyondReady {
        last_consumed,
        ready: end,
      });
    }
    if start < first {
      return Err(FbankError::FrameUnavailable {
        frame: start,
        first,
        end,
      });
    }

    let dim = self.dim();
    let mut data = vec![0.0; (end - start) * dim];
    for (frame, out) in (start..end).zip(data.chunks_exact_mut(dim.max(1))) {
      let spectrum = self.source.power_spectrum(frame)?;
      self.computer.compute(spectrum, out)?;
    }
    self.source.discard(end - first);

    Ok(FrameBatch {
      data,
      dim,
      first_frame: start,
    })
  }
}

/// A frame borrowed from a [`SharedFeatureSession`].
///
/// Holds the session lock until dropped.
pub struct FrameView<'a>(MappedMutexGuard<'a, [f32]>);

impl Deref for FrameView<'_> {
  type Target = [f32];

  fn deref(&self) -> &[f32] {
    &self.0
  }
}

/// A [`FeatureSession`] behind its own lock, for one producer and one consumer thread.
pub struct SharedFeatureSession<S: FrameSource = WindowedFrameSource> {
  inner: Mutex<FeatureSession<S>>,
}

impl SharedFeatureSession<WindowedFrameSource> {
  pub fn new(opts: &FeatureOptions) -> Result<Self> {
    Ok(FeatureSession::new(opts)?.into())
  }
}

impl<S: FrameSource> From<FeatureSession<S>> for SharedFeatureSession<S> {
  fn from(session: FeatureSession<S>) -> Self {
    Self {
      inner: Mutex::new(session),
    }
  }
}

impl<S: FrameSource> SharedFeatureSession<S> {
  pub fn kind(&self) -> FeatureKind {
    self.inner.lock().kind()
  }

  pub fn dim(&self) -> usize {
    self.inner.lock().dim()
  }

  pub fn accept_waveform(&self, sample_rate: f32, samples: &[f32]) -> Result<()> {
    self.inner.lock().accept_waveform(sample_rate, samples)
  }

  pub fn input_finished(&self) {
    self.inner.lock().input_finished()
  }

  pub fn is_finished(&self) -> bool {
    self.inner.lock().is_finished()
  }

  pub fn frames_ready(&self) -> usize {
    self.inner.lock().frames_ready()
  }

  pub fn num_frames_ready(&self) -> usize {
    self.inner.lock().num_frames_ready()
  }

  pub fn first_available_frame(&self) -> usize {
    self.inner.lock().first_available_frame()
  }

  pub fn fetch_frame(&self, frame: usize) -> Result<FrameView<'_>> {
    let mut session = self.inner.lock();
    session.prepare_frame(frame)?;
    Ok(FrameView(MutexGuard::map(session, |s| s.frame_buf.as_mut_slice())))
  }

  pub fn fetch_frames(&self, last_consumed: usize) -> Result<FrameBatch> {
    self.inner.lock().fetch_frames(last_consumed)
  }

  pub fn into_inner(self) -> FeatureSession<S> {
    self.inner.into_inner()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame_source::{FrameOptions, SpectrumFrame};

  /// Frame `i` has every spectrum bin equal to `i`; each sample adds one frame.
  struct CountingSource {
    opts: FrameOptions,
    first: usize,
    finished: bool,
    spectra: Vec<Vec<f32>>,
  }

  impl CountingSource {
    fn new(ready: usize) -> Self {
      let mut source = Self {
        opts: FrameOptions {
          dither: 0.0,
          ..Default::default()
        },
        first: 0,
        finished: false,
        spectra: Vec::new(),
      };
      source.accept_waveform(&vec![0.0; ready]);
      source
    }
  }

  impl FrameSource for CountingSource {
    fn frame_options(&self) -> &FrameOptions {
      &self.opts
    }

    fn accept_waveform(&mut self, samples: &[f32]) {
      for _ in samples {
        let i = self.spectra.len();
        self.spectra.push(vec![i as f32; 257]);
      }
    }

    fn input_finished(&mut self) {
      self.finished = true;
    }

    fn is_finished(&self) -> bool {
      self.finished
    }

    fn num_frames_ready(&self) -> usize {
      self.spectra.len()
    }

    fn first_available_frame(&self) -> usize {
      self.first
    }

    fn power_spectrum(&self, frame: usize) -> Result<SpectrumFrame<'_>> {
      if frame < self.first || frame >= self.spectra.len() {
        return Err(FbankError::FrameUnavailable {
          frame,
          first: self.first,
          end: self.spectra.len(),
        });
      }
      Ok(SpectrumFrame {
        raw_log_energy: 0.0,
        log_energy: 0.0,
        power: &self.spectra[frame],
      })
    }

    fn discard(&mut self, n: usize) {
      self.first = (self.first + n).min(self.spectra.len());
    }
  }

  fn linear_session(ready: usize) -> FeatureSession<CountingSource> {
    let opts = FeatureOptions {
      num_bins: 3,
      use_log_fbank: false,
      ..Default::default()
    };
    let computer = FeatureComputer::new(&opts).unwrap();
    FeatureSession::with_source(CountingSource::new(ready), computer)
  }

  fn fetch_copy(session: &mut FeatureSession<CountingSource>, frame: usize) -> Vec<f32> {
    session.fetch_frame(frame).unwrap().to_vec()
  }

  #[test]
  fn sequential_single_fetch_discards_the_previous_frame() {
    let mut s = linear_session(5);
    let f0 = fetch_copy(&mut s, 0);
    assert_eq!(s.frames_ready(), 5);
    assert_eq!(s.first_available_frame(), 0);

    let f1 = fetch_copy(&mut s, 1);
    assert_eq!(s.frames_ready(), 4);
    assert_eq!(s.first_available_frame(), 1);

    let f2 = fetch_copy(&mut s, 2);
    assert_eq!(s.frames_ready(), 3);
    assert_eq!(s.first_available_frame(), 2);

    assert!(f0.iter().all(|&x| x == 0.0));
    // energies scale with the frame index
    for k in 0..3 {
      assert!((f2[k] - 2.0 * f1[k]).abs() < 1e-4);
    }
  }

  #[test]
  fn fetching_a_discarded_frame_fails() {
    let mut s = linear_session(5);
    fetch_copy(&mut s, 0);
    fetch_copy(&mut s, 1);
    assert!(matches!(
      s.fetch_frame(0),
      Err(FbankError::FrameUnavailable { frame: 0, .. })
    ));
    assert!(matches!(
      s.fetch_frame(7),
      Err(FbankError::FrameUnavailable { frame: 7, .. })
    ));
  }

  #[test]
  fn fetch_with_nothing_ready_fails() {
    let mut s = linear_session(0);
    assert!(matches!(s.fetch_frame(0), Err(FbankError::NoFramesReady)));
    assert!(matches!(s.fetch_frames(0), Err(FbankError::NoFramesReady)));
  }

  #[test]
  fn batch_fetch_drains_everything_ready() {
    let mut s = linear_session(4);
    let batch = s.fetch_frames(0).unwrap();
    assert_eq!(batch.num_frames(), 4);
    assert_eq!(batch.dim(), 3);
    assert_eq!(batch.first_frame(), 0);
    assert_eq!(batch.last_frame(), Some(3));
    assert_eq!(s.frames_ready(), 0);
    assert!(matches!(s.fetch_frames(0), Err(FbankError::NoFramesReady)));

    // three more frames arrive
    s.source.accept_waveform(&[0.0; 3]);
    let next = s.fetch_frames(batch.last_frame().unwrap()).unwrap();
    assert_eq!(next.first_frame(), 4);
    assert_eq!(next.num_frames(), 3);
    assert_eq!(s.frames_ready(), 0);

    let f4 = next.frame(0).unwrap();
    let f6 = next.frame(2).unwrap();
    assert!((f6[0] * 4.0 - f4[0] * 6.0).abs() < 1e-3);
  }

  #[test]
  fn batch_fetch_rejects_bad_watermarks() {
    let mut s = linear_session(4);
    assert!(matches!(
      s.fetch_frames(9),
      Err(FbankError::ConsumedBeyondReady {
        last_consumed: 9,
        ready: 4
      })
    ));

    fetch_copy(&mut s, 0);
    fetch_copy(&mut s, 1);
    fetch_copy(&mut s, 2);
    fetch_copy(&mut s, 3);
    // frame 2 was discarded by the fetch of frame 3
    assert!(matches!(
      s.fetch_frames(1),
      Err(FbankError::FrameUnavailable { frame: 2, first: 3, end: 4 })
    ));
    let rest = s.fetch_frames(2).unwrap();
    assert_eq!(rest.first_frame(), 3);
    assert_eq!(rest.num_frames(), 1);
  }

  #[test]
  fn batch_after_single_fetches_resumes_at_the_watermark() {
    let mut s = linear_session(6);
    fetch_copy(&mut s, 0);
    fetch_copy(&mut s, 1);
    let batch = s.fetch_frames(1).unwrap();
    assert_eq!(batch.first_frame(), 2);
    assert_eq!(batch.num_frames(), 4);
    assert_eq!(s.frames_ready(), 0);
  }

  #[test]
  fn finished_session_rejects_waveform() {
    let mut s = linear_session(1);
    s.input_finished();
    s.input_finished();
    assert!(s.is_finished());
    assert!(s.is_last_frame(0));
    assert!(matches!(
      s.accept_waveform(16000.0, &[0.0; 10]),
      Err(FbankError::InputAlreadyFinished)
    ));
  }

  #[test]
  fn sample_rate_mismatch_is_rejected() {
    let mut s = linear_session(0);
    assert!(matches!(
      s.accept_waveform(8000.0, &[0.0; 10]),
      Err(FbankError::SampleRateMismatch { .. })
    ));
    assert_eq!(s.num_frames_ready(), 0);
  }

  #[test]
  fn shared_session_view_derefs_to_the_frame() {
    let shared: SharedFeatureSession<CountingSource> = linear_session(3).into();
    assert_eq!(shared.dim(), 3);
    {
      let view = shared.fetch_frame(0).unwrap();
      assert_eq!(view.len(), 3);
    }
    let view = shared.fetch_frame(1).unwrap();
    assert!(view.iter().all(|&x| x > 0.0));
    drop(view);
    assert_eq!(shared.frames_ready(), 2);
    assert_eq!(shared.into_inner().first_available_frame(), 1);
  }

  #[test]
  fn refetching_a_dithered_frame_gives_the_same_vector() {
    let opts = FeatureOptions {
      dither_seed: Some(3),
      ..Default::default()
    };
    let mut s = FeatureSession::new(&opts).unwrap();
    s.accept_waveform(16000.0, &[0.0; 800]).unwrap();

    let a = s.fetch_frame(0).unwrap().to_vec();
    let b = s.fetch_frame(0).unwrap().to_vec();
    assert_eq!(a, b);
    // nothing consumed past frame 0, so the batch starts at frame 0 again
    let batch = s.fetch_frames(0).unwrap();
    assert_eq!(batch.first_frame(), 0);
    assert_eq!(batch.frame(0).unwrap(), a.as_slice());
  }
}
