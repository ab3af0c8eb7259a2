use napi::bindgen_prelude::*;
use napi_derive::napi;

use crate::error::FbankError;
use crate::online::FeatureSession;
use crate::options::FeatureOptions;

fn to_napi(err: FbankError) -> Error {
  let status = if err.is_internal() {
    Status::GenericFailure
  } else {
    Status::InvalidArg
  };
  Error::new(status, err.to_string())
}

/// Options accepted from JavaScript. Missing fields keep their defaults.
#[napi(object)]
pub struct FeatureOptionsJs {
  pub dither: Option<f64>,
  pub dither_seed: Option<u32>,
  pub snip_edges: Option<bool>,
  pub sample_rate: Option<f64>,
  pub num_bins: Option<u32>,
  pub num_ceps: Option<u32>,
  pub frame_shift: Option<f64>,
  pub frame_length: Option<f64>,
  pub energy_floor: Option<f64>,
  pub debug_mel: Option<bool>,
  pub window_type: Option<String>,
  pub feature_type: Option<String>,
  pub low_freq: Option<f64>,
  pub high_freq: Option<f64>,
  pub vtln_warp: Option<f64>,
  pub use_energy: Option<bool>,
  pub use_log_fbank: Option<bool>,
  pub is_librosa: Option<bool>,
  pub htk_mode: Option<bool>,
}

impl From<FeatureOptionsJs> for FeatureOptions {
  fn from(js: FeatureOptionsJs) -> Self {
    let d = FeatureOptions::default();
    Self {
      dither: js.dither.map_or(d.dither, |v| v as f32),
      dither_seed: js.dither_seed.map(u64::from),
      snip_edges: js.snip_edges.unwrap_or(d.snip_edges),
      sample_rate: js.sample_rate.map_or(d.sample_rate, |v| v as f32),
      num_bins: js.num_bins.map_or(d.num_bins, |v| v as usize),
      num_ceps: js.num_ceps.map_or(d.num_ceps, |v| v as usize),
      frame_shift_ms: js.frame_shift.map_or(d.frame_shift_ms, |v| v as f32),
      frame_length_ms: js.frame_length.map_or(d.frame_length_ms, |v| v as f32),
      energy_floor: js.energy_floor.map_or(d.energy_floor, |v| v as f32),
      debug_mel: js.debug_mel.unwrap_or(d.debug_mel),
      window_type: js.window_type.unwrap_or(d.window_type),
      feature_type: js.feature_type.unwrap_or(d.feature_type),
      low_freq: js.low_freq.map_or(d.low_freq, |v| v as f32),
      high_freq: js.high_freq.map(|v| v as f32),
      vtln_warp: js.vtln_warp.map_or(d.vtln_warp, |v| v as f32),
      use_energy: js.use_energy,
      use_log_fbank: js.use_log_fbank.unwrap_or(d.use_log_fbank),
      is_librosa: js.is_librosa.unwrap_or(d.is_librosa),
      htk_mode: js.htk_mode.unwrap_or(d.htk_mode),
      ..d
    }
  }
}

/// Validates `opts` by building a throwaway session and returns the resolved options as JSON.
#[napi]
pub fn build_feature_options(opts: FeatureOptionsJs) -> Result<String> {
  let opts = FeatureOptions::from(opts);
  FeatureSession::new(&opts).map_err(to_napi)?;
  opts.to_json().map_err(to_napi)
}

#[napi(object)]
pub struct FetchedFrames {
  pub data: Float32Array,
  pub num_frames: u32,
  pub dim: u32,
  pub first_frame: u32,
}

#[napi]
pub struct OnlineFeature {
  session: FeatureSession,
}

#[napi]
impl OnlineFeature {
  #[napi(constructor)]
  pub fn new(opts: FeatureOptionsJs) -> Result<Self> {
    let session = FeatureSession::new(&opts.into()).map_err(to_napi)?;
    Ok(Self { session })
  }

  #[napi]
  pub fn accept_waveform(&mut self, sample_rate: f64, audio: Float32Array) -> Result<()> {
    self
      .session
      .accept_waveform(sample_rate as f32, &audio)
      .map_err(to_napi)
  }

  #[napi]
  pub fn input_finished(&mut self) {
    self.session.input_finished();
  }

  #[napi]
  pub fn frames_ready(&self) -> u32 {
    self.session.frames_ready() as u32
  }

  #[napi]
  pub fn num_frames_ready(&self) -> u32 {
    self.session.num_frames_ready() as u32
  }

  #[napi]
  pub fn is_last_frame(&self, frame: u32) -> bool {
    self.session.is_last_frame(frame as usize)
  }

  #[napi]
  pub fn dim(&self) -> u32 {
    self.session.dim() as u32
  }

  #[napi]
  pub fn frame_shift_seconds(&self) -> f64 {
    f64::from(self.session.frame_shift_seconds())
  }

  /// Copies frame `frame` out of the session.
  #[napi]
  pub fn fetch_frame(&mut self, frame: u32) -> Result<Float32Array> {
    let data = self
      .session
      .fetch_frame(frame as usize)
      .map_err(to_napi)?
      .to_vec();
    Ok(Float32Array::new(data))
  }

  #[napi]
  pub fn fetch_frames(&mut self, last_consumed: u32) -> Result<FetchedFrames> {
    let batch = self
      .session
      .fetch_frames(last_consumed as usize)
      .map_err(to_napi)?;
    Ok(FetchedFrames {
      num_frames: batch.num_frames() as u32,
      dim: batch.dim() as u32,
      first_frame: batch.first_frame() as u32,
      data: Float32Array::new(batch.into_vec()),
    })
  }
}
