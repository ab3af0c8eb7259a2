use crate::error::{FbankError, Result};

const MEL_BREAK_FREQ: f32 = 700.0;
const MEL_HIGH_FREQ_Q: f32 = 1127.0;

const SLANEY_MIN_LOG_HZ: f32 = 1000.0;
const SLANEY_MIN_LOG_MEL: f32 = 15.0;
const SLANEY_F_SP: f32 = 200.0 / 3.0;

#[inline]
fn slaney_logstep() -> f32 {
  27.0 / 6.4f32.ln()
}

/// Hz to Mel. `slaney` selects the linear-below-1kHz convention used by librosa.
#[inline]
pub fn to_mel(hz: f32, slaney: bool) -> f32 {
  if !slaney {
    return MEL_HIGH_FREQ_Q * (1.0 + hz / MEL_BREAK_FREQ).ln();
  }
  if hz >= SLANEY_MIN_LOG_HZ {
    SLANEY_MIN_LOG_MEL + (hz / SLANEY_MIN_LOG_HZ).ln() * slaney_logstep()
  } else {
    hz / SLANEY_F_SP
  }
}

/// Inverse of [`to_mel`].
#[inline]
pub fn to_hz(mel: f32, slaney: bool) -> f32 {
  if !slaney {
    return MEL_BREAK_FREQ * ((mel / MEL_HIGH_FREQ_Q).exp() - 1.0);
  }
  if mel >= SLANEY_MIN_LOG_MEL {
    SLANEY_MIN_LOG_HZ * ((mel - SLANEY_MIN_LOG_MEL) / slaney_logstep()).exp()
  } else {
    mel * SLANEY_F_SP
  }
}

/// Piecewise-linear VTLN frequency warp.
///
/// Identity outside `[low_freq, high_freq]`. Inside, three linear segments
/// meet at `l = vtln_low_cutoff * max(1, warp)` and
/// `h = vtln_high_cutoff * min(1, warp)`; the middle one has slope `1/warp`
/// and the outer two pin `low_freq` and `high_freq` to themselves.
pub fn vtln_warp_freq(
  vtln_low_cutoff: f32,
  vtln_high_cutoff: f32,
  low_freq: f32,
  high_freq: f32,
  warp_factor: f32,
  freq: f32,
) -> Result<f32> {
  if freq < low_freq || freq > high_freq {
    return Ok(freq);
  }

  let cutoff_error = || FbankError::InvalidVtlnCutoffs {
    vtln_low_cutoff,
    vtln_high_cutoff,
    low_freq,
    high_freq,
    warp_factor,
  };

  if vtln_low_cutoff <= low_freq || vtln_high_cutoff >= high_freq {
    return Err(cutoff_error());
  }

  let l = vtln_low_cutoff * warp_factor.max(1.0);
  let h = vtln_high_cutoff * warp_factor.min(1.0);
  let scale = 1.0 / warp_factor;
  let fl = scale * l;
  let fh = scale * h;
  if l <= low_freq || h >= high_freq {
    return Err(cutoff_error());
  }

  let scale_left = (fl - low_freq) / (l - low_freq);
  let scale_right = (high_freq - fh) / (high_freq - h);

  let warped = if freq < l {
    low_freq + scale_left * (freq - low_freq)
  } else if freq < h {
    scale * freq
  } else {
    high_freq + scale_right * (freq - high_freq)
  };
  Ok(warped)
}

/// [`vtln_warp_freq`] applied to a standard-convention Mel value.
pub fn vtln_warp_mel(
  vtln_low_cutoff: f32,
  vtln_high_cutoff: f32,
  low_freq: f32,
  high_freq: f32,
  warp_factor: f32,
  mel: f32,
) -> Result<f32> {
  let hz = vtln_warp_freq(
    vtln_low_cutoff,
    vtln_high_cutoff,
    low_freq,
    high_freq,
    warp_factor,
    to_hz(mel, false),
  )?;
  Ok(to_mel(hz, false))
}
