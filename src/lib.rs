#![deny(clippy::all)]

//! Streaming Mel filter bank feature extraction.
//!
//! Waveform chunks go into a [`FeatureSession`] and come out as fbank, MFCC
//! or whisper-style frames as soon as enough samples are buffered.
//!
//! ```no_run
//! use online_fbank::{FeatureOptions, FeatureSession};
//!
//! let opts = FeatureOptions {
//!   dither: 0.0,
//!   ..Default::default()
//! };
//! let mut session = FeatureSession::new(&opts)?;
//! session.accept_waveform(16000.0, &vec![0.0; 16000])?;
//! session.input_finished();
//! let batch = session.fetch_frames(0)?;
//! assert_eq!(batch.dim(), 25);
//! # Ok::<(), online_fbank::FbankError>(())
//! ```

pub mod algorithm;
pub mod error;
pub mod fbank;
pub mod feature;
pub mod frame_source;
pub mod mel_banks;
pub mod mel_scale;
pub mod mfcc;
#[cfg(feature = "node")]
mod node;
pub mod online;
pub mod options;
pub mod whisper;

pub use error::{FbankError, Result};
pub use feature::{FeatureComputer, FeatureKind};
pub use frame_source::{FrameOptions, FrameSource, WindowedFrameSource};
pub use mel_banks::{MelBankOptions, MelBanks};
pub use online::{FeatureSession, FrameBatch, FrameView, SessionState, SharedFeatureSession};
pub use options::FeatureOptions;

/// Builds a session for the variant named in `opts`.
pub fn create_session(opts: &FeatureOptions) -> Result<FeatureSession> {
  FeatureSession::new(opts)
}
