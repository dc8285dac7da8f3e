//! audio - Audio front-end (AFE) engine
//!
//! Takes interleaved microphone + playback-reference frames from the codec,
//! runs them through a front-end model (echo cancellation, noise
//! suppression, voice activity detection, optional wake word) on a
//! dedicated processing thread, and delivers cleaned fixed-size output
//! units and speech events to the application.

mod aec;
mod afe_config;
mod afe_processor;
#[cfg(feature = "alsa-codec")]
mod alsa_device;
mod codec;
mod denoise;
mod error;
mod event_flags;
mod events;
mod feed_queue;
mod front_end;
mod software_afe;
#[cfg(feature = "speexdsp")]
mod speex;
mod vad;

pub use afe_config::{AecMode, AfeSettings, AfeStatus, FeedStats, SettingRange};
pub use afe_processor::{AfeAudioProcessor, DEFAULT_FEED_QUEUE_CAPACITY};
#[cfg(feature = "alsa-codec")]
pub use codec::AlsaCodec;
pub use codec::{AudioCodec, CodecFormat, IdleCodec};
pub use error::{AfeError, Result};
pub use events::AudioEvent;
pub use front_end::{FetchResult, FrontEnd, FrontEndConfig, FrontEndProvider, VadState, WakeWordDetector};
pub use software_afe::{SoftwareFrontEnd, SoftwareFrontEndProvider, WakeWordFactory};
#[cfg(feature = "speexdsp")]
pub use speex::{SpeexFrontEnd, SpeexFrontEndProvider};
