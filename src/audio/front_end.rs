//! The speech front-end model as an opaque capability.
//!
//! A provider allocates a model for a given configuration; the model accepts
//! interleaved input chunks and hands back processed results. Dropping the
//! model releases it. The processing task only ever talks to these traits, so
//! DSP backends can be swapped without touching it.

use serde::Serialize;

use super::afe_config::SettingRange;
use super::error::AfeError;

/// Parameters a model is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontEndConfig {
    pub sample_rate: u32,
    pub mic_channels: u32,
    /// Playback reference channels, interleaved after the microphones.
    pub ref_channels: u32,
    pub aec_enabled: bool,
    pub vad_enabled: bool,
    pub suppression_level: i32,
    pub suppression_range: SettingRange,
    pub vad_sensitivity: i32,
    pub vad_sensitivity_range: SettingRange,
    pub vad_min_speech_ms: u32,
    pub vad_min_noise_ms: u32,
    pub aec_filter_ms: u32,
}

impl FrontEndConfig {
    pub fn total_channels(&self) -> u32 {
        self.mic_channels + self.ref_channels
    }

    /// Samples per millisecond at the configured rate.
    pub fn samples_per_ms(&self) -> usize {
        (self.sample_rate / 1000) as usize
    }

    /// Suppression level mapped onto `0.0..=1.0` within its range.
    pub fn suppression_strength(&self) -> f32 {
        let span = (self.suppression_range.max - self.suppression_range.min) as f32;
        if span <= 0.0 {
            return 0.0;
        }
        (self.suppression_level - self.suppression_range.min) as f32 / span
    }

    /// VAD sensitivity mapped onto `0.0..=1.0` within its range.
    pub fn vad_strength(&self) -> f32 {
        let span = (self.vad_sensitivity_range.max - self.vad_sensitivity_range.min) as f32;
        if span <= 0.0 {
            return 0.0;
        }
        (self.vad_sensitivity - self.vad_sensitivity_range.min) as f32 / span
    }
}

/// Binary speech classification of one processed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VadState {
    Silence,
    Speech,
}

/// One processed chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    /// Cleaned mono samples; may be empty.
    pub data: Vec<i16>,
    /// `None` when the model runs without VAD.
    pub vad: Option<VadState>,
    pub wake_word: Option<String>,
}

/// A live front-end model instance.
pub trait FrontEnd: Send {
    /// Per-channel samples consumed by one `feed` call.
    fn feed_chunksize(&self) -> usize;

    /// Channels interleaved in each fed chunk.
    fn channels(&self) -> usize;

    /// Push one interleaved chunk of `feed_chunksize() * channels()` samples
    /// into the model's internal buffer.
    fn feed(&mut self, samples: &[i16]);

    /// Pop the next processed chunk, if one is ready. Never blocks.
    fn fetch(&mut self) -> Option<FetchResult>;

    /// Discard buffered input and adaptive state.
    fn reset(&mut self);
}

/// Allocates front-end models.
pub trait FrontEndProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, config: &FrontEndConfig) -> Result<Box<dyn FrontEnd>, AfeError>;
}

/// Keyword spotter plugged into a model.
pub trait WakeWordDetector: Send {
    /// Score one cleaned mono chunk; returns the detected wake word, if any.
    fn detect(&mut self, samples: &[i16]) -> Option<String>;

    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FrontEndConfig {
        FrontEndConfig {
            sample_rate: 16000,
            mic_channels: 1,
            ref_channels: 1,
            aec_enabled: true,
            vad_enabled: true,
            suppression_level: 2,
            suppression_range: SettingRange::new(0, 4),
            vad_sensitivity: 4,
            vad_sensitivity_range: SettingRange::new(0, 4),
            vad_min_speech_ms: 128,
            vad_min_noise_ms: 100,
            aec_filter_ms: 16,
        }
    }

    #[test]
    fn strengths_are_normalized() {
        let config = config();
        assert_eq!(config.suppression_strength(), 0.5);
        assert_eq!(config.vad_strength(), 1.0);
        assert_eq!(config.samples_per_ms(), 16);
    }

    #[test]
    fn degenerate_range_has_zero_strength() {
        let mut config = config();
        config.suppression_range = SettingRange::new(2, 2);
        assert_eq!(config.suppression_strength(), 0.0);
    }
}
