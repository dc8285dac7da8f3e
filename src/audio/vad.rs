//! Energy-based voice activity detection with speech/noise hangover.

use super::front_end::VadState;

/// Level threshold at the least sensitive setting.
const THRESHOLD_LEAST_SENSITIVE_DB: f32 = -30.0;

/// How far the threshold drops at the most sensitive setting.
const SENSITIVITY_SPAN_DB: f32 = 20.0;

/// RMS level of normalized samples in dBFS.
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    20.0 * rms.max(1e-10).log10()
}

/// Classifies chunks as speech or silence. A state change needs the raw
/// decision to hold for `min_speech` (or `min_noise`) consecutive chunks.
pub struct EnergyVad {
    threshold_db: f32,
    min_speech_chunks: u32,
    min_noise_chunks: u32,
    state: VadState,
    run: u32,
}

impl EnergyVad {
    /// `sensitivity` in `0.0..=1.0`; higher triggers on quieter input.
    pub fn new(sensitivity: f32, chunk_ms: u32, min_speech_ms: u32, min_noise_ms: u32) -> Self {
        let chunk_ms = chunk_ms.max(1);
        Self {
            threshold_db: THRESHOLD_LEAST_SENSITIVE_DB
                - SENSITIVITY_SPAN_DB * sensitivity.clamp(0.0, 1.0),
            min_speech_chunks: min_speech_ms.div_ceil(chunk_ms).max(1),
            min_noise_chunks: min_noise_ms.div_ceil(chunk_ms).max(1),
            state: VadState::Silence,
            run: 0,
        }
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn process(&mut self, samples: &[f32]) -> VadState {
        let active = rms_dbfs(samples) >= self.threshold_db;
        let (needed, flips) = match self.state {
            VadState::Silence => (self.min_speech_chunks, active),
            VadState::Speech => (self.min_noise_chunks, !active),
        };

        if flips {
            self.run += 1;
            if self.run >= needed {
                self.state = match self.state {
                    VadState::Silence => VadState::Speech,
                    VadState::Speech => VadState::Silence,
                };
                self.run = 0;
            }
        } else {
            self.run = 0;
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.run = 0;
    }
}
