//! Noise suppression using nnnoiseless (RNNoise-based).
//!
//! nnnoiseless runs on 10ms frames at 48kHz. Input at lower rates that
//! divide 48kHz is upsampled by linear interpolation and decimated back by
//! averaging. The suppression level sets how far the denoised signal may
//! fall below the original.

use nnnoiseless::DenoiseState;

use super::error::AfeError;

/// Target sample rate for nnnoiseless
const DENOISE_SAMPLE_RATE: u32 = 48000;

/// Frame size required by nnnoiseless (480 samples at 48kHz = 10ms)
const DENOISE_FRAME_SIZE: usize = 480;

/// Attenuation limit at full suppression strength.
const MAX_ATTENUATION_DB: f32 = 24.0;

pub struct NoiseSuppressor {
    state: Box<DenoiseState<'static>>,
    /// Upsampling factor to 48kHz.
    ratio: usize,
    /// Samples per 10ms block at the source rate.
    block: usize,
    /// Gain floor: output never drops below `floor_gain * input`.
    floor_gain: f32,
    /// Last source sample of the previous block, for interpolation.
    last: f32,
    frame_in: Vec<f32>,
    frame_out: Vec<f32>,
}

impl NoiseSuppressor {
    /// `strength` in `0.0..=1.0` maps to `0..=24` dB of attenuation.
    pub fn new(sample_rate: u32, strength: f32) -> Result<Self, AfeError> {
        let divides = sample_rate > 0
            && DENOISE_SAMPLE_RATE % sample_rate == 0
            && DENOISE_FRAME_SIZE % (DENOISE_SAMPLE_RATE / sample_rate) as usize == 0;
        if !divides {
            return Err(AfeError::InvalidConfig(format!(
                "noise suppression needs a sample rate dividing {}Hz, got {}Hz",
                DENOISE_SAMPLE_RATE, sample_rate
            )));
        }
        let attenuation_db = MAX_ATTENUATION_DB * strength.clamp(0.0, 1.0);
        let ratio = (DENOISE_SAMPLE_RATE / sample_rate) as usize;
        Ok(Self {
            state: DenoiseState::new(),
            ratio,
            block: DENOISE_FRAME_SIZE / ratio,
            floor_gain: 10f32.powf(-attenuation_db / 20.0),
            last: 0.0,
            frame_in: vec![0.0; DENOISE_FRAME_SIZE],
            frame_out: vec![0.0; DENOISE_FRAME_SIZE],
        })
    }

    /// Source samples per 10ms block; `process` input must be a multiple.
    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn floor_gain(&self) -> f32 {
        self.floor_gain
    }

    /// Denoise normalized samples in place. Returns the mean RNNoise voice
    /// probability over the processed blocks.
    pub fn process(&mut self, samples: &mut [f32]) -> f32 {
        let mut vad_sum = 0.0;
        let mut blocks = 0;

        for chunk in samples.chunks_mut(self.block) {
            if chunk.len() < self.block {
                // partial tail passes through
                break;
            }
            self.upsample(chunk);
            vad_sum += self.state.process_frame(&mut self.frame_out, &self.frame_in);
            blocks += 1;

            for (i, s) in chunk.iter_mut().enumerate() {
                let group = &self.frame_out[i * self.ratio..(i + 1) * self.ratio];
                let wet = group.iter().sum::<f32>() / self.ratio as f32 / i16::MAX as f32;
                let dry = *s;
                *s = wet + self.floor_gain * (dry - wet);
            }
        }

        if blocks == 0 { 0.0 } else { vad_sum / blocks as f32 }
    }

    /// Fill `frame_in` (i16 scale, as nnnoiseless expects) from one block.
    fn upsample(&mut self, chunk: &[f32]) {
        let mut prev = self.last;
        for (i, &s) in chunk.iter().enumerate() {
            for k in 0..self.ratio {
                let t = (k + 1) as f32 / self.ratio as f32;
                self.frame_in[i * self.ratio + k] = (prev + (s - prev) * t) * i16::MAX as f32;
            }
            prev = s;
        }
        self.last = prev;
    }

    pub fn reset(&mut self) {
        self.state = DenoiseState::new();
        self.last = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize, mut seed: u32, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                amplitude * ((seed >> 8) as f32 / (1u32 << 24) as f32 - 0.5)
            })
            .collect()
    }

    #[test]
    fn rejects_unsupported_rate() {
        assert!(NoiseSuppressor::new(44100, 0.5).is_err());
        assert!(NoiseSuppressor::new(0, 0.5).is_err());
    }

    #[test]
    fn block_size_matches_rate() {
        assert_eq!(NoiseSuppressor::new(16000, 0.5).unwrap().block_size(), 160);
        assert_eq!(NoiseSuppressor::new(48000, 0.5).unwrap().block_size(), 480);
    }

    #[test]
    fn zero_strength_is_unity_floor() {
        let ns = NoiseSuppressor::new(16000, 0.0).unwrap();
        assert!((ns.floor_gain() - 1.0).abs() < 1e-6);

        let full = NoiseSuppressor::new(16000, 1.0).unwrap();
        assert!((full.floor_gain() - 0.0631).abs() < 1e-3);
    }

    #[test]
    fn attenuates_stationary_noise() {
        let mut ns = NoiseSuppressor::new(16000, 1.0).unwrap();
        let input = noise(16000, 11, 0.2);
        let mut output = input.clone();
        ns.process(&mut output);

        let tail_in: f32 = input[8000..].iter().map(|s| s * s).sum();
        let tail_out: f32 = output[8000..].iter().map(|s| s * s).sum();
        assert!(tail_out < tail_in, "{} >= {}", tail_out, tail_in);
    }
}
