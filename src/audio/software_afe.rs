//! Pure-Rust front-end model: NLMS echo cancellation, energy VAD and
//! RNNoise suppression on fixed chunks of interleaved mic/reference audio.

use std::collections::VecDeque;
use std::sync::Arc;

use super::aec::EchoCanceller;
use super::denoise::NoiseSuppressor;
use super::error::AfeError;
use super::front_end::{FetchResult, FrontEnd, FrontEndConfig, FrontEndProvider, WakeWordDetector};
use super::vad::EnergyVad;

/// Chunk length with echo cancellation (longer blocks for the adaptive filter).
const CHUNK_MS_WITH_AEC: u32 = 30;
const CHUNK_MS: u32 = 20;

/// NLMS step size.
const AEC_STEP_SIZE: f32 = 0.3;

/// Chunks buffered between `feed` and `fetch` before the oldest is dropped.
const MAX_PENDING_CHUNKS: usize = 8;

pub type WakeWordFactory = Arc<dyn Fn() -> Box<dyn WakeWordDetector> + Send + Sync>;

/// Creates `SoftwareFrontEnd` models.
#[derive(Default, Clone)]
pub struct SoftwareFrontEndProvider {
    wake_word: Option<WakeWordFactory>,
}

impl SoftwareFrontEndProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a keyword spotter; a fresh detector is built for every model.
    pub fn with_wake_word(mut self, factory: WakeWordFactory) -> Self {
        self.wake_word = Some(factory);
        self
    }
}

impl FrontEndProvider for SoftwareFrontEndProvider {
    fn name(&self) -> &str {
        "software"
    }

    fn create(&self, config: &FrontEndConfig) -> Result<Box<dyn FrontEnd>, AfeError> {
        let model = SoftwareFrontEnd::new(config, self.wake_word.as_ref().map(|f| f()))?;
        Ok(Box::new(model))
    }
}

pub struct SoftwareFrontEnd {
    chunk: usize,
    mic_channels: usize,
    ref_channels: usize,
    pending: VecDeque<Vec<i16>>,
    aec: Option<EchoCanceller>,
    vad: Option<EnergyVad>,
    ns: Option<NoiseSuppressor>,
    wake_word: Option<Box<dyn WakeWordDetector>>,
    mic: Vec<f32>,
    reference: Vec<f32>,
}

impl SoftwareFrontEnd {
    pub fn new(
        config: &FrontEndConfig,
        wake_word: Option<Box<dyn WakeWordDetector>>,
    ) -> Result<Self, AfeError> {
        if config.sample_rate == 0 || config.sample_rate % 100 != 0 {
            return Err(AfeError::InvalidConfig(format!(
                "sample rate {}Hz is not a multiple of 100Hz",
                config.sample_rate
            )));
        }
        if config.mic_channels == 0 {
            return Err(AfeError::InvalidConfig("no microphone channel".into()));
        }

        let aec_active = config.aec_enabled && config.ref_channels > 0;
        let chunk_ms = if aec_active { CHUNK_MS_WITH_AEC } else { CHUNK_MS };
        let chunk = config.samples_per_ms() * chunk_ms as usize;

        let aec = aec_active.then(|| {
            let taps = config.samples_per_ms() * config.aec_filter_ms.max(1) as usize;
            EchoCanceller::new(taps, AEC_STEP_SIZE)
        });

        let vad = config.vad_enabled.then(|| {
            EnergyVad::new(
                config.vad_strength(),
                chunk_ms,
                config.vad_min_speech_ms,
                config.vad_min_noise_ms,
            )
        });

        let strength = config.suppression_strength();
        let ns = if strength > 0.0 {
            Some(NoiseSuppressor::new(config.sample_rate, strength)?)
        } else {
            None
        };

        log::debug!(
            "Software front-end: chunk={} ({}ms), mic={}, ref={}, aec_taps={:?}, vad_threshold={:?}, ns_floor={:?}",
            chunk,
            chunk_ms,
            config.mic_channels,
            config.ref_channels,
            aec.as_ref().map(|a| a.taps()),
            vad.as_ref().map(|v| v.threshold_db()),
            ns.as_ref().map(|n| n.floor_gain()),
        );
        if let Some(ns) = ns.as_ref() {
            if chunk % ns.block_size() != 0 {
                return Err(AfeError::InvalidConfig(format!(
                    "chunk of {} samples is not a multiple of the {}-sample denoise block",
                    chunk,
                    ns.block_size()
                )));
            }
        }

        Ok(Self {
            chunk,
            mic_channels: config.mic_channels as usize,
            ref_channels: config.ref_channels as usize,
            pending: VecDeque::with_capacity(MAX_PENDING_CHUNKS),
            aec,
            vad,
            ns,
            wake_word,
            mic: vec![0.0; chunk],
            reference: vec![0.0; chunk],
        })
    }

    /// Split one interleaved chunk into the averaged mic signal and the
    /// first reference channel, normalized to `-1.0..1.0`.
    fn deinterleave(&mut self, samples: &[i16]) {
        let channels = self.mic_channels + self.ref_channels;
        for (i, frame) in samples.chunks_exact(channels).enumerate() {
            let mic_sum: i32 = frame[..self.mic_channels].iter().map(|&s| s as i32).sum();
            self.mic[i] = mic_sum as f32 / self.mic_channels as f32 / 32768.0;
            self.reference[i] = if self.ref_channels > 0 {
                frame[self.mic_channels] as f32 / 32768.0
            } else {
                0.0
            };
        }
    }
}

impl FrontEnd for SoftwareFrontEnd {
    fn feed_chunksize(&self) -> usize {
        self.chunk
    }

    fn channels(&self) -> usize {
        self.mic_channels + self.ref_channels
    }

    fn feed(&mut self, samples: &[i16]) {
        if samples.len() != self.chunk * self.channels() {
            log::warn!(
                "Software front-end: chunk of {} samples, expected {}",
                samples.len(),
                self.chunk * self.channels()
            );
            return;
        }
        if self.pending.len() >= MAX_PENDING_CHUNKS {
            log::warn!("Software front-end: ring buffer full, dropping oldest chunk");
            self.pending.pop_front();
        }
        self.pending.push_back(samples.to_vec());
    }

    fn fetch(&mut self) -> Option<FetchResult> {
        let samples = self.pending.pop_front()?;
        self.deinterleave(&samples);

        if let Some(aec) = self.aec.as_mut() {
            aec.process(&mut self.mic, &self.reference);
        }

        // VAD looks at the echo-cancelled signal before suppression
        let vad = self.vad.as_mut().map(|vad| vad.process(&self.mic));

        if let Some(ns) = self.ns.as_mut() {
            ns.process(&mut self.mic);
        }

        let data: Vec<i16> = self
            .mic
            .iter()
            .map(|&s| (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();

        let wake_word = self.wake_word.as_mut().and_then(|ww| ww.detect(&data));

        Some(FetchResult { data, vad, wake_word })
    }

    fn reset(&mut self) {
        self.pending.clear();
        if let Some(aec) = self.aec.as_mut() {
            aec.reset();
        }
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        if let Some(ns) = self.ns.as_mut() {
            ns.reset();
        }
        if let Some(ww) = self.wake_word.as_mut() {
            ww.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::afe_config::SettingRange;
    use crate::audio::front_end::VadState;

    fn config(aec: bool, ref_channels: u32) -> FrontEndConfig {
        FrontEndConfig {
            sample_rate: 16000,
            mic_channels: 1,
            ref_channels,
            aec_enabled: aec,
            vad_enabled: true,
            suppression_level: 0,
            suppression_range: SettingRange::new(0, 4),
            vad_sensitivity: 0,
            vad_sensitivity_range: SettingRange::new(0, 4),
            vad_min_speech_ms: 60,
            vad_min_noise_ms: 60,
            aec_filter_ms: 4,
        }
    }

    fn tone(n: usize, channels: usize, amplitude: f32) -> Vec<i16> {
        (0..n)
            .flat_map(|i| {
                let s = amplitude * (i as f32 * 2.0 * std::f32::consts::PI * 300.0 / 16000.0).sin();
                std::iter::repeat_n(s as i16, channels)
            })
            .collect()
    }

    struct Keyword;

    impl WakeWordDetector for Keyword {
        fn detect(&mut self, samples: &[i16]) -> Option<String> {
            samples.iter().any(|&s| s > 1000).then(|| "hey santa".to_string())
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn chunk_size_depends_on_aec() {
        let with_aec = SoftwareFrontEnd::new(&config(true, 1), None).unwrap();
        let without = SoftwareFrontEnd::new(&config(false, 1), None).unwrap();
        assert_eq!(with_aec.feed_chunksize(), 480);
        assert_eq!(without.feed_chunksize(), 320);
        assert_eq!(with_aec.channels(), 2);

        // AEC without a reference channel falls back to the short chunk
        let no_ref = SoftwareFrontEnd::new(&config(true, 0), None).unwrap();
        assert_eq!(no_ref.feed_chunksize(), 320);
    }

    #[test]
    fn rejects_bad_config() {
        let mut bad = config(false, 0);
        bad.sample_rate = 44110;
        assert!(SoftwareFrontEnd::new(&bad, None).is_err());

        let mut bad = config(false, 0);
        bad.mic_channels = 0;
        assert!(SoftwareFrontEnd::new(&bad, None).is_err());
    }

    #[test]
    fn wrong_sized_chunk_is_ignored() {
        let mut model = SoftwareFrontEnd::new(&config(false, 0), None).unwrap();
        model.feed(&[0; 100]);
        assert!(model.fetch().is_none());
    }

    #[test]
    fn silence_then_tone_flips_vad() {
        let mut model = SoftwareFrontEnd::new(&config(false, 0), None).unwrap();
        let chunk = model.feed_chunksize();

        model.feed(&vec![0; chunk]);
        let result = model.fetch().unwrap();
        assert_eq!(result.vad, Some(VadState::Silence));
        assert_eq!(result.data.len(), chunk);

        let loud = tone(chunk, 1, 8000.0);
        let mut states = Vec::new();
        for _ in 0..4 {
            model.feed(&loud);
            states.push(model.fetch().unwrap().vad);
        }
        assert_eq!(states.last(), Some(&Some(VadState::Speech)));
    }

    #[test]
    fn reset_drops_pending_input_and_speech_state() {
        let mut model = SoftwareFrontEnd::new(&config(false, 0), None).unwrap();
        let chunk = model.feed_chunksize();
        let loud = tone(chunk, 1, 8000.0);
        for _ in 0..4 {
            model.feed(&loud);
            model.fetch();
        }
        model.feed(&loud);
        model.feed(&loud);

        model.reset();
        assert!(model.fetch().is_none());

        // one loud chunk is below the minimum speech run again
        model.feed(&loud);
        assert_eq!(model.fetch().unwrap().vad, Some(VadState::Silence));
    }

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let mut model = SoftwareFrontEnd::new(&config(false, 0), None).unwrap();
        let chunk = model.feed_chunksize();
        for _ in 0..MAX_PENDING_CHUNKS + 3 {
            model.feed(&vec![0; chunk]);
        }
        let mut fetched = 0;
        while model.fetch().is_some() {
            fetched += 1;
        }
        assert_eq!(fetched, MAX_PENDING_CHUNKS);
    }

    #[test]
    fn wake_word_detector_sees_output() {
        let factory: WakeWordFactory = Arc::new(|| Box::new(Keyword));
        let provider = SoftwareFrontEndProvider::new().with_wake_word(factory);
        let mut model = provider.create(&config(false, 0)).unwrap();
        let chunk = model.feed_chunksize();

        model.feed(&vec![0; chunk]);
        assert_eq!(model.fetch().unwrap().wake_word, None);

        model.feed(&tone(chunk, 1, 8000.0));
        assert_eq!(model.fetch().unwrap().wake_word.as_deref(), Some("hey santa"));
    }

    #[test]
    fn echo_is_reduced_with_reference() {
        let mut model = SoftwareFrontEnd::new(&config(true, 1), None).unwrap();
        let chunk = model.feed_chunksize();

        // mic hears the reference at half level, no near-end speech
        let mut last_energy = 0.0f64;
        let mut first_energy = 0.0f64;
        for n in 0..60 {
            let mut interleaved = Vec::with_capacity(chunk * 2);
            for i in 0..chunk {
                let t = (n * chunk + i) as u32;
                let r = ((t.wrapping_mul(2_654_435_761) >> 16) as i16) / 4;
                interleaved.push(r / 2);
                interleaved.push(r);
            }
            model.feed(&interleaved);
            let out = model.fetch().unwrap().data;
            let energy: f64 = out.iter().map(|&s| (s as f64) * (s as f64)).sum();
            if n == 0 {
                first_energy = energy;
            }
            last_energy = energy;
        }
        assert!(last_energy < first_energy * 0.1);
    }
}
