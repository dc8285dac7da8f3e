//! Front-end model backed by SpeexDSP: acoustic echo canceller plus the
//! preprocessor's denoiser and VAD.

use std::ffi::{c_int, c_void};

use super::error::AfeError;
use super::front_end::{FetchResult, FrontEnd, FrontEndConfig, FrontEndProvider, VadState};

// ======================== FFI declarations ========================

/// Opaque type for SpeexPreprocessState
#[repr(C)]
pub struct SpeexPreprocessState {
    _private: [u8; 0],
}

/// Opaque type for SpeexEchoState
#[repr(C)]
pub struct SpeexEchoState {
    _private: [u8; 0],
}

// Preprocessor request constants
const SPEEX_PREPROCESS_SET_DENOISE: c_int = 0;
const SPEEX_PREPROCESS_SET_VAD: c_int = 4;
const SPEEX_PREPROCESS_SET_NOISE_SUPPRESS: c_int = 8;
const SPEEX_PREPROCESS_SET_PROB_START: c_int = 14;
const SPEEX_PREPROCESS_SET_PROB_CONTINUE: c_int = 16;
const SPEEX_PREPROCESS_SET_ECHO_STATE: c_int = 24;

// Echo canceller request constants
const SPEEX_ECHO_SET_SAMPLING_RATE: c_int = 24;

unsafe extern "C" {
    fn speex_preprocess_state_init(frame_size: c_int, sampling_rate: c_int)
        -> *mut SpeexPreprocessState;
    fn speex_preprocess_state_destroy(st: *mut SpeexPreprocessState);
    fn speex_preprocess_run(st: *mut SpeexPreprocessState, x: *mut i16) -> c_int;
    fn speex_preprocess_ctl(
        st: *mut SpeexPreprocessState,
        request: c_int,
        ptr: *mut c_void,
    ) -> c_int;

    fn speex_echo_state_init(frame_size: c_int, filter_length: c_int) -> *mut SpeexEchoState;
    fn speex_echo_state_destroy(st: *mut SpeexEchoState);
    fn speex_echo_cancellation(
        st: *mut SpeexEchoState,
        rec: *const i16,
        play: *const i16,
        out: *mut i16,
    );
    fn speex_echo_state_reset(st: *mut SpeexEchoState);
    fn speex_echo_ctl(st: *mut SpeexEchoState, request: c_int, ptr: *mut c_void) -> c_int;
}

/// Frame length handed to SpeexDSP.
const SPEEX_FRAME_MS: u32 = 20;

/// Noise attenuation at full suppression strength, in dB.
const MAX_NOISE_SUPPRESS_DB: f32 = 45.0;

// ======================== Preprocessor (denoise + VAD) ========================

/// Safe wrapper around SpeexPreprocessState.
pub struct Preprocessor {
    state: *mut SpeexPreprocessState,
}

// SpeexPreprocessState is used from a single thread only
unsafe impl Send for Preprocessor {}

impl Preprocessor {
    /// Create a new preprocessor for a given frame size (in samples) and sample rate.
    pub fn new(frame_size: usize, sample_rate: u32) -> Result<Self, AfeError> {
        let state = unsafe {
            speex_preprocess_state_init(frame_size as c_int, sample_rate as c_int)
        };
        if state.is_null() {
            return Err(AfeError::AllocationFailed(
                "speex_preprocess_state_init returned null".into(),
            ));
        }
        Ok(Self { state })
    }

    fn ctl_int(&mut self, request: c_int, value: i32) {
        let mut val: c_int = value;
        unsafe {
            speex_preprocess_ctl(self.state, request, &mut val as *mut c_int as *mut c_void);
        }
    }

    pub fn set_denoise(&mut self, enable: bool) {
        self.ctl_int(SPEEX_PREPROCESS_SET_DENOISE, enable as i32);
    }

    /// Set noise suppress level in dB (negative value, e.g. -25).
    pub fn set_noise_suppress(&mut self, level: i32) {
        self.ctl_int(SPEEX_PREPROCESS_SET_NOISE_SUPPRESS, level);
    }

    pub fn set_vad(&mut self, enable: bool) {
        self.ctl_int(SPEEX_PREPROCESS_SET_VAD, enable as i32);
    }

    /// Speech probabilities (percent) to enter and to stay in speech.
    pub fn set_vad_probabilities(&mut self, start: i32, cont: i32) {
        self.ctl_int(SPEEX_PREPROCESS_SET_PROB_START, start);
        self.ctl_int(SPEEX_PREPROCESS_SET_PROB_CONTINUE, cont);
    }

    /// Let the preprocessor suppress residual echo from this canceller.
    pub fn set_echo_state(&mut self, echo: &EchoState) {
        unsafe {
            speex_preprocess_ctl(
                self.state,
                SPEEX_PREPROCESS_SET_ECHO_STATE,
                echo.state as *mut c_void,
            );
        }
    }

    /// Run the preprocessor on a frame of 16-bit PCM mono samples in place.
    /// Returns the VAD decision when VAD is enabled.
    pub fn process(&mut self, samples: &mut [i16]) -> bool {
        unsafe { speex_preprocess_run(self.state, samples.as_mut_ptr()) != 0 }
    }
}

impl Drop for Preprocessor {
    fn drop(&mut self) {
        unsafe {
            speex_preprocess_state_destroy(self.state);
        }
    }
}

// ======================== Echo canceller ========================

/// Safe wrapper around SpeexEchoState.
pub struct EchoState {
    state: *mut SpeexEchoState,
    frame_size: usize,
}

unsafe impl Send for EchoState {}

impl EchoState {
    pub fn new(frame_size: usize, filter_length: usize, sample_rate: u32) -> Result<Self, AfeError> {
        let state = unsafe { speex_echo_state_init(frame_size as c_int, filter_length as c_int) };
        if state.is_null() {
            return Err(AfeError::AllocationFailed(
                "speex_echo_state_init returned null".into(),
            ));
        }
        let mut rate: c_int = sample_rate as c_int;
        unsafe {
            speex_echo_ctl(
                state,
                SPEEX_ECHO_SET_SAMPLING_RATE,
                &mut rate as *mut c_int as *mut c_void,
            );
        }
        Ok(Self { state, frame_size })
    }

    /// Remove the `play` echo from `rec` into `out`. All three are one frame.
    pub fn cancel(&mut self, rec: &[i16], play: &[i16], out: &mut [i16]) {
        debug_assert!(rec.len() == self.frame_size && play.len() == self.frame_size);
        debug_assert!(out.len() == self.frame_size);
        unsafe {
            speex_echo_cancellation(self.state, rec.as_ptr(), play.as_ptr(), out.as_mut_ptr());
        }
    }

    pub fn reset(&mut self) {
        unsafe {
            speex_echo_state_reset(self.state);
        }
    }
}

impl Drop for EchoState {
    fn drop(&mut self) {
        unsafe {
            speex_echo_state_destroy(self.state);
        }
    }
}

// ======================== Front-end model ========================

pub struct SpeexFrontEndProvider;

impl FrontEndProvider for SpeexFrontEndProvider {
    fn name(&self) -> &str {
        "speex"
    }

    fn create(&self, config: &FrontEndConfig) -> Result<Box<dyn FrontEnd>, AfeError> {
        Ok(Box::new(SpeexFrontEnd::new(config)?))
    }
}

pub struct SpeexFrontEnd {
    chunk: usize,
    mic_channels: usize,
    ref_channels: usize,
    vad_enabled: bool,
    pending: Option<Vec<i16>>,
    // echo must be dropped after the preprocessor that points at it
    preprocessor: Preprocessor,
    echo: Option<EchoState>,
    mic: Vec<i16>,
    reference: Vec<i16>,
    cleaned: Vec<i16>,
    hangover: Hangover,
}

impl SpeexFrontEnd {
    pub fn new(config: &FrontEndConfig) -> Result<Self, AfeError> {
        if config.sample_rate == 0 || config.sample_rate % 1000 != 0 || config.mic_channels == 0 {
            return Err(AfeError::InvalidConfig(format!(
                "speex front-end needs a kHz sample rate and a microphone, got {}Hz/{} mics",
                config.sample_rate, config.mic_channels
            )));
        }
        let chunk = config.samples_per_ms() * SPEEX_FRAME_MS as usize;

        let echo = if config.aec_enabled && config.ref_channels > 0 {
            let filter = config.samples_per_ms() * config.aec_filter_ms.max(1) as usize;
            Some(EchoState::new(chunk, filter, config.sample_rate)?)
        } else {
            None
        };

        let mut preprocessor = Preprocessor::new(chunk, config.sample_rate)?;
        let strength = config.suppression_strength();
        preprocessor.set_denoise(strength > 0.0);
        if strength > 0.0 {
            preprocessor.set_noise_suppress(-(MAX_NOISE_SUPPRESS_DB * strength).round() as i32);
        }
        preprocessor.set_vad(config.vad_enabled);
        if config.vad_enabled {
            let start = 85 - (40.0 * config.vad_strength()).round() as i32;
            preprocessor.set_vad_probabilities(start, start - 15);
        }
        if let Some(echo) = echo.as_ref() {
            preprocessor.set_echo_state(echo);
        }

        log::debug!(
            "Speex front-end: chunk={}, aec={}, vad={}, ns={:.2}",
            chunk,
            echo.is_some(),
            config.vad_enabled,
            strength,
        );

        Ok(Self {
            chunk,
            mic_channels: config.mic_channels as usize,
            ref_channels: config.ref_channels as usize,
            vad_enabled: config.vad_enabled,
            pending: None,
            preprocessor,
            echo,
            mic: vec![0; chunk],
            reference: vec![0; chunk],
            cleaned: vec![0; chunk],
            hangover: Hangover::new(
                config.vad_min_speech_ms.div_ceil(SPEEX_FRAME_MS),
                config.vad_min_noise_ms.div_ceil(SPEEX_FRAME_MS),
            ),
        })
    }
}

impl FrontEnd for SpeexFrontEnd {
    fn feed_chunksize(&self) -> usize {
        self.chunk
    }

    fn channels(&self) -> usize {
        self.mic_channels + self.ref_channels
    }

    fn feed(&mut self, samples: &[i16]) {
        if samples.len() != self.chunk * self.channels() {
            log::warn!("Speex front-end: unexpected chunk of {} samples", samples.len());
            return;
        }
        if self.pending.replace(samples.to_vec()).is_some() {
            log::warn!("Speex front-end: chunk overwritten before fetch");
        }
    }

    fn fetch(&mut self) -> Option<FetchResult> {
        let samples = self.pending.take()?;
        let channels = self.channels();
        for (i, frame) in samples.chunks_exact(channels).enumerate() {
            let sum: i32 = frame[..self.mic_channels].iter().map(|&s| s as i32).sum();
            self.mic[i] = (sum / self.mic_channels as i32) as i16;
            self.reference[i] = if self.ref_channels > 0 { frame[self.mic_channels] } else { 0 };
        }

        match self.echo.as_mut() {
            Some(echo) => echo.cancel(&self.mic, &self.reference, &mut self.cleaned),
            None => self.cleaned.copy_from_slice(&self.mic),
        }
        let voiced = self.preprocessor.process(&mut self.cleaned);
        let vad = self.vad_enabled.then(|| self.hangover.update(voiced));

        Some(FetchResult {
            data: self.cleaned.clone(),
            vad,
            wake_word: None,
        })
    }

    fn reset(&mut self) {
        self.pending = None;
        if let Some(echo) = self.echo.as_mut() {
            echo.reset();
        }
        self.hangover.reset();
    }
}

/// Debounces raw per-frame VAD decisions.
struct Hangover {
    speech_frames: u32,
    noise_frames: u32,
    run: u32,
    state: VadState,
}

impl Hangover {
    fn new(speech_frames: u32, noise_frames: u32) -> Self {
        Self {
            speech_frames: speech_frames.max(1),
            noise_frames: noise_frames.max(1),
            run: 0,
            state: VadState::Silence,
        }
    }

    fn update(&mut self, voiced: bool) -> VadState {
        let (agrees, needed) = match self.state {
            VadState::Silence => (!voiced, self.speech_frames),
            VadState::Speech => (voiced, self.noise_frames),
        };
        if agrees {
            self.run = 0;
        } else {
            self.run += 1;
            if self.run >= needed {
                self.run = 0;
                self.state = match self.state {
                    VadState::Silence => VadState::Speech,
                    VadState::Speech => VadState::Silence,
                };
            }
        }
        self.state
    }

    fn reset(&mut self) {
        self.run = 0;
        self.state = VadState::Silence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangover_needs_consecutive_frames() {
        let mut hangover = Hangover::new(3, 2);
        assert_eq!(hangover.update(true), VadState::Silence);
        assert_eq!(hangover.update(true), VadState::Silence);
        assert_eq!(hangover.update(true), VadState::Speech);
        assert_eq!(hangover.update(false), VadState::Speech);
        assert_eq!(hangover.update(true), VadState::Speech);
        assert_eq!(hangover.update(false), VadState::Speech);
        assert_eq!(hangover.update(false), VadState::Silence);
    }

    #[test]
    fn hangover_reset_returns_to_silence() {
        let mut hangover = Hangover::new(1, 1);
        assert_eq!(hangover.update(true), VadState::Speech);
        hangover.reset();
        assert_eq!(hangover.update(false), VadState::Silence);
    }
}
