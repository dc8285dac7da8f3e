//! Configuration controller state for the audio front-end.
//!
//! `AfeSettings` is the single source of truth for the AEC mode, noise
//! suppression level and VAD sensitivity. Setters clamp into the configured
//! ranges and report whether anything changed, so the engine only rebuilds
//! its model when a model parameter actually moved.

use serde::Serialize;

use super::codec::CodecFormat;
use super::front_end::FrontEndConfig;

/// Where acoustic echo cancellation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AecMode {
    Off,
    /// AEC runs inside the front-end model on this device.
    OnDevice,
    /// Echo is removed elsewhere (e.g. by the remote service).
    OnServer,
}

impl AecMode {
    pub const ALL: [AecMode; 3] = [AecMode::Off, AecMode::OnDevice, AecMode::OnServer];

    pub fn code(self) -> i32 {
        match self {
            AecMode::Off => 0,
            AecMode::OnDevice => 1,
            AecMode::OnServer => 2,
        }
    }

    /// Map a numeric mode to an `AecMode`, clamping unknown codes to the
    /// nearest supported one.
    pub fn from_code(code: i32) -> Self {
        match code {
            i32::MIN..=0 => AecMode::Off,
            1 => AecMode::OnDevice,
            _ => AecMode::OnServer,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AecMode::Off => "echo cancellation disabled",
            AecMode::OnDevice => "echo cancellation in the on-device front-end",
            AecMode::OnServer => "echo cancellation on the remote service",
        }
    }
}

/// Inclusive range of accepted values for an integer setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettingRange {
    pub min: i32,
    pub max: i32,
}

impl SettingRange {
    pub fn new(a: i32, b: i32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AfeSettings {
    aec_mode: AecMode,
    suppression_level: i32,
    vad_sensitivity: i32,
    vad_enabled: bool,
    has_reference: bool,
    suppression_range: SettingRange,
    vad_sensitivity_range: SettingRange,
    /// Speech must persist this long before the VAD reports speech.
    pub vad_min_speech_ms: u32,
    /// Silence must persist this long before the VAD reports silence.
    pub vad_min_noise_ms: u32,
    /// Length of the echo path modelled by the echo canceller.
    pub aec_filter_ms: u32,
}

impl Default for AfeSettings {
    fn default() -> Self {
        Self::with_ranges(SettingRange::new(0, 4), SettingRange::new(0, 4))
    }
}

impl AfeSettings {
    pub fn with_ranges(suppression_range: SettingRange, vad_sensitivity_range: SettingRange) -> Self {
        Self {
            aec_mode: AecMode::OnDevice,
            suppression_level: suppression_range.clamp(2),
            vad_sensitivity: vad_sensitivity_range.clamp(0),
            vad_enabled: true,
            has_reference: false,
            suppression_range,
            vad_sensitivity_range,
            vad_min_speech_ms: 128,
            vad_min_noise_ms: 100,
            aec_filter_ms: 16,
        }
    }

    pub fn aec_mode(&self) -> AecMode {
        self.aec_mode
    }

    pub fn suppression_level(&self) -> i32 {
        self.suppression_level
    }

    pub fn suppression_range(&self) -> SettingRange {
        self.suppression_range
    }

    pub fn vad_sensitivity(&self) -> i32 {
        self.vad_sensitivity
    }

    pub fn vad_sensitivity_range(&self) -> SettingRange {
        self.vad_sensitivity_range
    }

    pub fn is_vad_enabled(&self) -> bool {
        self.vad_enabled
    }

    /// AEC only runs on-device when the codec captures a playback reference.
    pub fn is_aec_enabled(&self) -> bool {
        self.aec_mode == AecMode::OnDevice && self.has_reference
    }

    pub fn has_reference(&self) -> bool {
        self.has_reference
    }

    pub(crate) fn set_has_reference(&mut self, has_reference: bool) {
        self.has_reference = has_reference;
    }

    /// Returns true if the value changed.
    pub fn set_aec_mode(&mut self, mode: AecMode) -> bool {
        let changed = self.aec_mode != mode;
        self.aec_mode = mode;
        changed
    }

    pub fn set_suppression_level(&mut self, level: i32) -> bool {
        let clamped = self.suppression_range.clamp(level);
        if !self.suppression_range.contains(level) {
            log::warn!(
                "Suppression level {} out of range [{}, {}], clamped to {}",
                level,
                self.suppression_range.min,
                self.suppression_range.max,
                clamped,
            );
        }
        let changed = self.suppression_level != clamped;
        self.suppression_level = clamped;
        changed
    }

    pub fn set_vad_sensitivity(&mut self, sensitivity: i32) -> bool {
        let clamped = self.vad_sensitivity_range.clamp(sensitivity);
        if !self.vad_sensitivity_range.contains(sensitivity) {
            log::warn!(
                "VAD sensitivity {} out of range [{}, {}], clamped to {}",
                sensitivity,
                self.vad_sensitivity_range.min,
                self.vad_sensitivity_range.max,
                clamped,
            );
        }
        let changed = self.vad_sensitivity != clamped;
        self.vad_sensitivity = clamped;
        changed
    }

    pub fn set_vad_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.vad_enabled != enabled;
        self.vad_enabled = enabled;
        changed
    }

    /// Model parameters for the given codec input format.
    pub fn front_end_config(&self, format: &CodecFormat) -> FrontEndConfig {
        // a lone channel is always the microphone
        let ref_channels = if format.input_reference && format.input_channels >= 2 { 1 } else { 0 };
        FrontEndConfig {
            sample_rate: format.sample_rate,
            mic_channels: format.input_channels.saturating_sub(ref_channels),
            ref_channels,
            aec_enabled: self.is_aec_enabled(),
            vad_enabled: self.vad_enabled,
            suppression_level: self.suppression_level,
            suppression_range: self.suppression_range,
            vad_sensitivity: self.vad_sensitivity,
            vad_sensitivity_range: self.vad_sensitivity_range,
            vad_min_speech_ms: self.vad_min_speech_ms,
            vad_min_noise_ms: self.vad_min_noise_ms,
            aec_filter_ms: self.aec_filter_ms,
        }
    }
}

/// Counters kept by `feed()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub accepted: u64,
    pub size_mismatch: u64,
    pub queue_full: u64,
    pub disabled: u64,
}

/// Snapshot of the engine for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AfeStatus {
    pub initialized: bool,
    pub disabled: bool,
    pub running: bool,
    pub aec_mode: AecMode,
    pub aec_enabled: bool,
    pub vad_enabled: bool,
    pub suppression_level: i32,
    pub vad_sensitivity: i32,
    pub feed_size: usize,
    pub output_frame_samples: usize,
    pub is_speaking: bool,
    pub queued_frames: usize,
    pub queue_capacity: usize,
    pub feed: FeedStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_with_reference() -> CodecFormat {
        CodecFormat {
            sample_rate: 16000,
            input_channels: 2,
            input_reference: true,
        }
    }

    #[test]
    fn defaults_match_device_profile() {
        let settings = AfeSettings::default();
        assert_eq!(settings.aec_mode(), AecMode::OnDevice);
        assert_eq!(settings.suppression_level(), 2);
        assert_eq!(settings.vad_sensitivity(), 0);
        assert!(settings.is_vad_enabled());
        // no reference channel known yet
        assert!(!settings.is_aec_enabled());
    }

    #[test]
    fn aec_mode_codes_clamp() {
        assert_eq!(AecMode::from_code(-3), AecMode::Off);
        assert_eq!(AecMode::from_code(1), AecMode::OnDevice);
        assert_eq!(AecMode::from_code(7), AecMode::OnServer);
        for mode in AecMode::ALL {
            assert_eq!(AecMode::from_code(mode.code()), mode);
        }
    }

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        let mut settings = AfeSettings::default();
        assert!(settings.set_suppression_level(10));
        assert_eq!(settings.suppression_level(), 4);
        // clamps back to the current value
        assert!(!settings.set_vad_sensitivity(-1));
        assert_eq!(settings.vad_sensitivity(), 0);
    }

    #[test]
    fn unchanged_values_report_no_change() {
        let mut settings = AfeSettings::default();
        assert!(!settings.set_aec_mode(AecMode::OnDevice));
        assert!(!settings.set_suppression_level(2));
        assert!(!settings.set_vad_enabled(true));
        assert!(settings.set_aec_mode(AecMode::OnServer));
    }

    #[test]
    fn aec_requires_reference_channel() {
        let mut settings = AfeSettings::default();
        settings.set_has_reference(true);
        assert!(settings.is_aec_enabled());
        settings.set_aec_mode(AecMode::OnServer);
        assert!(!settings.is_aec_enabled());
    }

    #[test]
    fn front_end_config_splits_channels() {
        let mut settings = AfeSettings::default();
        settings.set_has_reference(true);
        let config = settings.front_end_config(&mono_with_reference());
        assert_eq!(config.mic_channels, 1);
        assert_eq!(config.ref_channels, 1);
        assert!(config.aec_enabled);
        assert_eq!(config.total_channels(), 2);
    }

    #[test]
    fn single_channel_reference_flag_keeps_the_mic() {
        let mut settings = AfeSettings::default();
        settings.set_has_reference(true);
        let config = settings.front_end_config(&CodecFormat {
            sample_rate: 16000,
            input_channels: 1,
            input_reference: true,
        });
        assert_eq!(config.mic_channels, 1);
        assert_eq!(config.ref_channels, 0);
        assert_eq!(config.total_channels(), 1);
    }

    #[test]
    fn range_orders_bounds() {
        let range = SettingRange::new(4, 1);
        assert_eq!(range, SettingRange { min: 1, max: 4 });
        assert!(range.contains(3));
        assert_eq!(range.clamp(9), 4);
    }
}
