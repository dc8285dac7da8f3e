use serde::{Deserialize, Serialize};

use crate::audio::{AecMode, AfeSettings, SettingRange};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub board_name: &'static str,

    // 音频采集配置
    pub capture_device: &'static str,
    pub sample_rate: u32,
    pub input_channels: u32,
    pub input_reference: bool,
    pub frame_duration_ms: u32,
    pub feed_queue_capacity: usize,
    pub event_queue_capacity: usize,

    // AFE 配置
    pub afe_backend: &'static str,
    pub aec_mode: i32,
    pub suppression_level: i32,
    pub suppression_level_range: (i32, i32),
    pub vad_sensitivity: i32,
    pub vad_sensitivity_range: (i32, i32),
    pub vad_enabled: bool,
    pub vad_min_speech_ms: u32,
    pub vad_min_noise_ms: u32,
    pub aec_filter_ms: u32,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),
            board_name: env!("BOARD_NAME"),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            input_channels: env!("AUDIO_INPUT_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_INPUT_CHANNELS")?,
            input_reference: env!("AUDIO_INPUT_REFERENCE").parse()
                .map_err(|_| "Failed to parse AUDIO_INPUT_REFERENCE")?,
            frame_duration_ms: env!("AUDIO_FRAME_DURATION_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_FRAME_DURATION_MS")?,
            feed_queue_capacity: env!("AUDIO_FEED_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse AUDIO_FEED_QUEUE_CAPACITY")?,
            event_queue_capacity: env!("AUDIO_EVENT_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse AUDIO_EVENT_QUEUE_CAPACITY")?,

            afe_backend: env!("AFE_BACKEND"),
            aec_mode: env!("AFE_AEC_MODE").parse()
                .map_err(|_| "Failed to parse AFE_AEC_MODE")?,
            suppression_level: env!("AFE_SUPPRESSION_LEVEL").parse()
                .map_err(|_| "Failed to parse AFE_SUPPRESSION_LEVEL")?,
            suppression_level_range: (
                env!("AFE_SUPPRESSION_LEVEL_MIN").parse()
                    .map_err(|_| "Failed to parse AFE_SUPPRESSION_LEVEL_MIN")?,
                env!("AFE_SUPPRESSION_LEVEL_MAX").parse()
                    .map_err(|_| "Failed to parse AFE_SUPPRESSION_LEVEL_MAX")?,
            ),
            vad_sensitivity: env!("AFE_VAD_SENSITIVITY").parse()
                .map_err(|_| "Failed to parse AFE_VAD_SENSITIVITY")?,
            vad_sensitivity_range: (
                env!("AFE_VAD_SENSITIVITY_MIN").parse()
                    .map_err(|_| "Failed to parse AFE_VAD_SENSITIVITY_MIN")?,
                env!("AFE_VAD_SENSITIVITY_MAX").parse()
                    .map_err(|_| "Failed to parse AFE_VAD_SENSITIVITY_MAX")?,
            ),
            vad_enabled: env!("AFE_VAD_ENABLED").parse()
                .map_err(|_| "Failed to parse AFE_VAD_ENABLED")?,
            vad_min_speech_ms: env!("AFE_VAD_MIN_SPEECH_MS").parse()
                .map_err(|_| "Failed to parse AFE_VAD_MIN_SPEECH_MS")?,
            vad_min_noise_ms: env!("AFE_VAD_MIN_NOISE_MS").parse()
                .map_err(|_| "Failed to parse AFE_VAD_MIN_NOISE_MS")?,
            aec_filter_ms: env!("AFE_AEC_FILTER_MS").parse()
                .map_err(|_| "Failed to parse AFE_AEC_FILTER_MS")?,
        })
    }

    /// Build the initial AFE settings. Out-of-range values are clamped the
    /// same way the runtime setters clamp them.
    pub fn afe_settings(&self) -> AfeSettings {
        let mut settings = AfeSettings::with_ranges(
            SettingRange::new(self.suppression_level_range.0, self.suppression_level_range.1),
            SettingRange::new(self.vad_sensitivity_range.0, self.vad_sensitivity_range.1),
        );
        settings.set_aec_mode(AecMode::from_code(self.aec_mode));
        settings.set_suppression_level(self.suppression_level);
        settings.set_vad_sensitivity(self.vad_sensitivity);
        settings.set_vad_enabled(self.vad_enabled);
        settings.vad_min_speech_ms = self.vad_min_speech_ms;
        settings.vad_min_noise_ms = self.vad_min_noise_ms;
        settings.aec_filter_ms = self.aec_filter_ms;
        settings
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.sample_rate > 0);
        assert!(config.input_channels > 0);
        assert!(config.frame_duration_ms > 0);
        assert!(config.suppression_level_range.0 <= config.suppression_level_range.1);
    }

    #[test]
    fn afe_settings_respect_configured_ranges() {
        let mut config = Config::new().unwrap();
        config.suppression_level = 99;
        config.suppression_level_range = (0, 3);
        config.vad_sensitivity = -5;
        config.vad_sensitivity_range = (1, 2);

        let settings = config.afe_settings();
        assert_eq!(settings.suppression_level(), 3);
        assert_eq!(settings.vad_sensitivity(), 1);
    }
}
