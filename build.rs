use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    board: Board,
    audio: Audio,
    afe: Afe,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Board {
    #[serde(rename = "type")]
    type_: String,
    name: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    sample_rate: u32,
    input_channels: u32,
    input_reference: bool,
    frame_duration_ms: u32,
    feed_queue_capacity: usize,
    event_queue_capacity: usize,
}

#[derive(Deserialize)]
struct Afe {
    backend: String,
    aec_mode: i32,
    suppression_level: i32,
    suppression_level_range: [i32; 2],
    vad_sensitivity: i32,
    vad_sensitivity_range: [i32; 2],
    vad_enabled: bool,
    vad_min_speech_ms: u32,
    vad_min_noise_ms: u32,
    aec_filter_ms: u32,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    link_speexdsp();

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用和板子信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);
    println!("cargo:rustc-env=BOARD_TYPE={}", config.board.type_);
    println!("cargo:rustc-env=BOARD_NAME={}", config.board.name);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_INPUT_CHANNELS={}", config.audio.input_channels);
    println!("cargo:rustc-env=AUDIO_INPUT_REFERENCE={}", config.audio.input_reference);
    println!("cargo:rustc-env=AUDIO_FRAME_DURATION_MS={}", config.audio.frame_duration_ms);
    println!("cargo:rustc-env=AUDIO_FEED_QUEUE_CAPACITY={}", config.audio.feed_queue_capacity);
    println!("cargo:rustc-env=AUDIO_EVENT_QUEUE_CAPACITY={}", config.audio.event_queue_capacity);

    // AFE 配置
    println!("cargo:rustc-env=AFE_BACKEND={}", config.afe.backend);
    println!("cargo:rustc-env=AFE_AEC_MODE={}", config.afe.aec_mode);
    println!("cargo:rustc-env=AFE_SUPPRESSION_LEVEL={}", config.afe.suppression_level);
    println!("cargo:rustc-env=AFE_SUPPRESSION_LEVEL_MIN={}", config.afe.suppression_level_range[0]);
    println!("cargo:rustc-env=AFE_SUPPRESSION_LEVEL_MAX={}", config.afe.suppression_level_range[1]);
    println!("cargo:rustc-env=AFE_VAD_SENSITIVITY={}", config.afe.vad_sensitivity);
    println!("cargo:rustc-env=AFE_VAD_SENSITIVITY_MIN={}", config.afe.vad_sensitivity_range[0]);
    println!("cargo:rustc-env=AFE_VAD_SENSITIVITY_MAX={}", config.afe.vad_sensitivity_range[1]);
    println!("cargo:rustc-env=AFE_VAD_ENABLED={}", config.afe.vad_enabled);
    println!("cargo:rustc-env=AFE_VAD_MIN_SPEECH_MS={}", config.afe.vad_min_speech_ms);
    println!("cargo:rustc-env=AFE_VAD_MIN_NOISE_MS={}", config.afe.vad_min_noise_ms);
    println!("cargo:rustc-env=AFE_AEC_FILTER_MS={}", config.afe.aec_filter_ms);
}

// speexdsp 只在启用 speexdsp feature 时链接
fn link_speexdsp() {
    if std::env::var_os("CARGO_FEATURE_SPEEXDSP").is_none() {
        return;
    }

    let target = std::env::var("TARGET").unwrap_or_default();

    if target.contains("musl") {
        // musl 目标：使用手动编译的静态库，不依赖 pkg-config
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=speexdsp");
        return;
    }

    // 其他目标：通过 pkg-config 查找 libspeexdsp
    pkg_config::Config::new()
        .probe("speexdsp")
        .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
}
