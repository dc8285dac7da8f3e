use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use heysanta::audio::{AfeAudioProcessor, AudioCodec, FrontEndProvider, SoftwareFrontEndProvider};
use heysanta::config::Config;
use heysanta::controller::VoiceController;
use tokio::signal;

/// Interval between AFE status reports in the log.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    log::info!(
        "{} v{} starting on {}",
        config.app_name,
        config.app_version,
        config.board_name
    );

    // 打开音频采集
    let codec = open_codec(&config)?;

    // 创建 AFE 引擎
    let engine = Arc::new(AfeAudioProcessor::with_settings(
        front_end_provider(config.afe_backend),
        config.afe_settings(),
        config.feed_queue_capacity,
    ));
    if let Err(e) = engine.initialize(&*codec, config.frame_duration_ms) {
        // 继续运行，但不做音频处理
        log::error!("AFE initialization failed, running without audio processing: {}", e);
    }
    engine.log_available_aec_modes();
    engine.log_afe_status();

    let mut rx_audio_event = engine.subscribe(config.event_queue_capacity);
    engine.start().context("Failed to start AFE processing task")?;

    // 采集线程，把音频帧送入 AFE
    let running = Arc::new(AtomicBool::new(true));
    let capture = spawn_capture(codec, engine.clone(), running.clone())?;

    let mut controller = VoiceController::new();
    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
    status_timer.tick().await;

    log::info!("Voice front-end started. State: {:?}", controller.state());

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 监听来自 AFE 的音频事件
            event = rx_audio_event.recv() => {
                match event {
                    Some(event) => controller.handle_event(event),
                    None => {
                        log::warn!("AFE event channel closed");
                        break;
                    }
                }
            }

            _ = status_timer.tick() => {
                engine.log_afe_status();
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    engine.stop();
    if capture.join().is_err() {
        log::error!("Audio capture thread panicked");
    }
    log::info!(
        "Shut down after {} utterances",
        controller.completed().len()
    );
    Ok(())
}

fn front_end_provider(backend: &str) -> Box<dyn FrontEndProvider> {
    match backend {
        "software" => Box::new(SoftwareFrontEndProvider::new()),
        #[cfg(feature = "speexdsp")]
        "speex" => Box::new(heysanta::audio::SpeexFrontEndProvider),
        other => {
            log::warn!("AFE backend '{}' is not available, using software", other);
            Box::new(SoftwareFrontEndProvider::new())
        }
    }
}

#[cfg(feature = "alsa-codec")]
fn open_codec(config: &Config) -> anyhow::Result<Box<dyn AudioCodec>> {
    let codec = heysanta::audio::AlsaCodec::open(
        config.capture_device,
        config.sample_rate,
        config.input_channels,
        config.input_reference,
    )
    .with_context(|| format!("Failed to open capture device '{}'", config.capture_device))?;
    Ok(Box::new(codec))
}

#[cfg(not(feature = "alsa-codec"))]
fn open_codec(config: &Config) -> anyhow::Result<Box<dyn AudioCodec>> {
    log::warn!(
        "Built without ALSA support, capturing silence instead of '{}'",
        config.capture_device
    );
    Ok(Box::new(heysanta::audio::IdleCodec::new(heysanta::audio::CodecFormat {
        sample_rate: config.sample_rate,
        input_channels: config.input_channels,
        input_reference: config.input_reference,
    })))
}

/// Read `feed_size()` samples at a time from the codec and feed the engine.
fn spawn_capture(
    mut codec: Box<dyn AudioCodec>,
    engine: Arc<AfeAudioProcessor>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let channels = codec.format().input_channels.max(1) as usize;
    let handle = thread::Builder::new()
        .name("audio-capture".into())
        .spawn(move || {
            let mut buf = Vec::new();
            while running.load(Ordering::SeqCst) {
                let feed_size = engine.feed_size();
                if feed_size == 0 {
                    // disabled or mid-rebuild
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
                buf.resize(feed_size, 0);
                match codec.read(&mut buf) {
                    Ok(frames) if frames * channels == feed_size => engine.feed(buf.clone()),
                    Ok(frames) => {
                        log::debug!("Short capture read: {} frames", frames);
                    }
                    Err(e) => {
                        log::error!("Audio capture error: {}", e);
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            log::info!("Audio capture thread exited");
        })
        .context("Failed to spawn audio capture thread")?;
    Ok(handle)
}
