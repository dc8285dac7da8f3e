//! The audio front-end engine and its processing task.
//!
//! Uses a dedicated std::thread (NOT a tokio task) for the real-time loop.
//!
//! - `feed()`: caller context → bounded `FeedQueue` (drop on full)
//! - processing thread: queue → model feed/fetch → VAD transitions, output
//!   accumulation, wake words → callbacks and event channel
//!
//! Reconfiguration swaps the model through a pause/acknowledge handshake on
//! the event-flag group: the model is only destroyed once the task has
//! parked itself outside any model call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::afe_config::{AecMode, AfeSettings, AfeStatus, FeedStats};
use super::codec::{AudioCodec, CodecFormat};
use super::error::{AfeError, Result};
use super::event_flags::{EventFlags, PAUSED, PAUSE_REQUEST, RUNNING, STOP_REQUEST, TASK_ALIVE};
use super::events::{AudioEvent, EventDispatcher};
use super::feed_queue::{FeedQueue, QueuedFrame};
use super::front_end::{FetchResult, FrontEnd, FrontEndProvider, VadState};

/// How long the task blocks on an empty queue before re-checking flags.
const FETCH_TIMEOUT: Duration = Duration::from_millis(20);

/// Bound on waiting for the task to acknowledge a pause.
const PAUSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on waiting for the task to exit in `stop()`.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_FEED_QUEUE_CAPACITY: usize = 16;

/// State shared between the control surface and the processing task.
struct Shared {
    flags: EventFlags,
    queue: FeedQueue,
    model: Mutex<Option<Box<dyn FrontEnd>>>,
    settings: Mutex<AfeSettings>,
    format: Mutex<Option<CodecFormat>>,
    feed_size: AtomicUsize,
    output_frame_samples: AtomicUsize,
    is_speaking: AtomicBool,
    /// Speech was cut short by a rebuild or stop; the task reports
    /// `VadChanged(false)` on its next iteration.
    speech_end_pending: AtomicBool,
    /// Bumped on every model rebuild; the task drops per-model state when it
    /// sees a new value.
    generation: AtomicU64,
    processed_frames: AtomicU64,
    stats: Mutex<FeedStats>,
    dispatcher: EventDispatcher,
    task_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    /// Force the speech state back to silence. Only called while the task
    /// is parked or gone.
    fn end_speech(&self) {
        if self.is_speaking.swap(false, Ordering::SeqCst) {
            self.speech_end_pending.store(true, Ordering::SeqCst);
        }
    }
}

struct Control {
    handle: Option<JoinHandle<()>>,
}

/// Audio front-end engine: owns the front-end model and the processing task.
pub struct AfeAudioProcessor {
    shared: Arc<Shared>,
    provider: Box<dyn FrontEndProvider>,
    /// Serializes start/stop/reconfiguration. Never taken by the task.
    control: Mutex<Control>,
}

impl AfeAudioProcessor {
    pub fn new(provider: Box<dyn FrontEndProvider>) -> Self {
        Self::with_settings(provider, AfeSettings::default(), DEFAULT_FEED_QUEUE_CAPACITY)
    }

    pub fn with_settings(
        provider: Box<dyn FrontEndProvider>,
        settings: AfeSettings,
        feed_queue_capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                flags: EventFlags::new(),
                queue: FeedQueue::new(feed_queue_capacity),
                model: Mutex::new(None),
                settings: Mutex::new(settings),
                format: Mutex::new(None),
                feed_size: AtomicUsize::new(0),
                output_frame_samples: AtomicUsize::new(0),
                is_speaking: AtomicBool::new(false),
                speech_end_pending: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                processed_frames: AtomicU64::new(0),
                stats: Mutex::new(FeedStats::default()),
                dispatcher: EventDispatcher::new(),
                task_thread: Mutex::new(None),
            }),
            provider,
            control: Mutex::new(Control { handle: None }),
        }
    }

    /// Bind the codec's input format and allocate the front-end model.
    ///
    /// On allocation failure the engine stays disabled and `feed_size()`
    /// reports 0; the error is logged and also returned.
    pub fn initialize(&self, codec: &dyn AudioCodec, frame_duration_ms: u32) -> Result<()> {
        self.ensure_not_task_thread()?;
        let control = self.control.lock();

        let format = codec.format();
        let output_frame_samples = (frame_duration_ms * format.sample_rate / 1000) as usize;
        self.shared
            .settings
            .lock()
            .set_has_reference(format.input_reference && format.input_channels >= 2);
        *self.shared.format.lock() = Some(format);
        self.shared
            .output_frame_samples
            .store(output_frame_samples, Ordering::SeqCst);

        log::info!(
            "AFE initializing with {} backend: rate={}Hz, ch={}, reference={}, output_frame={} samples",
            self.provider.name(),
            format.sample_rate,
            format.input_channels,
            format.input_reference,
            output_frame_samples,
        );

        self.reinitialize_locked(&control)
    }

    /// Hand one interleaved frame of `feed_size()` samples to the engine.
    /// Never blocks: wrong-sized frames, frames fed while disabled and frames
    /// arriving at a full queue are logged and dropped.
    pub fn feed(&self, samples: Vec<i16>) {
        // loaded before the size so a frame racing a rebuild is tagged stale
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let expected = self.shared.feed_size.load(Ordering::SeqCst);
        if expected == 0 {
            let mut stats = self.shared.stats.lock();
            stats.disabled += 1;
            if stats.disabled == 1 {
                log::warn!("AFE is not ready, dropping fed audio");
            }
            return;
        }
        if samples.len() != expected {
            self.shared.stats.lock().size_mismatch += 1;
            log::warn!(
                "AFE feed size mismatch: got {} samples, expected {}",
                samples.len(),
                expected
            );
            return;
        }
        match self.shared.queue.try_push(QueuedFrame { generation, samples }) {
            Ok(()) => self.shared.stats.lock().accepted += 1,
            Err(_) => {
                let mut stats = self.shared.stats.lock();
                stats.queue_full += 1;
                if stats.queue_full == 1 || stats.queue_full % 100 == 0 {
                    log::warn!(
                        "AFE feed queue full, dropped {} frames so far",
                        stats.queue_full
                    );
                }
            }
        }
    }

    /// Launch the processing task. No-op if it is already running.
    pub fn start(&self) -> Result<()> {
        if self.on_task_thread() {
            return Ok(());
        }
        let mut control = self.control.lock();

        if let Some(handle) = control.handle.take() {
            if !handle.is_finished() {
                control.handle = Some(handle);
                log::debug!("AFE processing task already running");
                return Ok(());
            }
            let _ = handle.join();
        }
        if self.shared.flags.is_set(TASK_ALIVE) {
            log::error!("AFE processing task from a previous stop() is still alive");
            return Err(AfeError::TaskBusy);
        }
        if self.shared.format.lock().is_none() {
            return Err(AfeError::NotInitialized);
        }

        self.shared.flags.clear(STOP_REQUEST | PAUSE_REQUEST | PAUSED);
        self.shared.flags.set(RUNNING | TASK_ALIVE);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("afe-processor".into())
            .spawn(move || processing_task(shared));

        match spawned {
            Ok(handle) => {
                *self.shared.task_thread.lock() = Some(handle.thread().id());
                control.handle = Some(handle);
                log::info!("AFE processing task started");
                Ok(())
            }
            Err(e) => {
                self.shared.flags.clear(RUNNING | TASK_ALIVE);
                log::error!("Failed to spawn AFE processing task: {}", e);
                Err(AfeError::Spawn(e))
            }
        }
    }

    /// Stop the processing task and wait (bounded) for it to leave its
    /// current iteration. The model stays allocated. No-op if not running.
    pub fn stop(&self) {
        if self.on_task_thread() {
            // Called from a callback: the task exits once it returns.
            self.shared.flags.clear(RUNNING);
            self.shared.flags.set(STOP_REQUEST);
            return;
        }
        let mut control = self.control.lock();
        let Some(handle) = control.handle.take() else {
            return;
        };

        self.shared.flags.clear(RUNNING);
        self.shared.flags.set(STOP_REQUEST);

        match self
            .shared
            .flags
            .wait_until(|bits| bits & TASK_ALIVE == 0, STOP_TIMEOUT)
        {
            Some(_) => {
                let _ = handle.join();
                self.shared.flags.clear(STOP_REQUEST);
                // the next start begins from fresh adaptive and VAD state
                if let Some(model) = self.shared.model.lock().as_mut() {
                    model.reset();
                }
                self.shared.end_speech();
            }
            None => {
                // Leave STOP_REQUEST set so the task exits when it can.
                log::warn!(
                    "AFE processing task did not stop within {:?}, detaching",
                    STOP_TIMEOUT
                );
            }
        }

        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            log::debug!("AFE stop discarded {} queued frames", dropped);
        }
        log::info!("AFE processing task stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.flags.is_set(RUNNING | TASK_ALIVE)
    }

    /// Register the output callback, replacing any previous one. Runs on the
    /// processing thread with one complete output unit.
    pub fn on_output<F>(&self, callback: F)
    where
        F: FnMut(Vec<i16>) + Send + 'static,
    {
        self.shared.dispatcher.set_output(Box::new(callback));
    }

    /// Register the VAD callback, replacing any previous one. Runs on the
    /// processing thread once per speech/silence transition.
    pub fn on_vad_state_change<F>(&self, callback: F)
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.shared.dispatcher.set_vad(Box::new(callback));
    }

    pub fn on_wake_word_detected<F>(&self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.shared.dispatcher.set_wake_word(Box::new(callback));
    }

    /// Receive events on the caller's own context instead of (or besides)
    /// callbacks. A new subscription replaces the previous one.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<AudioEvent> {
        self.shared.dispatcher.subscribe(capacity)
    }

    /// Interleaved samples expected per `feed()`; 0 when not initialized or
    /// disabled.
    pub fn feed_size(&self) -> usize {
        self.shared.feed_size.load(Ordering::SeqCst)
    }

    /// Samples per dispatched output unit.
    pub fn output_frame_samples(&self) -> usize {
        self.shared.output_frame_samples.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.is_speaking.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.format.lock().is_some()
    }

    /// Initialized, but the last model allocation failed.
    pub fn is_disabled(&self) -> bool {
        self.is_initialized() && self.shared.model.lock().is_none()
    }

    pub fn queued_frames(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn processed_frames(&self) -> u64 {
        self.shared.processed_frames.load(Ordering::SeqCst)
    }

    pub fn feed_stats(&self) -> FeedStats {
        *self.shared.stats.lock()
    }

    // ======================== Configuration ========================

    /// Run AEC on-device (`true`) or rely on echo cancellation elsewhere.
    pub fn enable_device_aec(&self, enable: bool) -> Result<()> {
        let mode = if enable { AecMode::OnDevice } else { AecMode::OnServer };
        if enable && !self.shared.settings.lock().has_reference() && self.is_initialized() {
            log::warn!("Device AEC requested but the codec has no reference channel");
        }
        self.reconfigure(|settings| settings.set_aec_mode(mode))
    }

    /// Numeric AEC mode (0 = off, 1 = on-device, 2 = on-server); clamped.
    pub fn set_aec_mode(&self, aec_mode: i32) -> Result<()> {
        let mode = AecMode::from_code(aec_mode);
        if mode.code() != aec_mode {
            log::warn!(
                "AEC mode {} out of range [0, 2], clamped to {}",
                aec_mode,
                mode.code()
            );
        }
        self.reconfigure(|settings| settings.set_aec_mode(mode))
    }

    pub fn set_aec_suppression_level(&self, level: i32) -> Result<()> {
        self.reconfigure(|settings| settings.set_suppression_level(level))
    }

    pub fn set_vad_sensitivity(&self, sensitivity: i32) -> Result<()> {
        self.reconfigure(|settings| settings.set_vad_sensitivity(sensitivity))
    }

    pub fn set_vad_enabled(&self, enabled: bool) -> Result<()> {
        self.reconfigure(|settings| settings.set_vad_enabled(enabled))
    }

    pub fn current_aec_mode(&self) -> AecMode {
        self.shared.settings.lock().aec_mode()
    }

    pub fn is_aec_enabled(&self) -> bool {
        self.shared.settings.lock().is_aec_enabled()
    }

    pub fn is_vad_enabled(&self) -> bool {
        self.shared.settings.lock().is_vad_enabled()
    }

    pub fn settings(&self) -> AfeSettings {
        self.shared.settings.lock().clone()
    }

    pub fn available_aec_modes(&self) -> &'static [AecMode] {
        &AecMode::ALL
    }

    pub fn log_available_aec_modes(&self) {
        let current = self.current_aec_mode();
        for mode in AecMode::ALL {
            log::info!(
                "AEC mode {}: {:?} - {}{}",
                mode.code(),
                mode,
                mode.description(),
                if mode == current { " (current)" } else { "" },
            );
        }
    }

    pub fn afe_status(&self) -> AfeStatus {
        let settings = self.settings();
        AfeStatus {
            initialized: self.is_initialized(),
            disabled: self.is_disabled(),
            running: self.is_running(),
            aec_mode: settings.aec_mode(),
            aec_enabled: settings.is_aec_enabled(),
            vad_enabled: settings.is_vad_enabled(),
            suppression_level: settings.suppression_level(),
            vad_sensitivity: settings.vad_sensitivity(),
            feed_size: self.feed_size(),
            output_frame_samples: self.output_frame_samples(),
            is_speaking: self.is_speaking(),
            queued_frames: self.queued_frames(),
            queue_capacity: self.shared.queue.capacity(),
            feed: self.feed_stats(),
        }
    }

    pub fn log_afe_status(&self) {
        match serde_json::to_string(&self.afe_status()) {
            Ok(json) => log::info!("AFE status: {}", json),
            Err(e) => log::error!("Failed to serialize AFE status: {}", e),
        }
    }

    /// Destroy and recreate the model with the current settings. Safe to
    /// call while the processing task runs.
    pub fn reinitialize_afe(&self) -> Result<()> {
        self.ensure_not_task_thread()?;
        let control = self.control.lock();
        self.reinitialize_locked(&control)
    }

    /// Apply a settings change; rebuilds the model only when the model
    /// parameters actually changed.
    fn reconfigure<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AfeSettings) -> bool,
    {
        self.ensure_not_task_thread()?;
        let control = self.control.lock();

        let format = *self.shared.format.lock();
        let (changed, model_changed) = {
            let mut settings = self.shared.settings.lock();
            let before = format.map(|f| settings.front_end_config(&f));
            let changed = apply(&mut settings);
            let after = format.map(|f| settings.front_end_config(&f));
            (changed, before != after)
        };

        if !changed {
            return Ok(());
        }
        if format.is_none() {
            // applied at initialize()
            return Ok(());
        }
        if !model_changed && !self.is_disabled() {
            log::debug!("AFE settings changed without affecting the model");
            return Ok(());
        }
        self.reinitialize_locked(&control)
    }

    fn reinitialize_locked(&self, _control: &Control) -> Result<()> {
        let flags = &self.shared.flags;
        let task_alive = flags.is_set(TASK_ALIVE);

        if task_alive {
            flags.set(PAUSE_REQUEST);
            let acked = flags.wait_until(
                |bits| bits & PAUSED != 0 || bits & TASK_ALIVE == 0,
                PAUSE_ACK_TIMEOUT,
            );
            if acked.is_none() {
                flags.clear(PAUSE_REQUEST);
                log::error!(
                    "AFE processing task did not pause within {:?}, keeping current model",
                    PAUSE_ACK_TIMEOUT
                );
                return Err(AfeError::PauseTimeout(PAUSE_ACK_TIMEOUT));
            }
        }

        let result = self.rebuild_model();

        if task_alive {
            flags.clear(PAUSE_REQUEST);
        }
        result
    }

    /// Only called while the task is parked or not running.
    fn rebuild_model(&self) -> Result<()> {
        let format = (*self.shared.format.lock()).ok_or(AfeError::NotInitialized)?;
        let config = self.shared.settings.lock().front_end_config(&format);

        self.shared.feed_size.store(0, Ordering::SeqCst);
        let old = self.shared.model.lock().take();
        drop(old);

        let stale = self.shared.queue.clear();
        if stale > 0 {
            log::debug!("AFE rebuild discarded {} stale frames", stale);
        }
        // The task drops its partial output when it sees the new generation.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.end_speech();

        let model = match self.provider.create(&config) {
            Ok(model) => model,
            Err(e) => {
                log::error!("AFE model allocation failed, audio processing disabled: {}", e);
                return Err(e);
            }
        };

        if model.channels() != format.input_channels as usize {
            let e = AfeError::InvalidConfig(format!(
                "model expects {} channels, codec provides {}",
                model.channels(),
                format.input_channels
            ));
            log::error!("AFE model rejected, audio processing disabled: {}", e);
            return Err(e);
        }

        let feed_size = model.feed_chunksize() * model.channels();
        *self.shared.model.lock() = Some(model);
        self.shared.feed_size.store(feed_size, Ordering::SeqCst);

        log::info!(
            "AFE model ready: feed_size={}, aec={}, vad={}, suppression={}, vad_sensitivity={}",
            feed_size,
            config.aec_enabled,
            config.vad_enabled,
            config.suppression_level,
            config.vad_sensitivity,
        );
        Ok(())
    }

    fn on_task_thread(&self) -> bool {
        *self.shared.task_thread.lock() == Some(thread::current().id())
    }

    fn ensure_not_task_thread(&self) -> Result<()> {
        if self.on_task_thread() {
            log::error!("AFE reconfiguration from the processing task is not allowed");
            return Err(AfeError::ReentrantReconfigure);
        }
        Ok(())
    }
}

impl Drop for AfeAudioProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Processing task ========================

/// State owned exclusively by the processing thread.
struct TaskState {
    generation: u64,
    speaking: bool,
    output: Vec<i16>,
}

fn processing_task(shared: Arc<Shared>) {
    *shared.task_thread.lock() = Some(thread::current().id());
    // Every run starts in silence; speech left over from a detached task is
    // reported as ended first.
    shared.end_speech();
    let mut state = TaskState {
        generation: shared.generation.load(Ordering::SeqCst),
        speaking: false,
        output: Vec::new(),
    };

    log::debug!("AFE processing task running");

    loop {
        let bits = shared.flags.get();
        if bits & STOP_REQUEST != 0 {
            break;
        }
        if bits & PAUSE_REQUEST != 0 {
            shared.flags.set(PAUSED);
            // PAUSED is cleared atomically with observing the resume
            while shared
                .flags
                .wait_and_clear(
                    |b| b & PAUSE_REQUEST == 0 || b & STOP_REQUEST != 0,
                    PAUSED,
                    Duration::from_millis(500),
                )
                .is_none()
            {}
            continue;
        }

        sync_generation(&shared, &mut state);

        let Some(frame) = shared.queue.pop_timeout(FETCH_TIMEOUT) else {
            continue;
        };
        process_frame(&shared, &mut state, frame);
    }

    *shared.task_thread.lock() = None;
    shared.flags.clear(TASK_ALIVE | PAUSED);
    log::debug!("AFE processing task exited");
}

/// Drop speech state and partial output left over from a previous model,
/// and report a speech end cut short by a rebuild or stop.
fn sync_generation(shared: &Shared, state: &mut TaskState) {
    let generation = shared.generation.load(Ordering::SeqCst);
    if generation != state.generation {
        state.generation = generation;
        state.output.clear();
        state.speaking = false;
    }
    if shared.speech_end_pending.swap(false, Ordering::SeqCst) {
        shared.dispatcher.dispatch_vad(false);
    }
}

fn process_frame(shared: &Shared, state: &mut TaskState, frame: QueuedFrame) {
    if frame.generation != state.generation {
        log::debug!(
            "AFE dropping frame of {} samples fed before a rebuild",
            frame.samples.len()
        );
        return;
    }
    let frame = frame.samples;

    let results = {
        let mut slot = shared.model.lock();
        let Some(model) = slot.as_mut() else {
            return;
        };
        model.feed(&frame);
        let mut results = Vec::new();
        while let Some(result) = model.fetch() {
            results.push(result);
        }
        results
    };

    for result in results {
        handle_result(shared, state, result);
    }
    shared.processed_frames.fetch_add(1, Ordering::SeqCst);
}

fn handle_result(shared: &Shared, state: &mut TaskState, result: FetchResult) {
    let FetchResult { data, vad, wake_word } = result;

    if let Some(vad) = vad {
        let speaking = vad == VadState::Speech;
        if speaking != state.speaking {
            state.speaking = speaking;
            shared.is_speaking.store(speaking, Ordering::SeqCst);
            if !speaking {
                // never dispatch a partial unit
                state.output.clear();
            }
            shared.dispatcher.dispatch_vad(speaking);
        }
    }

    if let Some(wake_word) = wake_word {
        log::info!("Wake word detected: {}", wake_word);
        shared.dispatcher.dispatch_wake_word(&wake_word);
    }

    // With VAD, output is gated to the speech region
    if data.is_empty() || (vad.is_some() && !state.speaking) {
        return;
    }
    if !shared.dispatcher.wants_output() {
        return;
    }

    let unit = shared.output_frame_samples.load(Ordering::SeqCst);
    if unit == 0 {
        return;
    }
    state.output.extend_from_slice(&data);
    while state.output.len() >= unit {
        let rest = state.output.split_off(unit);
        let frame = std::mem::replace(&mut state.output, rest);
        shared.dispatcher.dispatch_output(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::IdleCodec;
    use crate::audio::front_end::FrontEndConfig;

    /// Model whose chunk grows with the suppression level, so rebuilds are
    /// observable through `feed_size()`.
    struct EchoModel {
        chunk: usize,
        channels: usize,
        pending: Vec<Vec<i16>>,
    }

    impl FrontEnd for EchoModel {
        fn feed_chunksize(&self) -> usize {
            self.chunk
        }
        fn channels(&self) -> usize {
            self.channels
        }
        fn feed(&mut self, samples: &[i16]) {
            self.pending.push(samples.to_vec());
        }
        fn fetch(&mut self) -> Option<FetchResult> {
            let samples = self.pending.pop()?;
            Some(FetchResult {
                data: samples.into_iter().step_by(self.channels).collect(),
                vad: None,
                wake_word: None,
            })
        }
        fn reset(&mut self) {
            self.pending.clear();
        }
    }

    struct EchoProvider;

    impl FrontEndProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        fn create(&self, config: &FrontEndConfig) -> Result<Box<dyn FrontEnd>> {
            Ok(Box::new(EchoModel {
                chunk: 160 * (1 + config.suppression_level as usize),
                channels: config.total_channels() as usize,
                pending: Vec::new(),
            }))
        }
    }

    struct FailingProvider;

    impl FrontEndProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        fn create(&self, _config: &FrontEndConfig) -> Result<Box<dyn FrontEnd>> {
            Err(AfeError::AllocationFailed("out of memory".into()))
        }
    }

    fn codec(channels: u32, reference: bool) -> IdleCodec {
        IdleCodec::new(CodecFormat {
            sample_rate: 16000,
            input_channels: channels,
            input_reference: reference,
        })
    }

    #[test]
    fn uninitialized_engine_reports_zero_feed_size() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        assert_eq!(afe.feed_size(), 0);
        assert!(!afe.is_initialized());
        assert!(matches!(afe.start(), Err(AfeError::NotInitialized)));
        afe.feed(vec![0; 160]);
        assert_eq!(afe.feed_stats().disabled, 1);
    }

    #[test]
    fn initialize_derives_sizes() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(2, true), 60).unwrap();
        // suppression level 2 → chunk 480, two channels
        assert_eq!(afe.feed_size(), 960);
        assert_eq!(afe.output_frame_samples(), 960);
        assert!(afe.is_aec_enabled());
    }

    #[test]
    fn size_mismatch_is_rejected_without_queueing() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(1, false), 60).unwrap();
        afe.feed(vec![0; afe.feed_size() + 1]);
        afe.feed(vec![0; 3]);
        assert_eq!(afe.queued_frames(), 0);
        assert_eq!(afe.feed_stats().size_mismatch, 2);

        afe.feed(vec![0; afe.feed_size()]);
        assert_eq!(afe.queued_frames(), 1);
    }

    #[test]
    fn full_queue_drops_frames() {
        let afe = AfeAudioProcessor::with_settings(Box::new(EchoProvider), AfeSettings::default(), 2);
        afe.initialize(&codec(1, false), 60).unwrap();
        for _ in 0..5 {
            afe.feed(vec![0; afe.feed_size()]);
        }
        let stats = afe.feed_stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.queue_full, 3);
    }

    #[test]
    fn allocation_failure_disables_engine() {
        let afe = AfeAudioProcessor::new(Box::new(FailingProvider));
        assert!(afe.initialize(&codec(1, false), 60).is_err());
        assert!(afe.is_disabled());
        assert_eq!(afe.feed_size(), 0);
        afe.feed(vec![0; 320]);
        assert_eq!(afe.queued_frames(), 0);
        assert_eq!(afe.feed_stats().disabled, 1);
    }

    #[test]
    fn setters_clamp_and_rebuild() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(1, false), 60).unwrap();
        assert_eq!(afe.feed_size(), 480);

        afe.set_aec_suppression_level(9).unwrap();
        assert_eq!(afe.settings().suppression_level(), 4);
        assert_eq!(afe.feed_size(), 800);

        afe.set_vad_sensitivity(-2).unwrap();
        assert_eq!(afe.settings().vad_sensitivity(), 0);

        afe.set_aec_mode(17).unwrap();
        assert_eq!(afe.current_aec_mode(), AecMode::OnServer);
        assert!(!afe.is_aec_enabled());
    }

    #[test]
    fn settings_before_initialize_are_kept() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.set_aec_suppression_level(0).unwrap();
        afe.enable_device_aec(false).unwrap();
        afe.initialize(&codec(2, true), 60).unwrap();
        assert_eq!(afe.feed_size(), 320);
        assert_eq!(afe.current_aec_mode(), AecMode::OnServer);
        assert!(!afe.is_aec_enabled());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(1, false), 60).unwrap();

        afe.stop();
        assert!(!afe.is_running());

        afe.start().unwrap();
        afe.start().unwrap();
        assert!(afe.is_running());

        afe.stop();
        afe.stop();
        assert!(!afe.is_running());

        afe.start().unwrap();
        assert!(afe.is_running());
    }

    #[test]
    fn frames_fed_before_a_rebuild_never_reach_the_new_model() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(1, false), 60).unwrap();
        let stale = afe.shared.generation.load(Ordering::SeqCst);

        // sensitivity leaves the chunk size alone
        afe.set_vad_sensitivity(3).unwrap();
        assert_eq!(afe.feed_size(), 480);

        // a feed() that read the size just before the rebuild
        afe.shared
            .queue
            .try_push(QueuedFrame {
                generation: stale,
                samples: vec![1; 480],
            })
            .unwrap();
        afe.feed(vec![2; 480]);
        assert_eq!(afe.queued_frames(), 2);

        afe.start().unwrap();
        for _ in 0..200 {
            if afe.queued_frames() == 0 && afe.processed_frames() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(50));
        afe.stop();
        assert_eq!(afe.queued_frames(), 0);
        assert_eq!(afe.processed_frames(), 1);
    }

    #[test]
    fn mono_codec_flagged_with_reference_keeps_its_microphone() {
        let afe = AfeAudioProcessor::new(Box::new(
            crate::audio::software_afe::SoftwareFrontEndProvider::new(),
        ));
        afe.initialize(&codec(1, true), 60).unwrap();
        assert!(!afe.is_disabled());
        assert!(!afe.is_aec_enabled());
        // no reference: 20ms chunks of the single mic channel
        assert_eq!(afe.feed_size(), 320);
    }

    #[test]
    fn status_reflects_engine() {
        let afe = AfeAudioProcessor::new(Box::new(EchoProvider));
        afe.initialize(&codec(2, true), 20).unwrap();
        let status = afe.afe_status();
        assert!(status.initialized);
        assert!(!status.disabled);
        assert!(!status.running);
        assert_eq!(status.output_frame_samples, 320);
        assert_eq!(status.aec_mode, AecMode::OnDevice);
        assert_eq!(afe.available_aec_modes().len(), 3);
    }
}
