//! Delivery of processing-task events to the application.
//!
//! Events reach consumers two ways: through one registered callback per
//! event kind (run on the processing thread), and through an optional
//! channel subscription drained on the consumer's own context.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// One complete output unit of cleaned mono samples.
    OutputReady(Vec<i16>),
    /// Speech started (`true`) or ended (`false`).
    VadChanged(bool),
    WakeWordDetected(String),
}

impl AudioEvent {
    fn kind(&self) -> &'static str {
        match self {
            AudioEvent::OutputReady(_) => "output",
            AudioEvent::VadChanged(_) => "vad",
            AudioEvent::WakeWordDetected(_) => "wake_word",
        }
    }
}

pub type OutputCallback = Box<dyn FnMut(Vec<i16>) + Send>;
pub type VadCallback = Box<dyn FnMut(bool) + Send>;
pub type WakeWordCallback = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
pub struct EventDispatcher {
    output: Mutex<Option<OutputCallback>>,
    vad: Mutex<Option<VadCallback>>,
    wake_word: Mutex<Option<WakeWordCallback>>,
    subscriber: Mutex<Option<mpsc::Sender<AudioEvent>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_output(&self, callback: OutputCallback) {
        *self.output.lock() = Some(callback);
    }

    pub fn set_vad(&self, callback: VadCallback) {
        *self.vad.lock() = Some(callback);
    }

    pub fn set_wake_word(&self, callback: WakeWordCallback) {
        *self.wake_word.lock() = Some(callback);
    }

    /// Replace the channel subscriber and return its receiving end.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<AudioEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.subscriber.lock() = Some(tx);
        rx
    }

    /// Whether anyone consumes output audio. Without a consumer the task
    /// skips accumulating it.
    pub fn wants_output(&self) -> bool {
        self.output.lock().is_some() || self.subscriber.lock().is_some()
    }

    pub fn dispatch_output(&self, samples: Vec<i16>) {
        if self.subscriber.lock().is_some() {
            self.publish(AudioEvent::OutputReady(samples.clone()));
        }
        // The callback runs outside the slot lock so it may re-register.
        let callback = self.output.lock().take();
        if let Some(mut callback) = callback {
            callback(samples);
            let mut slot = self.output.lock();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    pub fn dispatch_vad(&self, speaking: bool) {
        self.publish(AudioEvent::VadChanged(speaking));
        let callback = self.vad.lock().take();
        if let Some(mut callback) = callback {
            callback(speaking);
            let mut slot = self.vad.lock();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    pub fn dispatch_wake_word(&self, wake_word: &str) {
        self.publish(AudioEvent::WakeWordDetected(wake_word.to_string()));
        let callback = self.wake_word.lock().take();
        if let Some(mut callback) = callback {
            callback(wake_word);
            let mut slot = self.wake_word.lock();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    /// Never blocks the processing task: a full channel drops the event.
    fn publish(&self, event: AudioEvent) {
        let mut subscriber = self.subscriber.lock();
        let Some(tx) = subscriber.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Audio event queue full, dropping {} event", event.kind());
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("Audio event receiver dropped, unsubscribing");
                *subscriber = None;
            }
        }
    }
}
