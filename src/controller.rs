use crate::audio::AudioEvent;

/// Listening state derived from the front-end's speech events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
}

/// Per-utterance bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utterance {
    pub frames: usize,
    pub samples: usize,
    /// Wake word heard while (or just before) this utterance was active.
    pub wake_word: Option<String>,
}

/// Consumes `AudioEvent`s on the application side.
pub struct VoiceController {
    state: VoiceState,
    current: Utterance,
    pending_wake_word: Option<String>,
    completed: Vec<Utterance>,
    stray_frames: usize,
}

impl VoiceController {
    pub fn new() -> Self {
        Self {
            state: VoiceState::Idle,
            current: Utterance::default(),
            pending_wake_word: None,
            completed: Vec::new(),
            stray_frames: 0,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn completed(&self) -> &[Utterance] {
        &self.completed
    }

    /// Output frames received outside of any utterance (VAD disabled).
    pub fn stray_frames(&self) -> usize {
        self.stray_frames
    }

    pub fn handle_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::VadChanged(true) => {
                if self.state == VoiceState::Listening {
                    return;
                }
                self.state = VoiceState::Listening;
                self.current = Utterance {
                    wake_word: self.pending_wake_word.take(),
                    ..Utterance::default()
                };
                log::info!("Speech started");
            }
            AudioEvent::VadChanged(false) => {
                if self.state == VoiceState::Idle {
                    return;
                }
                self.state = VoiceState::Idle;
                let utterance = std::mem::take(&mut self.current);
                log::info!(
                    "Speech ended: {} frames, {} samples{}",
                    utterance.frames,
                    utterance.samples,
                    utterance
                        .wake_word
                        .as_deref()
                        .map(|w| format!(", wake word '{}'", w))
                        .unwrap_or_default(),
                );
                self.completed.push(utterance);
            }
            AudioEvent::WakeWordDetected(word) => {
                log::info!("Wake word: {}", word);
                match self.state {
                    VoiceState::Listening => self.current.wake_word = Some(word),
                    VoiceState::Idle => self.pending_wake_word = Some(word),
                }
            }
            AudioEvent::OutputReady(samples) => match self.state {
                VoiceState::Listening => {
                    self.current.frames += 1;
                    self.current.samples += samples.len();
                }
                VoiceState::Idle => {
                    self.stray_frames += 1;
                    log::trace!("Output frame of {} samples outside speech", samples.len());
                }
            },
        }
    }
}

impl Default for VoiceController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_one_utterance() {
        let mut controller = VoiceController::new();
        controller.handle_event(AudioEvent::VadChanged(true));
        assert_eq!(controller.state(), VoiceState::Listening);
        controller.handle_event(AudioEvent::OutputReady(vec![0; 960]));
        controller.handle_event(AudioEvent::OutputReady(vec![0; 960]));
        controller.handle_event(AudioEvent::VadChanged(false));

        assert_eq!(controller.state(), VoiceState::Idle);
        assert_eq!(
            controller.completed(),
            &[Utterance {
                frames: 2,
                samples: 1920,
                wake_word: None
            }]
        );
    }

    #[test]
    fn wake_word_before_speech_is_attached() {
        let mut controller = VoiceController::new();
        controller.handle_event(AudioEvent::WakeWordDetected("hey santa".into()));
        controller.handle_event(AudioEvent::VadChanged(true));
        controller.handle_event(AudioEvent::VadChanged(false));
        assert_eq!(controller.completed()[0].wake_word.as_deref(), Some("hey santa"));
    }

    #[test]
    fn duplicate_transitions_are_ignored() {
        let mut controller = VoiceController::new();
        controller.handle_event(AudioEvent::VadChanged(false));
        controller.handle_event(AudioEvent::VadChanged(true));
        controller.handle_event(AudioEvent::VadChanged(true));
        controller.handle_event(AudioEvent::VadChanged(false));
        assert_eq!(controller.completed().len(), 1);
    }

    #[test]
    fn output_without_vad_counts_as_stray() {
        let mut controller = VoiceController::new();
        controller.handle_event(AudioEvent::OutputReady(vec![0; 320]));
        assert_eq!(controller.stray_frames(), 1);
        assert!(controller.completed().is_empty());
    }
}
