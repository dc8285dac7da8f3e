//! Acoustic echo cancellation with a time-domain NLMS adaptive filter.
//!
//! The filter models the echo path from the playback reference to the
//! microphone and subtracts the estimated echo sample by sample.

/// NLMS-based acoustic echo canceller.
pub struct EchoCanceller {
    /// Adaptive filter taps.
    weights: Vec<f32>,
    /// Reference history stored twice so the newest `taps` samples are
    /// always one contiguous slice starting at `pos`.
    history: Vec<f32>,
    pos: usize,
    /// Running energy of the reference window.
    power: f32,
    /// Step size (mu) for NLMS adaptation.
    mu: f32,
    /// Regularization against division by a silent reference.
    delta: f32,
}

impl EchoCanceller {
    /// `taps`: echo path length in samples; `mu`: step size in `(0, 1]`.
    pub fn new(taps: usize, mu: f32) -> Self {
        let taps = taps.max(1);
        Self {
            weights: vec![0.0; taps],
            history: vec![0.0; taps * 2],
            pos: 0,
            power: 0.0,
            mu: mu.clamp(0.01, 1.0),
            delta: 1e-4 * taps as f32,
        }
    }

    pub fn taps(&self) -> usize {
        self.weights.len()
    }

    fn push_reference(&mut self, sample: f32) {
        let taps = self.weights.len();
        self.pos = (self.pos + taps - 1) % taps;
        let oldest = self.history[self.pos];
        self.history[self.pos] = sample;
        self.history[self.pos + taps] = sample;
        self.power = (self.power + sample * sample - oldest * oldest).max(0.0);
    }

    /// Remove the echo of `reference` from `mic` in place. Both slices hold
    /// normalized samples and must be the same length.
    pub fn process(&mut self, mic: &mut [f32], reference: &[f32]) {
        debug_assert_eq!(mic.len(), reference.len());
        let taps = self.weights.len();

        for (m, &r) in mic.iter_mut().zip(reference) {
            self.push_reference(r);
            let window = &self.history[self.pos..self.pos + taps];

            let echo_est: f32 = self.weights.iter().zip(window).map(|(w, x)| w * x).sum();
            let error = *m - echo_est;

            let step = self.mu * error / (self.power + self.delta);
            for (w, x) in self.weights.iter_mut().zip(window) {
                *w += step * x;
            }

            *m = error;
        }
    }

    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.history.fill(0.0);
        self.pos = 0;
        self.power = 0.0;
    }
}
