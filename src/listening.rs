//! Debounce layer between raw voice-activity samples and the recording
//! lifecycle.
//!
//! Raw VAD output chatters on brief noise, so recordings open only after
//! sustained speech and close only after sustained silence. The controller
//! is a pure state machine: deadlines are plain timestamps carried in the
//! state, so tearing the controller down is a synchronous reset with no
//! timers left behind.

use std::time::Instant;
use tracing::debug;

use crate::config::ListenConfig;

/// Listening states.
///
/// `Arming` holds the first-detection timestamp; `Draining` holds the
/// deadline after which sustained silence closes the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Arming { since: Instant },
    Recording,
    Draining { deadline: Instant },
}

/// Action the session must take in response to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenAction {
    OpenRecording,
    CloseRecording,
}

pub struct ActiveListeningController {
    state: ListenState,
    cfg: ListenConfig,
}

impl ActiveListeningController {
    pub fn new(cfg: ListenConfig) -> Self {
        Self {
            state: ListenState::Idle,
            cfg,
        }
    }

    /// Advance the machine with one VAD sample taken at `now`.
    ///
    /// Samples are expected on a fixed cadence; the machine itself places
    /// no constraint on the interval.
    pub fn on_sample(&mut self, speech: bool, now: Instant) -> Option<ListenAction> {
        match (self.state, speech) {
            (ListenState::Idle, true) => {
                self.state = ListenState::Arming { since: now };
                // A zero minimum-speech config opens immediately.
                self.arm_check(now)
            }
            (ListenState::Idle, false) => None,

            (ListenState::Arming { .. }, true) => self.arm_check(now),
            (ListenState::Arming { .. }, false) => {
                // Speech too short, not worth a recording.
                self.state = ListenState::Idle;
                None
            }

            (ListenState::Recording, true) => None,
            (ListenState::Recording, false) => {
                self.state = ListenState::Draining {
                    deadline: now + self.cfg.silence(),
                };
                None
            }

            (ListenState::Draining { deadline }, _) if now >= deadline => {
                // The silence window elapsed; speech arriving on this very
                // sample is a new utterance, not a continuation.
                debug!("silence window elapsed, closing recording");
                self.state = ListenState::Idle;
                Some(ListenAction::CloseRecording)
            }
            (ListenState::Draining { .. }, true) => {
                self.state = ListenState::Recording;
                None
            }
            (ListenState::Draining { .. }, false) => None,
        }
    }

    fn arm_check(&mut self, now: Instant) -> Option<ListenAction> {
        if let ListenState::Arming { since } = self.state {
            if now.duration_since(since) >= self.cfg.min_speech() {
                debug!("sustained speech confirmed, opening recording");
                self.state = ListenState::Recording;
                return Some(ListenAction::OpenRecording);
            }
        }
        None
    }

    /// Cancel any pending deadlines and return to idle. Used when listening
    /// is torn down (playback start, disable, disconnect).
    pub fn reset(&mut self) {
        self.state = ListenState::Idle;
    }

    /// True while a recording cycle is open (recording or draining).
    pub fn is_recording(&self) -> bool {
        matches!(
            self.state,
            ListenState::Recording | ListenState::Draining { .. }
        )
    }

    pub fn state(&self) -> ListenState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller() -> ActiveListeningController {
        ActiveListeningController::new(ListenConfig::default())
    }

    /// Drive the controller at a 100 ms cadence with a speech pattern,
    /// collecting any emitted actions with their sample offsets.
    fn drive(
        ctl: &mut ActiveListeningController,
        start: Instant,
        pattern: &[bool],
    ) -> Vec<(u64, ListenAction)> {
        let mut actions = Vec::new();
        for (i, &speech) in pattern.iter().enumerate() {
            let now = start + Duration::from_millis(i as u64 * 100);
            if let Some(action) = ctl.on_sample(speech, now) {
                actions.push((i as u64 * 100, action));
            }
        }
        actions
    }

    #[test]
    fn speech_shorter_than_minimum_never_opens() {
        let mut ctl = controller();
        // 400 ms of speech (samples at 0..400), then silence.
        let mut pattern = vec![true; 5];
        pattern.extend(vec![false; 5]);
        let actions = drive(&mut ctl, Instant::now(), &pattern);
        assert!(actions.is_empty());
        assert_eq!(ctl.state(), ListenState::Idle);
    }

    #[test]
    fn sustained_speech_opens_at_minimum_boundary() {
        let mut ctl = controller();
        // Samples at 0, 100, ..., 600 ms: the 500 ms sample crosses the
        // threshold.
        let actions = drive(&mut ctl, Instant::now(), &[true; 7]);
        assert_eq!(actions, vec![(500, ListenAction::OpenRecording)]);
        assert!(ctl.is_recording());
    }

    #[test]
    fn short_silence_does_not_close() {
        let mut ctl = controller();
        let start = Instant::now();
        let mut pattern = vec![true; 7]; // opens at 500 ms
        pattern.extend(vec![false; 11]); // silence from 700 ms through 1700 ms
        let actions = drive(&mut ctl, start, &pattern);
        assert_eq!(actions, vec![(500, ListenAction::OpenRecording)]);
        assert!(ctl.is_recording());
    }

    #[test]
    fn sustained_silence_closes_at_boundary() {
        let mut ctl = controller();
        let start = Instant::now();
        let mut pattern = vec![true; 7]; // opens at 500 ms
        pattern.extend(vec![false; 16]); // silence from 700 ms onward
        let actions = drive(&mut ctl, start, &pattern);
        // Draining starts at 700 ms; the deadline lands on the 2200 ms
        // sample (1500 ms later).
        assert_eq!(
            actions,
            vec![
                (500, ListenAction::OpenRecording),
                (2200, ListenAction::CloseRecording),
            ]
        );
        assert_eq!(ctl.state(), ListenState::Idle);
    }

    #[test]
    fn speech_during_draining_cancels_the_deadline() {
        let mut ctl = controller();
        let start = Instant::now();
        let mut pattern = vec![true; 7];
        pattern.extend(vec![false; 10]); // 1000 ms of silence, below the limit
        pattern.extend(vec![true; 3]); // speech resumes
        pattern.extend(vec![false; 3]);
        let actions = drive(&mut ctl, start, &pattern);
        assert_eq!(actions, vec![(500, ListenAction::OpenRecording)]);
        // Still draining against a fresh deadline.
        assert!(ctl.is_recording());
    }

    #[test]
    fn reset_cancels_everything() {
        let mut ctl = controller();
        drive(&mut ctl, Instant::now(), &[true; 7]);
        assert!(ctl.is_recording());

        ctl.reset();
        assert_eq!(ctl.state(), ListenState::Idle);
        assert!(!ctl.is_recording());
    }

    #[test]
    fn no_second_open_while_recording() {
        let mut ctl = controller();
        let actions = drive(&mut ctl, Instant::now(), &[true; 30]);
        let opens = actions
            .iter()
            .filter(|(_, a)| *a == ListenAction::OpenRecording)
            .count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn zero_minimum_opens_on_first_sample() {
        let mut ctl = ActiveListeningController::new(ListenConfig {
            min_speech_ms: 0,
            ..ListenConfig::default()
        });
        let action = ctl.on_sample(true, Instant::now());
        assert_eq!(action, Some(ListenAction::OpenRecording));
    }
}
