//! Assistant playback state.
//!
//! Tracks whether a synthesized reply is currently playing and when
//! listening may resume afterwards. The controller is pure state; the
//! session owns the actual device playback task and reports outcomes here.
//! Failures fold into the completion path so the pipeline can never stay
//! stuck in the speaking state.

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
}

pub struct PlaybackController {
    state: PlaybackState,
    /// When to resume listening after a naturally completed reply.
    resume_at: Option<Instant>,
    settle: Duration,
}

impl PlaybackController {
    pub fn new(settle: Duration) -> Self {
        Self {
            state: PlaybackState::Idle,
            resume_at: None,
            settle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == PlaybackState::Speaking
    }

    /// A reply began playing. Returns `false` when one is already playing,
    /// in which case the new reply must be ignored.
    pub fn on_reply_started(&mut self) -> bool {
        if self.is_speaking() {
            return false;
        }
        self.state = PlaybackState::Speaking;
        self.resume_at = None;
        true
    }

    /// Playback ended on its own, or failed partway (same transition).
    /// When listening is enabled, arms the settle deadline after which the
    /// session resumes it.
    pub fn on_finished(&mut self, now: Instant, resume_listening: bool) {
        if !self.is_speaking() {
            return;
        }
        self.state = PlaybackState::Idle;
        if resume_listening {
            self.resume_at = Some(now + self.settle);
            debug!(settle_ms = self.settle.as_millis() as u64, "listening resume scheduled");
        }
    }

    /// The user cut the reply off. Immediate transition to idle with no
    /// auto-resume; whatever triggered the interruption decides what
    /// happens next.
    pub fn on_interrupted(&mut self) {
        self.state = PlaybackState::Idle;
        self.resume_at = None;
    }

    /// Pending resume deadline, if one is armed.
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    /// Consume the resume deadline once it has been acted on.
    pub fn clear_resume(&mut self) {
        self.resume_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PlaybackController {
        PlaybackController::new(Duration::from_millis(500))
    }

    #[test]
    fn interruption_goes_idle_without_resume() {
        let mut ctl = controller();
        assert!(ctl.on_reply_started());

        ctl.on_interrupted();
        assert_eq!(ctl.state(), PlaybackState::Idle);
        assert!(ctl.resume_at().is_none());
    }

    #[test]
    fn natural_completion_schedules_resume_after_settle() {
        let mut ctl = controller();
        ctl.on_reply_started();

        let now = Instant::now();
        ctl.on_finished(now, true);
        assert_eq!(ctl.state(), PlaybackState::Idle);
        assert_eq!(ctl.resume_at(), Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn completion_without_listening_does_not_resume() {
        let mut ctl = controller();
        ctl.on_reply_started();

        ctl.on_finished(Instant::now(), false);
        assert!(ctl.resume_at().is_none());
    }

    #[test]
    fn second_reply_while_speaking_is_rejected() {
        let mut ctl = controller();
        assert!(ctl.on_reply_started());
        assert!(!ctl.on_reply_started());
        assert!(ctl.is_speaking());
    }

    #[test]
    fn starting_a_reply_clears_a_stale_resume() {
        let mut ctl = controller();
        ctl.on_reply_started();
        ctl.on_finished(Instant::now(), true);
        assert!(ctl.resume_at().is_some());

        ctl.on_reply_started();
        assert!(ctl.resume_at().is_none());
    }

    #[test]
    fn finish_while_idle_is_a_no_op() {
        let mut ctl = controller();
        ctl.on_finished(Instant::now(), true);
        assert_eq!(ctl.state(), PlaybackState::Idle);
        assert!(ctl.resume_at().is_none());
    }
}
