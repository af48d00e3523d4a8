use std::time::Duration;

use crate::models::config::ResumeRetryPolicy;
use crate::models::error::CaptureError;
use crate::models::state::SessionState;

/// Why the session is paused. Only an interruption pause auto-resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    User,
    Interruption,
}

/// Single-writer record of the session lifecycle.
///
/// Transitions that would be meaningless are either rejected with
/// `InvalidState` (start twice, stop while stopped) or reported as no-ops
/// through a `false` return (pause while not recording, resume while not
/// paused). The coordinator owns the only instance.
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: SessionState,
    pause_cause: Option<PauseCause>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pause_cause(&self) -> Option<PauseCause> {
        self.pause_cause
    }

    /// `Stopped → Recording`.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if !self.state.is_stopped() {
            return Err(CaptureError::InvalidState(format!("cannot start while {}", self.state)));
        }
        self.state = SessionState::Recording;
        Ok(())
    }

    /// `Recording → Paused`. Returns `false` when there is nothing to pause.
    pub fn pause(&mut self, cause: PauseCause) -> bool {
        if !self.state.is_recording() {
            return false;
        }
        self.state = SessionState::Paused;
        self.pause_cause = Some(cause);
        true
    }

    /// Whether `resume` has anything to do.
    pub fn can_resume(&self) -> bool {
        self.state.is_paused()
    }

    /// `Paused → Recording`, after the hardware came back.
    pub fn resumed(&mut self) -> bool {
        if !self.state.is_paused() {
            return false;
        }
        self.state = SessionState::Recording;
        self.pause_cause = None;
        true
    }

    /// `Recording | Paused → Stopped`.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if self.state.is_stopped() {
            return Err(CaptureError::InvalidState("session is not running".into()));
        }
        self.state = SessionState::Stopped;
        self.pause_cause = None;
        Ok(())
    }
}

/// Run `attempt` up to `policy.max_attempts` times, sleeping
/// `policy.delay_for(n)` after the n-th failure. The last failure is not
/// followed by a sleep.
pub fn retry_with_backoff<F, S>(
    policy: &ResumeRetryPolicy,
    mut attempt: F,
    mut sleep: S,
) -> Result<u32, CaptureError>
where
    F: FnMut(u32) -> Result<(), CaptureError>,
    S: FnMut(Duration),
{
    let max = policy.max_attempts.max(1);
    let mut last_error = String::new();
    for n in 0..max {
        match attempt(n) {
            Ok(()) => return Ok(n + 1),
            Err(e) => {
                log::warn!("resume attempt {}/{} failed: {}", n + 1, max, e);
                last_error = e.to_string();
                if n + 1 < max {
                    sleep(policy.delay_for(n));
                }
            }
        }
    }
    Err(CaptureError::ResumeFailed {
        attempts: max,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_path_through_every_state() {
        let mut machine = SessionStateMachine::new();
        machine.start().unwrap();
        assert!(machine.pause(PauseCause::User));
        assert_eq!(machine.state(), SessionState::Paused);
        assert!(machine.resumed());
        machine.stop().unwrap();
        assert_eq!(machine.state(), SessionState::Stopped);
    }

    #[test]
    fn no_op_transitions() {
        let mut machine = SessionStateMachine::new();
        assert!(!machine.can_resume());
        assert!(!machine.resumed());
        assert!(!machine.pause(PauseCause::User));
        assert!(machine.stop().is_err());

        machine.start().unwrap();
        assert!(machine.start().is_err());
        assert!(machine.pause(PauseCause::Interruption));
        assert!(!machine.pause(PauseCause::User));
        assert_eq!(machine.pause_cause(), Some(PauseCause::Interruption));
    }

    #[test]
    fn backoff_doubles_between_failures() {
        let policy = ResumeRetryPolicy {
            max_attempts: 4,
            base_delay_ms: 10,
        };
        let mut slept = Vec::new();
        let attempts = retry_with_backoff(
            &policy,
            |n| if n < 2 { Err(CaptureError::DeviceNotAvailable) } else { Ok(()) },
            |d| slept.push(d),
        )
        .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(slept, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[test]
    fn exhaustion_reports_attempts() {
        let policy = ResumeRetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let mut calls = 0;
        let mut sleeps = 0;
        let err = retry_with_backoff(
            &policy,
            |_| {
                calls += 1;
                Err(CaptureError::DeviceNotAvailable)
            },
            |_| sleeps += 1,
        )
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(sleeps, 2);
        assert_eq!(
            err,
            CaptureError::ResumeFailed {
                attempts: 3,
                reason: "device not available".into()
            }
        );
    }
}
