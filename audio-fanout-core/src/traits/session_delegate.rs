use crate::models::error::{CaptureError, SinkError};
use crate::models::recording_result::SessionReport;
use crate::models::state::SessionState;

/// Event delegate for session notifications.
///
/// Methods may be called from the caller's thread or from a worker; hosts
/// marshal to their UI thread as needed.
pub trait SessionDelegate: Send + Sync {
    /// Called after every state transition.
    fn on_state_changed(&self, state: SessionState);

    /// Called when one sink latches an error. Other sinks are unaffected.
    fn on_sink_error(&self, sink_id: &str, error: &SinkError);

    /// Called for session-level errors (failed resume, lost device).
    fn on_error(&self, error: &CaptureError);

    /// Called once every sink has reached a terminal state.
    fn on_session_finished(&self, report: &SessionReport);
}
