//! Explicit round outcome rather than exceptions-as-control-flow: a policy
//! stop or fatal condition inside a phase returns one of these, so the
//! caller (the Coordinator's run loop) decides what to do next by
//! matching, not by catching.

use fl_common::FlError;

#[derive(Debug)]
pub enum RoundOutcome {
    /// A round ran (or was legitimately skipped) and the loop should
    /// immediately attempt the next one.
    Continue,
    /// `current_round` has reached `max_rounds`; stop looping normally.
    Terminate,
    /// Stopped by policy decision at the DECIDE step, or by a
    /// `stop_training` action from the CONFIG selection check.
    Stop { reason: String },
    /// Unrecoverable error; the Coordinator should emit a fatal event and
    /// exit.
    Fatal(FlError),
}
