use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivesyncError {
    #[error("cursor {0:?} could not be parsed")]
    BadCursor(String),

    /// A cursor-parse failure while advancing the synchronizer's own
    /// position. Unlike `BadCursor` (rejected at `register`), this is fatal
    /// to the whole poll loop: the remote server's ordering can no longer
    /// be trusted.
    #[error("fatal cursor corruption while polling: {0}")]
    Cursor(#[from] common::CommonError),

    #[error("livesync actor is no longer running")]
    ActorStopped,
}
