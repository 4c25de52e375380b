use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("key/value store write failed: {0}")]
    Put(String),

    #[error("full-text index write failed: {0}")]
    Index(String),

    #[error("link encode failed: {0}")]
    Encode(#[from] common::CommonError),

    #[error("livesync registration failed: {0}")]
    Registration(#[from] livesync::LivesyncError),

    #[error("livesync channel closed before shutdown was requested")]
    SyncStopped,
}
