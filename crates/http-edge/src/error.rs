use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpEdgeError {
    #[error("missing authorization header")]
    MissingToken,

    #[error("account service rejected the token: {0}")]
    Unauthorized(String),

    #[error("account service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("full-text query failed: {0}")]
    Query(String),
}
