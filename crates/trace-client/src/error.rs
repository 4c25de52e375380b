use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceClientError {
    #[error("http transport: {0}")]
    Transport(
        #[from]
        #[source]
        reqwest::Error,
    ),

    #[error("graphql server error (status {status}): {message}")]
    GraphQl { status: u16, message: String },

    #[error("login failed: {0}")]
    Login(String),

    #[error("workflow not found")]
    WorkflowNotFound,

    #[error("json: {0}")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),

    #[error("signing failure: {0}")]
    Signing(String),
}
