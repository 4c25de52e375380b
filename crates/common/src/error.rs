use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("cursor parse error: {0}")]
    CursorParse(String),

    #[error("link has no meta.data recipients list")]
    NoRecipients,

    #[error("json: {0}")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),
}
