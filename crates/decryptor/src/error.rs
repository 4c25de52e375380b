use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecryptorError {
    #[error("link has no data to decrypt")]
    NoData,

    #[error("this node is not among the link's recipients")]
    NotInRecipients,

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("recipients json: {0}")]
    Common(
        #[from]
        #[source]
        common::CommonError,
    ),
}
