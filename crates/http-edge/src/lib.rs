//! Supplemented HTTP edge surfaces: an authenticating `poem::Middleware`
//! and a fuzzy full-text search route, wired on top of the services that
//! do the real work (the account service, the full-text index).

pub mod auth;
pub mod error;
pub mod search;
pub mod service;

pub use auth::{AuthConfig, WithAuth};
pub use error::HttpEdgeError;
pub use search::{search, SearchIndex};
pub use service::HttpEdgeService;
