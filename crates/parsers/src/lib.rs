//! The two interchangeable Livesync subscribers: a key/value sink and a
//! full-text index sink.

pub mod error;
pub mod fulltext;
pub mod kv;

pub use error::ParserError;
pub use fulltext::FullTextParser;
pub use kv::KvParser;
