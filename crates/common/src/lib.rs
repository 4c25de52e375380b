//! Shared data model for the trace connector: links, segments, recipients,
//! workflow cursors, and the errors threaded through every other crate.

pub mod cursor;
pub mod error;
pub mod model;

pub use cursor::Cursor;
pub use error::CommonError;
pub use model::{
    Link, LinkBuilder, LinkMeta, Process, Recipient, Segment, SegmentMeta, Signature,
    WorkflowState, WorkflowStates,
};
