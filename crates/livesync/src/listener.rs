//! A single registered subscriber's per-workflow cursor state and outbound
//! channel, owned by the poll loop and released on shutdown.

use std::collections::HashMap;

use common::Cursor;
use tokio::sync::mpsc;

use trace_client::types::LinkEdge;

/// One batch of segments for a single workflow, delivered to a listener in
/// cursor-ascending order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub workflow_id: String,
    pub segments: Vec<common::Segment>,
}

pub(crate) struct Listener {
    pub states: HashMap<String, Cursor>,
    pub tx: mpsc::Sender<Batch>,
}

/// Channel capacity of 1 approximates the source's unbuffered listener
/// channel: `send` blocks until the previous batch is drained, so a slow
/// subscriber applies backpressure to the poll loop.
pub(crate) const LISTENER_CHANNEL_CAPACITY: usize = 1;

/// Edges strictly after `cursor`, in ascending-cursor order. Scans from the
/// newest edge backwards (mirroring the source's `sliceAfter`) looking for
/// the first edge at or before `cursor`; everything after that point is the
/// slice to emit.
pub(crate) fn slice_after(edges: &[LinkEdge], cursor: &Cursor) -> Vec<LinkEdge> {
    let mut cut = 0;
    for (i, edge) in edges.iter().enumerate().rev() {
        match Cursor::parse(&edge.cursor) {
            Ok(c) if &c <= cursor => {
                cut = i + 1;
                break;
            }
            _ => continue,
        }
    }
    edges[cut..].to_vec()
}
