//! Strict in-order reassembly of out-of-order results.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use versebatch_shared::{Result, VersebatchError};

use crate::sink::OutputSink;

/// Buffers results by submission index and emits them to a sink strictly in
/// index order, each exactly once.
///
/// Insertion, emission and cursor advance all happen inside one exclusive
/// region, so concurrent callers can never flush an index twice or out of order.
pub struct OrderedReassembler<T, S> {
    state: Mutex<ReassemblyState<T>>,
    sink: S,
}

struct ReassemblyState<T> {
    pending: HashMap<usize, T>,
    /// Smallest index not yet flushed.
    next: usize,
}

impl<T, S> OrderedReassembler<T, S>
where
    T: Send,
    S: OutputSink<T>,
{
    pub fn new(sink: S) -> Self {
        Self {
            state: Mutex::new(ReassemblyState {
                pending: HashMap::new(),
                next: 0,
            }),
            sink,
        }
    }

    /// Record the result for `index` (out of `total`) and flush every
    /// consecutive result now available. Returns how many were flushed.
    pub async fn on_result(&self, index: usize, value: T, total: usize) -> Result<usize> {
        if index >= total {
            return Err(VersebatchError::validation(format!(
                "result index {index} out of range for {total} items"
            )));
        }

        let mut state = self.state.lock().await;

        if index < state.next || state.pending.contains_key(&index) {
            warn!(index, "duplicate result ignored");
            return Ok(0);
        }
        state.pending.insert(index, value);

        let mut flushed = 0;
        while state.next < total {
            let cursor = state.next;
            let Some(value) = state.pending.remove(&cursor) else {
                break;
            };

            // A sink failure loses this value but must not wedge later indices.
            if let Err(e) = self.sink.emit(value) {
                warn!(index = cursor, error = %e, "sink rejected flushed result");
            }
            state.next += 1;
            flushed += 1;
        }

        debug!(
            index,
            flushed,
            next = state.next,
            buffered = state.pending.len(),
            "result recorded"
        );
        Ok(flushed)
    }

    /// Number of results flushed so far (the next expected index).
    pub async fn flushed(&self) -> usize {
        self.state.lock().await.next
    }

    /// Number of results buffered behind a gap.
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
