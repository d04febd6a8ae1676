//! Output sinks for flushed and aggregated results.

use std::sync::{Arc, Mutex, PoisonError};

use versebatch_shared::Result;

/// Destination for results leaving the coordination layer.
///
/// `emit` is called from inside the reassembler's exclusive region, so it must
/// not block on anything that itself waits for the pool.
pub trait OutputSink<T>: Send + Sync {
    fn emit(&self, value: T) -> Result<()>;
}

impl<T, S: OutputSink<T> + ?Sized> OutputSink<T> for Arc<S> {
    fn emit(&self, value: T) -> Result<()> {
        (**self).emit(value)
    }
}

/// In-memory sink that records every emitted value in order.
#[derive(Debug)]
pub struct CollectingSink<T> {
    values: Mutex<Vec<T>>,
}

impl<T> CollectingSink<T> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(Vec::new()),
        }
    }

    /// Drain and return everything emitted so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.values.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CollectingSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> OutputSink<T> for CollectingSink<T> {
    fn emit(&self, value: T) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_preserves_order() {
        let sink = Arc::new(CollectingSink::new());
        sink.emit("a").unwrap();
        sink.emit("b").unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take(), vec!["a", "b"]);
        assert!(sink.is_empty());
    }
}
