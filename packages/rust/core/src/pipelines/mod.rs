//! Batch pipelines built on the worker pool.
//!
//! Every pipeline follows the same shape: build work items, submit one pool
//! task per item with a continuation that routes its result, then wait for
//! the pool to drain (including any work submitted by continuations).

mod download;
mod map_reduce;
mod prompt_all;
mod prompt_folder;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use versebatch_pool::{OutputSink, WorkerPool};
use versebatch_shared::{Result, RunReport};

use crate::model::ModelClient;
use crate::template::{PromptContext, Template};

pub use download::{DownloadReport, DownloadRow, download_csv, download_url, parse_download_csv};
pub use map_reduce::{MapReduceSettings, map_reduce};
pub use prompt_all::prompt_all;
pub use prompt_folder::prompt_folder;

// ---------------------------------------------------------------------------
// Settings and progress
// ---------------------------------------------------------------------------

/// A prompt template plus what it needs to run across many items.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub template: Template,
    pub context: PromptContext,
    pub workers: usize,
}

/// Progress callback for pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called each time a work item finishes, successfully or not.
    fn item_done(&self, done: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_done(&self, _done: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Model output is written one result per line.
pub(crate) fn flatten(result: &str) -> String {
    result.replace('\n', "\t")
}

pub(crate) fn start_pool(workers: usize) -> Result<WorkerPool> {
    let pool = WorkerPool::new();
    pool.start(workers)?;
    Ok(pool)
}

/// Success/failure counters updated from continuations.
#[derive(Default)]
pub(crate) struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    /// Record one finished item; returns how many have finished so far.
    pub(crate) fn record(&self, ok: bool) -> usize {
        if ok {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn finish(&self, mut report: RunReport, items: usize) -> RunReport {
        report.items = items;
        report.succeeded = self.succeeded.load(Ordering::Relaxed);
        report.failed = self.failed.load(Ordering::Relaxed);
        report.finish()
    }
}

/// Run one query over the whole input and emit the answer.
pub async fn prompt_one<M, S>(model: &M, input: &str, sink: &S) -> Result<RunReport>
where
    M: ModelClient,
    S: OutputSink<String>,
{
    let mut report = RunReport::begin("prompt");
    let answer = model.query(None, Some(input)).await?;
    sink.emit(answer)?;

    report.items = 1;
    report.succeeded = 1;
    Ok(report.finish())
}

/// Progress reporter shared with task continuations.
pub type SharedProgress = Arc<dyn ProgressReporter>;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    pub(crate) fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vb-{label}-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MathModel;
    use versebatch_pool::CollectingSink;

    #[test]
    fn flatten_replaces_newlines() {
        assert_eq!(flatten("a\nb\n"), "a\tb\t");
    }

    #[test]
    fn tally_counts_outcomes() {
        let tally = Tally::default();
        assert_eq!(tally.record(true), 1);
        assert_eq!(tally.record(false), 2);
        let report = tally.finish(RunReport::begin("test"), 2);
        assert_eq!((report.items, report.succeeded, report.failed), (2, 1, 1));
    }

    #[tokio::test]
    async fn prompt_one_emits_single_answer() {
        let sink = CollectingSink::new();
        let report = prompt_one(&MathModel, "6*7\n1+1", &sink).await.unwrap();
        assert_eq!(sink.take(), vec!["42\n2".to_string()]);
        assert_eq!(report.pipeline, "prompt");
    }
}
