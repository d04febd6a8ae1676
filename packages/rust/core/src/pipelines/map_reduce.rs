//! Map a prompt over every line of every file, then reduce each file's
//! mapped lines with a second prompt.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use versebatch_pool::{Aggregator, FanInCoordinator, GroupResult, OutputSink};
use versebatch_shared::{Result, RunReport, VersebatchError};

use super::{SharedProgress, Tally, flatten, start_pool};
use crate::input::{file_id, text_files};
use crate::model::ModelClient;
use crate::template::{PromptContext, Template, Variables, author_for};

#[derive(Debug, Clone)]
pub struct MapReduceSettings {
    /// Applied to each line.
    pub map: Template,
    /// Applied once per file to the mapped lines.
    pub reduce: Template,
    pub context: PromptContext,
    pub workers: usize,
}

/// Second stage: one model call per file over its mapped lines.
struct Reducer<M> {
    model: Arc<M>,
    template: Template,
}

impl<M: ModelClient> Aggregator<String, Option<String>> for Reducer<M> {
    type Output = String;

    async fn aggregate(&self, id: String, members: Vec<Option<String>>) -> Result<String> {
        let failed = members.iter().filter(|m| m.is_none()).count();
        if failed > 0 {
            warn!(%id, failed, "reducing with failed map results omitted");
        }
        let data = members.into_iter().flatten().collect::<Vec<_>>().join("\n");

        let mut vars = Variables::new();
        vars.set("AUTHOR", author_for(&id)).set("ID", &id);
        let prompt = self.template.expand(&vars)?;
        debug!(%id, %prompt, "reduce prompt expanded");

        let answer = self.model.query(Some(&prompt), Some(&data)).await?;
        Ok(flatten(&answer))
    }
}

/// Formats reductions as output lines.
struct ReductionSink<S>(Arc<S>);

impl<S: OutputSink<String>> OutputSink<GroupResult<String, String>> for ReductionSink<S> {
    fn emit(&self, value: GroupResult<String, String>) -> Result<()> {
        self.0
            .emit(format!("REDUCTION FOR {}: {}", value.key, value.output))
    }
}

/// Run the map prompt over each line of each `*.txt` file in `dir`; once all
/// of a file's lines are mapped, reduce them and emit
/// `"REDUCTION FOR {id}: {result}"`.
#[instrument(skip_all, fields(dir = %dir.display(), workers = settings.workers))]
pub async fn map_reduce<M, S>(
    model: Arc<M>,
    dir: &Path,
    settings: MapReduceSettings,
    sink: Arc<S>,
    progress: SharedProgress,
) -> Result<RunReport>
where
    M: ModelClient,
    S: OutputSink<String> + 'static,
{
    let report = RunReport::begin("map-reduce");
    let files = text_files(dir)?;
    info!(run_id = %report.run_id, files = files.len(), "starting map-reduce");

    let pool = start_pool(settings.workers)?;
    let coordinator = Arc::new(FanInCoordinator::new(
        pool.clone(),
        Reducer {
            model: Arc::clone(&model),
            template: settings.reduce,
        },
        Arc::new(ReductionSink(sink)),
    ));

    let tally = Arc::new(Tally::default());
    let template = Arc::new(settings.map);
    let context = Arc::new(settings.context);

    let mut work = Vec::new();
    for path in files {
        let id = file_id(&path);
        let source = std::fs::read_to_string(&path).map_err(|e| VersebatchError::io(&path, e))?;
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        if lines.is_empty() {
            warn!(%id, "skipping empty file");
            continue;
        }
        work.push((id, lines));
    }

    let total: usize = work.iter().map(|(_, lines)| lines.len()).sum();
    progress.phase(&format!("Mapping {total} lines from {} files", work.len()));

    for (id, lines) in work {
        let group_size = lines.len();
        for (index, line) in lines.into_iter().enumerate() {
            let model = Arc::clone(&model);
            let template = Arc::clone(&template);
            let context = Arc::clone(&context);
            let coordinator = Arc::clone(&coordinator);
            let tally = Arc::clone(&tally);
            let progress = Arc::clone(&progress);
            let task_id = id.clone();
            let key = id.clone();

            pool.submit(
                async move {
                    let vars = context.item_variables(&line, &task_id, index).await?;
                    let prompt = template.expand(&vars)?;
                    let answer = model.query(Some(&prompt), Some(&line)).await?;
                    Ok::<_, VersebatchError>(flatten(&answer))
                },
                move |answer| async move {
                    progress.item_done(tally.record(answer.is_some()), total);
                    coordinator
                        .on_member(key, index, group_size, answer)
                        .await
                        .map(|_| ())
                },
            );
        }
    }

    pool.join().await?;

    let unreduced = coordinator.unreduced_groups().await;
    if !unreduced.is_empty() {
        warn!(?unreduced, "files never completed their map stage");
    }

    let report = tally.finish(report, total);
    info!(
        run_id = %report.run_id,
        files = coordinator.group_count(),
        succeeded = report.succeeded,
        failed = report.failed,
        "map-reduce finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MathModel;
    use crate::pipelines::SilentProgress;
    use crate::pipelines::test_support::temp_dir;
    use versebatch_pool::CollectingSink;

    fn settings(workers: usize) -> MapReduceSettings {
        MapReduceSettings {
            map: Template::new("Map line {INDEX} of {ID}"),
            reduce: Template::new("Summarize the text {AUTHOR}"),
            context: PromptContext::default(),
            workers,
        }
    }

    #[tokio::test]
    async fn reduces_each_file_once_after_all_lines() {
        let dir = temp_dir("map-reduce");
        std::fs::write(dir.join("BH1.txt"), "1+1\n2+2\n3+3").unwrap();
        std::fs::write(dir.join("AB2.txt"), "10*10\n").unwrap();
        std::fs::write(dir.join("empty.txt"), "").unwrap();

        let sink = Arc::new(CollectingSink::new());
        let report = map_reduce(
            Arc::new(MathModel),
            &dir,
            settings(4),
            Arc::clone(&sink),
            Arc::new(SilentProgress),
        )
        .await
        .unwrap();

        let mut lines = sink.take();
        lines.sort();
        assert_eq!(
            lines,
            vec!["REDUCTION FOR AB2: 100", "REDUCTION FOR BH1: 2\t4\t6"]
        );
        assert_eq!((report.items, report.succeeded), (4, 4));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_map_lines_do_not_block_reduction() {
        let dir = temp_dir("map-reduce-fail");
        std::fs::write(dir.join("f.txt"), "5-1\n)(\n7").unwrap();

        let sink = Arc::new(CollectingSink::new());
        let report = map_reduce(
            Arc::new(MathModel),
            &dir,
            settings(2),
            Arc::clone(&sink),
            Arc::new(SilentProgress),
        )
        .await
        .unwrap();

        assert_eq!(sink.take(), vec!["REDUCTION FOR f: 4\t7"]);
        assert_eq!(report.failed, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
