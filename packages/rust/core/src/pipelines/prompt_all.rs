//! One prompt per input line, results written in input order.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use versebatch_pool::{OrderedReassembler, OutputSink};
use versebatch_shared::{Result, RunReport, VersebatchError};

use super::{PromptSettings, SharedProgress, Tally, flatten, start_pool};
use crate::model::ModelClient;

/// Run the prompt against every line and emit one output line per input line,
/// in input order. A failed line is written as an empty line.
#[instrument(skip_all, fields(lines = lines.len(), workers = settings.workers))]
pub async fn prompt_all<M, S>(
    model: Arc<M>,
    lines: Vec<String>,
    settings: PromptSettings,
    sink: Arc<S>,
    progress: SharedProgress,
) -> Result<RunReport>
where
    M: ModelClient,
    S: OutputSink<String> + 'static,
{
    let report = RunReport::begin("prompt-all");
    info!(run_id = %report.run_id, "starting prompt-all");

    let pool = start_pool(settings.workers)?;
    let total = lines.len();
    let reassembler = Arc::new(OrderedReassembler::new(sink));
    let tally = Arc::new(Tally::default());
    let template = Arc::new(settings.template);
    let context = Arc::new(settings.context);

    progress.phase(&format!("Prompting {total} lines"));

    for (index, line) in lines.into_iter().enumerate() {
        let model = Arc::clone(&model);
        let template = Arc::clone(&template);
        let context = Arc::clone(&context);
        let reassembler = Arc::clone(&reassembler);
        let tally = Arc::clone(&tally);
        let progress = Arc::clone(&progress);

        pool.submit(
            async move {
                let id = format!("line-{}", index + 1);
                let vars = context.item_variables(&line, &id, index).await?;
                let prompt = template.expand(&vars)?;
                debug!(index, %prompt, "prompt expanded");

                let answer = model.query(Some(&prompt), Some(&line)).await?;
                Ok::<_, VersebatchError>(flatten(&answer))
            },
            move |answer| async move {
                progress.item_done(tally.record(answer.is_some()), total);
                reassembler
                    .on_result(index, answer.unwrap_or_default(), total)
                    .await
                    .map(|_| ())
            },
        );
    }

    pool.join().await?;

    let report = tally.finish(report, total);
    info!(
        run_id = %report.run_id,
        succeeded = report.succeeded,
        failed = report.failed,
        "prompt-all finished"
    );
    Ok(report)
}
