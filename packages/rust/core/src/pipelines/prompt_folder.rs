//! One prompt per `*.txt` file in a folder.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use versebatch_pool::OutputSink;
use versebatch_shared::{Result, RunReport, VersebatchError};

use super::{PromptSettings, SharedProgress, Tally, flatten, start_pool};
use crate::input::{file_id, text_files};
use crate::model::ModelClient;

/// Run the prompt against each file's full contents and emit
/// `"{id}: {result}"` lines as results complete.
#[instrument(skip_all, fields(dir = %dir.display(), workers = settings.workers))]
pub async fn prompt_folder<M, S>(
    model: Arc<M>,
    dir: &Path,
    settings: PromptSettings,
    sink: Arc<S>,
    progress: SharedProgress,
) -> Result<RunReport>
where
    M: ModelClient,
    S: OutputSink<String> + 'static,
{
    let report = RunReport::begin("prompt-folder");
    let files = text_files(dir)?;
    info!(run_id = %report.run_id, files = files.len(), "starting prompt-folder");

    let pool = start_pool(settings.workers)?;
    let total = files.len();
    let tally = Arc::new(Tally::default());
    let template = Arc::new(settings.template);
    let context = Arc::new(settings.context);

    progress.phase(&format!("Prompting {total} files"));

    for (index, path) in files.into_iter().enumerate() {
        let id = file_id(&path);
        let model = Arc::clone(&model);
        let template = Arc::clone(&template);
        let context = Arc::clone(&context);
        let sink = Arc::clone(&sink);
        let tally = Arc::clone(&tally);
        let progress = Arc::clone(&progress);
        let task_id = id.clone();

        pool.submit(
            async move {
                let contents = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| VersebatchError::io(&path, e))?;
                let vars = context.item_variables(&contents, &task_id, index).await?;
                let prompt = template.expand(&vars)?;
                debug!(id = %task_id, %prompt, "prompt expanded");

                let answer = model.query(Some(&prompt), Some(&contents)).await?;
                Ok::<_, VersebatchError>(flatten(&answer))
            },
            move |answer| async move {
                progress.item_done(tally.record(answer.is_some()), total);
                match answer {
                    Some(answer) => sink.emit(format!("{id}: {answer}")),
                    None => {
                        warn!(%id, "no result for file");
                        Ok(())
                    }
                }
            },
        );
    }

    pool.join().await?;

    let report = tally.finish(report, total);
    info!(
        run_id = %report.run_id,
        succeeded = report.succeeded,
        failed = report.failed,
        "prompt-folder finished"
    );
    Ok(report)
}
