//! Download documents listed in a CSV, save them, and check each against its
//! expected first line and word count.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, instrument, warn};

use versebatch_crawler::Fetcher;
use versebatch_shared::{Result, RunReport, ValidationConfig, VersebatchError};
use versebatch_text::validate;

use super::{SharedProgress, Tally, start_pool};

/// One document to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRow {
    pub id: String,
    pub url: String,
    /// Expected opening text, possibly cut short with an ellipsis.
    pub first_line: String,
    pub word_count: usize,
}

/// Outcome counts for a CSV download run.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub report: RunReport,
    pub accepted: usize,
    pub rejected: usize,
    /// Rows whose fetch or save failed.
    pub failed: usize,
}

const ID_COLUMN: &str = "ID";
const URL_COLUMN: &str = "Url";
const FIRST_LINE_COLUMN: &str = "First line";
const WORD_COUNT_COLUMN: &str = "Word count";

/// Parse download rows from CSV text with a header row.
///
/// Columns may come in any order and extra columns are ignored. Ids that
/// contain an `x` are placeholders and are replaced by `index-{line}`, the
/// row's line number in the file.
pub fn parse_download_csv(source: &str) -> Result<Vec<DownloadRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(source.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| VersebatchError::config(format!("invalid CSV header: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| VersebatchError::config(format!("CSV is missing the '{name}' column")))
    };
    let id_col = column(ID_COLUMN)?;
    let url_col = column(URL_COLUMN)?;
    let first_line_col = column(FIRST_LINE_COLUMN)?;
    let word_count_col = column(WORD_COUNT_COLUMN)?;

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let line = row + 2;
        let record =
            record.map_err(|e| VersebatchError::config(format!("CSV line {line}: {e}")))?;
        let field = |col: usize| record.get(col).unwrap_or("").trim().to_string();

        let mut id = field(id_col);
        if id.contains('x') {
            id = format!("index-{line}");
        }
        check_file_id(&id)
            .map_err(|e| VersebatchError::config(format!("CSV line {line}: {e}")))?;

        let count = field(word_count_col);
        let word_count = count.parse().map_err(|_| {
            VersebatchError::config(format!("CSV line {line}: invalid word count '{count}'"))
        })?;

        rows.push(DownloadRow {
            id,
            url: field(url_col),
            first_line: field(first_line_col),
            word_count,
        });
    }

    debug!(rows = rows.len(), "download CSV parsed");
    Ok(rows)
}

/// A document id becomes a file name inside the output directory, so it must
/// be a single path component.
fn check_file_id(id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(VersebatchError::config(format!(
            "invalid document id '{}': must be a plain file name",
            id.escape_default()
        )));
    }
    Ok(())
}

async fn save(output_dir: &Path, id: &str, text: &str) -> Result<PathBuf> {
    check_file_id(id)?;
    let path = output_dir.join(format!("{id}.txt"));
    tokio::fs::write(&path, text)
        .await
        .map_err(|e| VersebatchError::io(&path, e))?;
    Ok(path)
}

/// Fetch `url` and save its text as `<output_dir>/<file_id>.txt`.
#[instrument(skip_all, fields(url = %url))]
pub async fn download_url<F: Fetcher>(
    fetcher: &F,
    url: &str,
    output_dir: &Path,
    file_id: &str,
) -> Result<PathBuf> {
    check_file_id(file_id)?;
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| VersebatchError::io(output_dir, e))?;

    let text = fetcher.fetch(url).await?;
    let path = save(output_dir, file_id, &text).await?;
    info!(path = %path.display(), chars = text.chars().count(), "document saved");
    Ok(path)
}

/// Download every row concurrently, save each document and validate it.
///
/// Fetch and save failures are logged and counted; they never stop the
/// other rows.
#[instrument(skip_all, fields(rows = rows.len(), workers = workers))]
pub async fn download_csv<F: Fetcher>(
    fetcher: Arc<F>,
    rows: Vec<DownloadRow>,
    output_dir: &Path,
    validation: ValidationConfig,
    workers: usize,
    progress: SharedProgress,
) -> Result<DownloadReport> {
    let report = RunReport::begin("download-csv");
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| VersebatchError::io(output_dir, e))?;
    info!(run_id = %report.run_id, rows = rows.len(), "starting download");

    let pool = start_pool(workers)?;
    let total = rows.len();
    let tally = Arc::new(Tally::default());
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    progress.phase(&format!("Downloading {total} documents"));

    for row in rows {
        let fetcher = Arc::clone(&fetcher);
        let output_dir = output_dir.to_path_buf();
        let tally = Arc::clone(&tally);
        let accepted = Arc::clone(&accepted);
        let rejected = Arc::clone(&rejected);
        let progress = Arc::clone(&progress);
        let id = row.id.clone();

        pool.submit(
            async move {
                let text = fetcher.fetch(&row.url).await?;
                save(&output_dir, &row.id, &text).await?;
                Ok::<_, VersebatchError>(validate(
                    &row.first_line,
                    &text,
                    row.word_count,
                    &validation,
                ))
            },
            move |verdict| async move {
                progress.item_done(tally.record(verdict.is_some()), total);
                match verdict {
                    Some(verdict) if verdict.is_accepted() => {
                        accepted.fetch_add(1, Ordering::Relaxed);
                        info!(
                            %id,
                            distance = ?verdict.distance(),
                            offset = ?verdict.offset(),
                            "{}",
                            verdict.reason()
                        );
                    }
                    Some(verdict) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(%id, distance = ?verdict.distance(), "{}", verdict.reason());
                    }
                    None => warn!(%id, "download failed"),
                }
                Ok::<_, VersebatchError>(())
            },
        );
    }

    pool.join().await?;

    let report = tally.finish(report, total);
    let result = DownloadReport {
        accepted: accepted.load(Ordering::Relaxed),
        rejected: rejected.load(Ordering::Relaxed),
        failed: report.failed,
        report,
    };
    info!(
        run_id = %result.report.run_id,
        accepted = result.accepted,
        rejected = result.rejected,
        failed = result.failed,
        "download finished"
    );
    Ok(result)
}
