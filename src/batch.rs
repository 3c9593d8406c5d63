//! The OCR batch loop.
//!
//! Pages are recognized strictly one after another, with a fixed pause
//! between requests. Pages with existing output are skipped, so a run that
//! was interrupted or halted by a rate limit can be resumed by running the
//! same command again.

use std::time::Duration;

use schemars::JsonSchema;
use tokio::time::sleep;

use crate::{
    engines::{OcrEngine, OcrError},
    output::OutputWriter,
    page_source::PageImage,
    prelude::*,
    retry::{RetryOutcome, RetryPolicy, attempt_with_retry},
    ui::{ProgressConfig, Ui},
};

/// What happened to a page.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Success,
    Failed,
    RateLimited,
}

/// The result of recognizing a single page.
#[derive(Clone, Debug)]
pub struct PageRecord {
    pub page_number: u32,
    pub source_image: PathBuf,
    pub text: String,
    pub status: PageStatus,
    /// Present only for pages that didn't succeed.
    pub error: Option<String>,
}

impl PageRecord {
    /// The file name of our source image.
    pub fn image_file(&self) -> String {
        self.source_image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_image.display().to_string())
    }
}

/// A page that failed, as shown in our run summary.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct FailedPage {
    /// The page number.
    pub page: u32,

    /// The page image file name.
    pub file: String,

    /// Why we failed.
    pub error: String,

    /// Should this page be retried in a later run? Set when we were
    /// rate limited.
    pub retry_later: bool,
}

/// The results of a batch.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// One record per page we reached, in page order.
    pub records: Vec<PageRecord>,

    /// The number of pages we were asked to process.
    pub total_pages: usize,

    /// Pages which have text, including pages skipped from earlier runs.
    pub successful: usize,

    /// Pages we skipped because their output already existed.
    pub skipped: usize,

    /// Pages which failed.
    pub failed: Vec<FailedPage>,

    /// Did we stop early because of a rate limit?
    pub halted: bool,
}

impl BatchReport {
    fn record_success(&mut self, page: &PageImage, text: String) {
        self.successful += 1;
        self.records.push(PageRecord {
            page_number: page.page_number,
            source_image: page.path.clone(),
            text,
            status: PageStatus::Success,
            error: None,
        });
    }

    fn record_failure(&mut self, page: &PageImage, status: PageStatus, error: String) {
        self.failed.push(FailedPage {
            page: page.page_number,
            file: page.file_name(),
            error: error.clone(),
            retry_later: status == PageStatus::RateLimited,
        });
        self.records.push(PageRecord {
            page_number: page.page_number,
            source_image: page.path.clone(),
            text: String::new(),
            status,
            error: Some(error),
        });
    }
}

/// How to run a batch.
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// How long to pause between recognition requests.
    pub delay: Duration,

    /// How to retry failed requests.
    pub policy: RetryPolicy<OcrError>,

    /// The rendered instructions to send with each page.
    pub prompt: String,
}

/// Recognize `pages` in order, writing results with `writer`.
///
/// Per-page failures are recorded in the report. We only return an error if
/// there is nothing to do, or if we can't write our output.
#[instrument(level = "debug", skip_all, fields(pages = pages.len(), engine = engine.name()))]
pub async fn run_batch(
    ui: &Ui,
    engine: &dyn OcrEngine,
    pages: &[PageImage],
    opts: &BatchOptions,
    writer: &OutputWriter,
) -> Result<BatchReport> {
    if pages.is_empty() {
        bail!("no page images found");
    }
    writer.prepare().await?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔍",
            msg: "Recognizing pages",
            done_msg: "Recognized pages",
        },
        pages.len() as u64,
    );

    let mut report = BatchReport {
        total_pages: pages.len(),
        ..BatchReport::default()
    };
    for (idx, page) in pages.iter().enumerate() {
        let is_last = idx + 1 == pages.len();

        if let Some(text) = writer.existing_text(page.page_number).await? {
            info!(page = page.page_number, "Already recognized, skipping");
            report.skipped += 1;
            report.record_success(page, text);
            pb.inc(1);
            continue;
        }

        let outcome = attempt_with_retry(&opts.policy, |attempt| {
            debug!(page = page.page_number, attempt, "Recognizing page");
            engine.recognize(page, &opts.prompt)
        })
        .await;
        match outcome {
            RetryOutcome::Succeeded { output, attempts } => {
                info!(
                    page = page.page_number,
                    chars = output.chars().count(),
                    attempts,
                    "Recognized page"
                );
                writer.write_page_text(page.page_number, &output).await?;
                report.record_success(page, output);
            }
            RetryOutcome::RateLimited { error, attempts } => {
                error!(
                    page = page.page_number,
                    attempts,
                    %error,
                    "Still rate limited, stopping"
                );
                report.record_failure(page, PageStatus::RateLimited, error.to_string());
                report.halted = true;
                pb.inc(1);
                break;
            }
            RetryOutcome::Failed { error, attempts } => {
                error!(page = page.page_number, attempts, %error, "Page failed");
                report.record_failure(page, PageStatus::Failed, error.to_string());
            }
        }
        pb.inc(1);

        if !is_last {
            sleep(opts.delay).await;
        }
    }
    pb.finish_using_style();

    Ok(report)
}
