//! Where we put our results.
//!
//! Every run writes one text file per recognized page, which doubles as our
//! resume marker, plus a run log. Document runs also write a consolidated
//! JSON bundle, a plain-text concatenation and a proofreading template.

use chrono::{DateTime, Local};
use schemars::JsonSchema;
use tokio::fs;

use crate::{
    batch::{BatchReport, FailedPage, PageRecord, PageStatus},
    prelude::*,
    prompt::PromptHints,
};

/// The name of our run log, in both layouts.
pub const RUN_LOG_FILE_NAME: &str = "ocr_log.json";

/// The banner we put around page headings in the plain-text output.
fn banner() -> String {
    "=".repeat(80)
}

/// Information about the document behind a bundle.
#[derive(Clone, Debug)]
pub struct BundleInfo {
    /// The document we were given.
    pub source_file: PathBuf,

    /// The document's file stem, used to name our outputs.
    pub stem: String,

    /// The resolution pages were rendered at.
    pub dpi: u32,

    /// Hints passed to the engine.
    pub hints: PromptHints,

    /// The project name to put in the proofreading template.
    pub project: Option<String>,
}

/// How to lay out our output directory.
#[derive(Clone, Debug)]
pub enum OutputLayout {
    /// `{n}.txt` per page, plus a run log.
    PageFiles,

    /// `text/{n}.txt` per page, rendered images in `images/`, and the
    /// consolidated document artifacts.
    Bundle(BundleInfo),
}

/// Writes our output files.
#[derive(Clone, Debug)]
pub struct OutputWriter {
    output_dir: PathBuf,
    layout: OutputLayout,
}

impl OutputWriter {
    /// Create a writer. Nothing is written until [`OutputWriter::prepare`].
    pub fn new(output_dir: impl Into<PathBuf>, layout: OutputLayout) -> Self {
        Self {
            output_dir: output_dir.into(),
            layout,
        }
    }

    /// The directory holding per-page text files.
    pub fn text_dir(&self) -> PathBuf {
        match &self.layout {
            OutputLayout::PageFiles => self.output_dir.clone(),
            OutputLayout::Bundle(_) => self.output_dir.join("text"),
        }
    }

    /// The directory holding rendered page images, if this layout has one.
    pub fn images_dir(&self) -> Option<PathBuf> {
        match &self.layout {
            OutputLayout::PageFiles => None,
            OutputLayout::Bundle(_) => Some(self.output_dir.join("images")),
        }
    }

    /// The text file for `page_number`.
    pub fn text_path(&self, page_number: u32) -> PathBuf {
        self.text_dir().join(format!("{page_number}.txt"))
    }

    /// The text of a page we recognized in an earlier run, if any.
    pub async fn existing_text(&self, page_number: u32) -> Result<Option<String>> {
        let path = self.text_path(page_number);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read {:?}", path.display())),
        }
    }

    /// Create our output directories.
    pub async fn prepare(&self) -> Result<()> {
        let text_dir = self.text_dir();
        fs::create_dir_all(&text_dir).await.with_context(|| {
            format!("failed to create output directory {:?}", text_dir.display())
        })
    }

    /// Save the text of a single page.
    ///
    /// We write to a temporary name and rename, so an interrupted run never
    /// leaves behind a partial file that would be skipped on resume.
    pub async fn write_page_text(&self, page_number: u32, text: &str) -> Result<()> {
        let path = self.text_path(page_number);
        let tmp_path = path.with_extension("txt.tmp");
        fs::write(&tmp_path, text)
            .await
            .with_context(|| format!("failed to write {:?}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to write {:?}", path.display()))
    }

    /// Write our run-level artifacts, returning their paths.
    #[instrument(level = "debug", skip_all, fields(output_dir = %self.output_dir.display()))]
    pub async fn finish(&self, report: &BatchReport, model: &str) -> Result<Vec<PathBuf>> {
        let timestamp = Local::now();
        let mut written = vec![];

        if let OutputLayout::Bundle(info) = &self.layout {
            let bundle = OcrBundle::new(info, report, model, timestamp);
            let path = self.output_dir.join(format!("{}_ocr.json", info.stem));
            write_json(&path, &bundle).await?;
            written.push(path);

            let path = self.output_dir.join(format!("{}_ocr.txt", info.stem));
            fs::write(&path, plain_text(&report.records))
                .await
                .with_context(|| format!("failed to write {:?}", path.display()))?;
            written.push(path);

            let template = ProofreadingTemplate::new(info, report, model, timestamp);
            let path = self
                .output_dir
                .join(format!("{}_proofreading.json", info.stem));
            write_json(&path, &template).await?;
            written.push(path);
        }

        let log = RunLog::new(report, model, timestamp);
        let path = self.output_dir.join(RUN_LOG_FILE_NAME);
        write_json(&path, &log).await?;
        written.push(path);

        debug!(count = written.len(), "Wrote run artifacts");
        Ok(written)
    }
}

/// Write `value` as pretty-printed JSON.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {:?}", path.display()))?;
    json.push('\n');
    fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {:?}", path.display()))
}

/// All successful pages, each under a `Page N` banner.
fn plain_text(records: &[PageRecord]) -> String {
    let banner = banner();
    let mut out = String::new();
    for record in records.iter().filter(|r| r.status == PageStatus::Success) {
        out.push_str(&format!(
            "{banner}\nPage {}\n{banner}\n\n{}\n\n",
            record.page_number, record.text
        ));
    }
    out
}

/// A summary of a single run.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct RunLog {
    /// When the run finished.
    pub timestamp: DateTime<Local>,

    /// The engine or model we used.
    pub model: String,

    /// The number of pages selected for this run.
    pub total_pages: usize,

    /// Pages with text, including those recognized in earlier runs.
    pub successful: usize,

    /// Pages skipped because they were recognized in an earlier run.
    pub skipped: usize,

    /// Did a rate limit stop the run early?
    pub halted: bool,

    /// Pages that failed.
    pub failed: Vec<FailedPage>,
}

impl RunLog {
    fn new(report: &BatchReport, model: &str, timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            model: model.to_owned(),
            total_pages: report.total_pages,
            successful: report.successful,
            skipped: report.skipped,
            halted: report.halted,
            failed: report.failed.clone(),
        }
    }
}

/// Everything we extracted from a document.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct OcrBundle {
    /// Information about the run.
    pub metadata: BundleMetadata,

    /// One entry per page we processed.
    pub pages: Vec<BundlePage>,
}

impl OcrBundle {
    fn new(
        info: &BundleInfo,
        report: &BatchReport,
        model: &str,
        timestamp: DateTime<Local>,
    ) -> Self {
        let pages = report
            .records
            .iter()
            .map(|record| BundlePage {
                page_number: record.page_number,
                image_file: record.image_file(),
                text: record.text.clone(),
                char_count: record.text.chars().count(),
                status: record.status,
                error: record.error.clone(),
            })
            .collect::<Vec<_>>();
        let total_characters = pages
            .iter()
            .filter(|page| page.status == PageStatus::Success)
            .map(|page| page.char_count)
            .sum();
        Self {
            metadata: BundleMetadata {
                source_file: info.source_file.display().to_string(),
                model: model.to_owned(),
                timestamp,
                total_pages: pages.len(),
                total_characters,
                dpi: info.dpi,
                typeface: info.hints.typeface.clone(),
                context: info.hints.context.clone(),
            },
            pages,
        }
    }
}

/// Metadata about a document run.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct BundleMetadata {
    pub source_file: String,
    pub model: String,
    pub timestamp: DateTime<Local>,
    pub total_pages: usize,
    /// Unicode scalar values across all successful pages.
    pub total_characters: usize,
    pub dpi: u32,
    pub typeface: Option<String>,
    pub context: Option<String>,
}

/// A single page of a document.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct BundlePage {
    pub page_number: u32,
    pub image_file: String,
    pub text: String,
    pub char_count: usize,
    pub status: PageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A worksheet for human proofreaders.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct ProofreadingTemplate {
    /// The project this document belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// The document we were given.
    pub source_file: String,

    /// How the text was produced.
    pub ocr_method: String,

    /// When the template was created.
    pub date: DateTime<Local>,

    /// One entry per page.
    pub pages: Vec<ProofreadingPage>,
}

impl ProofreadingTemplate {
    fn new(
        info: &BundleInfo,
        report: &BatchReport,
        model: &str,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            project: info.project.clone(),
            source_file: info.source_file.display().to_string(),
            ocr_method: model.to_owned(),
            date: timestamp,
            pages: report
                .records
                .iter()
                .map(|record| ProofreadingPage {
                    page_number: record.page_number,
                    image_file: record.image_file(),
                    ocr_text: record.text.clone(),
                    corrected_text: String::new(),
                    needs_review: record.status != PageStatus::Success,
                    notes: record.error.clone().unwrap_or_default(),
                    status: ReviewStatus::Pending,
                })
                .collect(),
        }
    }
}

/// A single page awaiting proofreading.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
pub struct ProofreadingPage {
    pub page_number: u32,
    pub image_file: String,
    pub ocr_text: String,
    /// Filled in by the proofreader.
    pub corrected_text: String,
    /// Set for pages that have no usable OCR text.
    pub needs_review: bool,
    pub notes: String,
    pub status: ReviewStatus,
}

/// Where a page is in the proofreading workflow. We only ever create
/// templates, so every page starts out pending.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Nobody has looked at this page yet.
    #[default]
    Pending,
}
