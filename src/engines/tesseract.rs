//! Tesseract OCR engine.

use tokio::{fs, process::Command};

use crate::{
    commands::check_for_command_failure,
    page_source::PageImage,
    prelude::*,
    retry::{retry_result_ok, try_transient},
};

use super::{EngineOpts, OcrEngine, OcrRetryResult};

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractEngine {
    /// The language pack to use, like `san` or `san+eng`.
    language: String,

    /// Our display name.
    name: String,
}

impl TesseractEngine {
    /// Create a new `tesseract` engine, checking that the tool is installed.
    pub async fn new(opts: &EngineOpts) -> Result<Self> {
        let output = Command::new("tesseract")
            .arg("--version")
            .output()
            .await
            .context("cannot run tesseract (is it installed and on your PATH?)")?;
        check_for_command_failure("tesseract", &output, None)?;
        Ok(Self {
            language: opts.language.clone(),
            name: format!("tesseract ({})", opts.language),
        })
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(page = page.page_number))]
    async fn recognize(&self, page: &PageImage, _prompt: &str) -> OcrRetryResult<String> {
        let tmpdir = try_transient!(
            tempfile::TempDir::with_prefix("tesseract")
                .context("cannot create tesseract output directory")
        );
        let output_base = tmpdir.path().join("output");

        // `--oem 3` picks the best available model, and `--psm 6` treats the
        // page as a single uniform block of text.
        let output = try_transient!(
            Command::new("tesseract")
                .arg(&page.path)
                .arg(&output_base)
                .arg("-l")
                .arg(&self.language)
                .arg("--oem")
                .arg("3")
                .arg("--psm")
                .arg("6")
                .output()
                .await
                .context("cannot run tesseract")
        );
        try_transient!(check_for_command_failure("tesseract", &output, None));

        let text = try_transient!(
            fs::read_to_string(output_base.with_extension("txt"))
                .await
                .context("cannot read tesseract output file")
        );
        retry_result_ok(text.trim().to_owned())
    }
}
