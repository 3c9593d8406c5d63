//! The `document` subcommand.

use clap::Args;
use tokio::fs;

use crate::{
    output::{BundleInfo, OutputLayout, OutputWriter},
    page_source::{PageImage, PageRange, page_file_name, render_pdf_pages},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::{BatchOpts, run_and_report};

/// `document` command line arguments.
#[derive(Debug, Args)]
pub struct DocumentOpts {
    /// A PDF, or a single page image.
    #[clap(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Where to write page images, page text and the consolidated outputs.
    #[clap(short = 'o', long, default_value = "ocr_output")]
    pub output_dir: PathBuf,

    /// Resolution for rendering PDF pages.
    #[clap(long, default_value = "300", value_parser = clap::value_parser!(u32).range(1..))]
    pub dpi: u32,

    /// Project name for the proofreading template.
    #[clap(long)]
    pub project: Option<String>,

    #[clap(flatten)]
    pub batch: BatchOpts,
}

/// What kind of document were we given?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Guess from the file extension.
    fn from_path(path: &Path) -> Result<Self> {
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream");
        if mime_type == "application/pdf" {
            Ok(DocumentKind::Pdf)
        } else if mime_type.starts_with("image/") {
            Ok(DocumentKind::Image)
        } else {
            Err(anyhow!(
                "don't know how to OCR {:?} ({}); expected a PDF or an image",
                path.display(),
                mime_type
            ))
        }
    }
}

/// The `document` subcommand.
#[instrument(level = "debug", skip_all, fields(document = %opts.document.display()))]
pub async fn cmd_document(ui: &Ui, opts: &DocumentOpts) -> Result<()> {
    let metadata = fs::metadata(&opts.document)
        .await
        .with_context(|| format!("cannot find document {:?}", opts.document.display()))?;
    if !metadata.is_file() {
        bail!("{:?} is not a file", opts.document.display());
    }
    let kind = DocumentKind::from_path(&opts.document)?;
    let stem = opts
        .document
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("cannot get file name of {:?}", opts.document.display()))?;

    let engine = opts.batch.engine.create_engine().await?;

    let writer = OutputWriter::new(
        &opts.output_dir,
        OutputLayout::Bundle(BundleInfo {
            source_file: opts.document.clone(),
            stem: stem.clone(),
            dpi: opts.dpi,
            hints: opts.batch.hints.clone(),
            project: opts.project.clone(),
        }),
    );
    let images_dir = writer
        .images_dir()
        .context("document output should have an images directory")?;
    let file_prefix = format!("{stem}_page_");

    let pages = match kind {
        DocumentKind::Pdf => {
            let spinner = ui.new_spinner(&ProgressConfig {
                emoji: "📄",
                msg: "Rendering pages",
                done_msg: "Rendered pages",
            });
            let pages = render_pdf_pages(
                &opts.document,
                &images_dir,
                &file_prefix,
                opts.dpi,
                &opts.batch.range,
            )
            .await?;
            spinner.finish_with_message(format!(
                "Rendered {} pages at {} DPI",
                pages.len(),
                opts.dpi
            ));
            pages
        }
        DocumentKind::Image => {
            copy_single_image(&opts.document, &images_dir, &file_prefix, &opts.batch.range)
                .await?
        }
    };
    info!(count = pages.len(), engine = engine.name(), "Prepared page images");

    run_and_report(ui, engine.as_ref(), &pages, &opts.batch, &writer).await
}

/// Treat a single image as page 1 of a document, copying it next to any
/// rendered pages.
async fn copy_single_image(
    image: &Path,
    images_dir: &Path,
    file_prefix: &str,
    range: &PageRange,
) -> Result<Vec<PageImage>> {
    if !range.contains(1) {
        return Ok(vec![]);
    }
    fs::create_dir_all(images_dir).await.with_context(|| {
        format!("failed to create image directory {:?}", images_dir.display())
    })?;

    let mut path = images_dir.join(page_file_name(file_prefix, 1));
    if let Some(ext) = image.extension() {
        path.set_extension(ext);
    }
    fs::copy(image, &path).await.with_context(|| {
        format!("failed to copy {:?} to {:?}", image.display(), path.display())
    })?;
    Ok(vec![PageImage {
        page_number: 1,
        path,
    }])
}
