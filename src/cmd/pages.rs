//! The `pages` subcommand.

use clap::Args;
use tokio::fs;

use crate::{
    output::{OutputLayout, OutputWriter},
    page_source::list_page_images,
    prelude::*,
    ui::Ui,
};

use super::{BatchOpts, run_and_report};

/// `pages` command line arguments.
#[derive(Debug, Args)]
pub struct PagesOpts {
    /// A directory of page images named `page_NNN.png`.
    #[clap(value_name = "IMAGES_DIR")]
    pub images_dir: PathBuf,

    /// Where to write one `{page}.txt` per page, plus `ocr_log.json`.
    #[clap(short = 'o', long, default_value = "ocr_text")]
    pub output_dir: PathBuf,

    #[clap(flatten)]
    pub batch: BatchOpts,
}

/// The `pages` subcommand.
#[instrument(level = "debug", skip_all, fields(images_dir = %opts.images_dir.display()))]
pub async fn cmd_pages(ui: &Ui, opts: &PagesOpts) -> Result<()> {
    let metadata = fs::metadata(&opts.images_dir).await.with_context(|| {
        format!("cannot find image directory {:?}", opts.images_dir.display())
    })?;
    if !metadata.is_dir() {
        bail!("{:?} is not a directory", opts.images_dir.display());
    }

    let engine = opts.batch.engine.create_engine().await?;

    let pages = list_page_images(&opts.images_dir, &opts.batch.range).await?;
    info!(
        count = pages.len(),
        range = %opts.batch.range,
        engine = engine.name(),
        "Found page images"
    );

    let writer = OutputWriter::new(&opts.output_dir, OutputLayout::PageFiles);
    run_and_report(ui, engine.as_ref(), &pages, &opts.batch, &writer).await
}
