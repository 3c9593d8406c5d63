//! The `split` subcommand.

use clap::Args;
use tokio::fs;

use crate::{
    page_source::{PageRange, render_pdf_pages},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// `split` command line arguments.
#[derive(Debug, Args)]
pub struct SplitOpts {
    /// The PDF to split.
    #[clap(value_name = "PDF")]
    pub pdf: PathBuf,

    /// Where to write `page_NNN.png` images.
    #[clap(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Rendering resolution.
    #[clap(long, default_value = "300", value_parser = clap::value_parser!(u32).range(1..))]
    pub dpi: u32,

    #[clap(flatten)]
    pub range: PageRange,
}

/// The `split` subcommand. Its output is ready for the `pages` subcommand.
#[instrument(level = "debug", skip_all, fields(pdf = %opts.pdf.display()))]
pub async fn cmd_split(ui: &Ui, opts: &SplitOpts) -> Result<()> {
    fs::metadata(&opts.pdf)
        .await
        .with_context(|| format!("cannot find PDF {:?}", opts.pdf.display()))?;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📄",
        msg: "Rendering pages",
        done_msg: "Rendered pages",
    });
    let pages =
        render_pdf_pages(&opts.pdf, &opts.output_dir, "page_", opts.dpi, &opts.range)
            .await?;
    spinner.finish_with_message(format!("Rendered {} pages", pages.len()));

    match (pages.first(), pages.last()) {
        (Some(first), Some(last)) => ui.display_message(
            "✅",
            &format!(
                "Wrote {} through {} to {}",
                first.file_name(),
                last.file_name(),
                opts.output_dir.display()
            ),
        ),
        _ => ui.display_message("⚠️", &format!("No pages in {}", opts.range)),
    }
    Ok(())
}
