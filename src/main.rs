use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod batch;
mod cmd;
mod commands;
mod engines;
mod output;
mod page_source;
mod prelude;
mod prompt;
mod retry;
mod ui;

/// OCR scanned book pages, politely, with resumable batches.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GEMINI_API_KEY: The Google AI Studio key to use with `--engine gemini`.
  - GEMINI_API_BASE (optional): Override the Gemini API URL.
  - RUST_LOG (optional): Logging filter, like `debug` or `nama_ocr=trace`.

  These variables may be set in a standard `.env` file.

External Tools:
  - `pdfinfo` and `pdftocairo` (from poppler-utils) for PDF input.
  - `tesseract` for `--engine tesseract`.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR a directory of `page_NNN.png` images into one text file per page.
    Pages(cmd::pages::PagesOpts),
    /// OCR a PDF or image into a JSON bundle, a text file and a proofreading
    /// template.
    Document(cmd::document::DocumentOpts),
    /// Render the pages of a PDF as `page_NNN.png` images.
    Split(cmd::split::SplitOpts),
    /// Print schemas for our output formats.
    Schema(cmd::schema::SchemaOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
///
/// We process one page at a time, so a single thread is plenty.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Pages(pages_opts) => cmd::pages::cmd_pages(&ui, pages_opts).await?,
        Cmd::Document(document_opts) => {
            cmd::document::cmd_document(&ui, document_opts).await?
        }
        Cmd::Split(split_opts) => cmd::split::cmd_split(&ui, split_opts).await?,
        Cmd::Schema(schema_opts) => cmd::schema::cmd_schema(schema_opts).await?,
    }
    Ok(())
}
