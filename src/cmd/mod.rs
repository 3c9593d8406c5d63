//! Command-line entry points.

use std::time::Duration;

use clap::Args;

use crate::{
    batch::{BatchOptions, BatchReport, run_batch},
    engines::{EngineOpts, OcrEngine, OcrError},
    output::OutputWriter,
    page_source::{PageImage, PageRange},
    prelude::*,
    prompt::{OcrPrompt, PromptHints},
    retry::RetryPolicy,
    ui::Ui,
};

pub mod document;
pub mod pages;
pub mod schema;
pub mod split;

/// Common options for subcommands that run OCR batches.
#[derive(Debug, Clone, Args)]
pub struct BatchOpts {
    #[clap(flatten)]
    pub range: PageRange,

    /// Seconds to wait between recognition requests.
    #[clap(long, value_name = "SECS", default_value = "4", value_parser = parse_seconds)]
    pub delay: Duration,

    /// Maximum attempts per page, including the first.
    #[clap(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Seconds to wait after hitting a rate limit.
    #[clap(long, value_name = "SECS", default_value = "60", value_parser = parse_seconds)]
    pub rate_limit_cooldown: Duration,

    #[clap(flatten)]
    pub hints: PromptHints,

    /// A custom prompt file, in TOML or JSON. See `schema OcrPrompt`.
    #[clap(long)]
    pub prompt: Option<PathBuf>,

    #[clap(flatten)]
    pub engine: EngineOpts,
}

impl BatchOpts {
    /// Build our batch options, rendering the prompt.
    pub async fn batch_options(&self) -> Result<BatchOptions> {
        let prompt = OcrPrompt::load(self.prompt.as_deref())
            .await?
            .render(&self.hints)?;
        Ok(BatchOptions {
            delay: self.delay,
            policy: RetryPolicy::new(
                self.max_attempts,
                self.rate_limit_cooldown,
                OcrError::is_rate_limited,
            ),
            prompt,
        })
    }
}

/// Parse a non-negative number of seconds, possibly fractional.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs = s
        .parse::<f64>()
        .map_err(|err| format!("invalid number of seconds: {err}"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| err.to_string())
}

/// Run a batch, write the run artifacts, and tell the user how it went.
pub async fn run_and_report(
    ui: &Ui,
    engine: &dyn OcrEngine,
    pages: &[PageImage],
    opts: &BatchOpts,
    writer: &OutputWriter,
) -> Result<()> {
    let batch_options = opts.batch_options().await?;
    let report = run_batch(ui, engine, pages, &batch_options, writer).await?;
    let artifacts = writer.finish(&report, engine.name()).await?;
    display_summary(ui, &report, &artifacts);
    Ok(())
}

/// Print a summary of a batch. Stopping for a rate limit isn't an error,
/// since re-running the same command picks up where we left off.
fn display_summary(ui: &Ui, report: &BatchReport, artifacts: &[PathBuf]) {
    let mut summary = format!(
        "{}/{} pages recognized",
        report.successful, report.total_pages
    );
    if report.skipped > 0 {
        summary.push_str(&format!(" ({} from earlier runs)", report.skipped));
    }
    ui.display_message("📊", &summary);

    for failed in &report.failed {
        let emoji = if failed.retry_later { "⏸️" } else { "❌" };
        ui.display_message(
            emoji,
            &format!("Page {} ({}): {}", failed.page, failed.file, failed.error),
        );
    }
    if report.halted {
        let remaining = report.total_pages - report.records.len();
        ui.display_message(
            "⏸️",
            &format!(
                "Stopped early because of rate limiting, with {remaining} pages not \
                 attempted. Resume later by re-running the same command."
            ),
        );
    }

    for path in artifacts {
        ui.display_message("💾", &format!("Wrote {}", path.display()));
    }
}
