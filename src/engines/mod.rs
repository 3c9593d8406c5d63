//! OCR engine interface.
//!
//! An engine turns one page image plus a set of instructions into text. It
//! reports each attempt as a [`RetryResult`], and it reports rate limits as
//! [`OcrError::RateLimited`], so that the batch driver can decide how long to
//! wait. Only a blocked response is fatal. Anything else gets retried.

use std::fmt;

use clap::{Args, ValueEnum};
use keen_retry::RetryResult;
use reqwest::StatusCode;

use crate::{
    page_source::PageImage,
    prelude::*,
    retry::{IsKnownTransient, retry_result_fatal, retry_result_transient},
};

pub mod gemini;
pub mod tesseract;

/// The result of a single recognition attempt.
pub type OcrRetryResult<T> = RetryResult<(), (), T, OcrError>;

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// A human-readable name for this engine, recorded in our outputs.
    fn name(&self) -> &str;

    /// Recognize the text on a single page.
    ///
    /// Engines which don't take instructions may ignore `prompt`.
    async fn recognize(&self, page: &PageImage, prompt: &str) -> OcrRetryResult<String>;
}

/// Errors which may occur while recognizing a page.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The provider told us to slow down.
    #[error("rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// The provider returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    /// We couldn't talk to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered, but gave us no text.
    #[error("response blocked: {feedback}")]
    Blocked { feedback: String },

    /// A local tool or file operation failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OcrError {
    /// Were we rate limited?
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OcrError::RateLimited { .. })
    }

    /// Report this error as the result of an attempt.
    pub fn into_retry_result<T>(self) -> OcrRetryResult<T> {
        if self.is_known_transient() {
            retry_result_transient(self)
        } else {
            retry_result_fatal(self)
        }
    }
}

impl IsKnownTransient for OcrError {
    /// Asking again won't unblock a refusal. Everything else, including
    /// client errors and local I/O failures, might clear up.
    fn is_known_transient(&self) -> bool {
        !matches!(self, OcrError::Blocked { .. })
    }
}

/// The OCR engines we support.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum EngineType {
    /// Google Gemini, via the `generateContent` API.
    #[default]
    Gemini,

    /// The local `tesseract` command-line tool.
    Tesseract,
}

/// Options for choosing and configuring an OCR engine.
#[derive(Args, Clone)]
pub struct EngineOpts {
    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = EngineType::default())]
    pub engine: EngineType,

    /// The Gemini model to use.
    #[clap(long, default_value = gemini::DEFAULT_MODEL)]
    pub model: String,

    /// Google AI Studio API key.
    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the Gemini API base URL.
    #[clap(long, env = "GEMINI_API_BASE", default_value = gemini::DEFAULT_API_BASE)]
    pub api_base: String,

    /// A timeout, in seconds, for each recognition request.
    #[clap(
        long,
        value_name = "SECS",
        default_value = "300",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// The Tesseract language pack to use.
    #[clap(long, default_value = "san")]
    pub language: String,
}

impl fmt::Debug for EngineOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOpts")
            .field("engine", &self.engine)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("language", &self.language)
            .finish()
    }
}

impl EngineOpts {
    /// Instantiate the selected engine. This fails if the engine can't
    /// possibly work, for example because we have no credentials.
    pub async fn create_engine(&self) -> Result<Box<dyn OcrEngine>> {
        match self.engine {
            EngineType::Gemini => Ok(Box::new(gemini::GeminiEngine::new(self)?)),
            EngineType::Tesseract => {
                Ok(Box::new(tesseract::TesseractEngine::new(self).await?))
            }
        }
    }
}
