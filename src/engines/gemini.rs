//! Google Gemini OCR engine, talking to the `generateContent` REST API.

use std::time::Duration;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::fs;

use crate::{
    page_source::{PageImage, SUPPORTED_IMAGE_TYPES, get_mime_type},
    prelude::*,
    retry::{IsKnownTransient, retry_result_ok, try_potentially_transient, try_transient},
};

use super::{EngineOpts, OcrEngine, OcrError, OcrRetryResult};

/// The model we use unless told otherwise.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// The public Gemini API.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// OCR engine which sends each page to Gemini.
pub struct GeminiEngine {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiEngine {
    /// Create a new Gemini engine. Fails immediately if we have no API key.
    pub fn new(opts: &EngineOpts) -> Result<Self> {
        let api_key = opts
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "a Gemini API key is required: pass --api-key or set GEMINI_API_KEY \
                     (get one from https://aistudio.google.com/apikey)"
                )
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(opts.timeout))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            api_base: opts.api_base.trim_end_matches('/').to_owned(),
            model: opts.model.clone(),
        })
    }

    /// The URL we POST to.
    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

#[async_trait]
impl OcrEngine for GeminiEngine {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(level = "debug", skip_all, fields(page = page.page_number, model = %self.model))]
    async fn recognize(&self, page: &PageImage, prompt: &str) -> OcrRetryResult<String> {
        let image = try_transient!(
            fs::read(&page.path)
                .await
                .with_context(|| format!("failed to read {:?}", page.path.display()))
        );
        let mime_type = try_transient!(image_mime_type(&page.path));
        let request = GenerateContentRequest::new(prompt, mime_type, &image);
        drop(image);

        let response = try_transient!(
            self.client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
        );
        let status = response.status();
        let body = try_transient!(response.text().await);
        if !status.is_success() {
            return classify_error_response(status, &body).into_retry_result();
        }

        // A truncated or garbled body is worth another try.
        let response = try_transient!(
            serde_json::from_str::<GenerateContentResponse>(&body)
                .context("failed to parse Gemini response")
        );
        if let Some(usage) = &response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                completion_tokens = usage.candidates_token_count,
                "Token usage"
            );
        }
        let text = try_potentially_transient!(extract_text(&response));
        retry_result_ok(text)
    }
}

/// Get the MIME type of a page image, making sure Gemini accepts it.
fn image_mime_type(path: &Path) -> Result<String> {
    let mime_type = get_mime_type(path)?;
    if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
        Ok(mime_type)
    } else {
        Err(anyhow!(
            "unsupported image type {} for {:?} (supported: PNG, JPEG, WebP)",
            mime_type,
            path.display()
        ))
    }
}

/// Turn a non-2xx response into an [`OcrError`]. Gemini reports quota
/// exhaustion with HTTP 429 and a `RESOURCE_EXHAUSTED` status.
fn classify_error_response(status: StatusCode, body: &str) -> OcrError {
    let (message, api_status) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.trim().to_owned(), String::new()),
    };
    if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        OcrError::RateLimited { message }
    } else {
        OcrError::Api { status, message }
    }
}

/// Pull the transcription out of a successful response. An empty answer
/// means Gemini refused, so we pass along whatever feedback it gave.
fn extract_text(response: &GenerateContentResponse) -> Result<String, OcrError> {
    let candidate = response.candidates.first();
    let text = candidate
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();
    let text = text.trim();
    if !text.is_empty() {
        return Ok(text.to_owned());
    }

    let feedback = if let Some(feedback) = &response.prompt_feedback {
        feedback.to_string()
    } else if let Some(reason) = candidate.and_then(|c| c.finish_reason.as_deref()) {
        format!("finishReason {reason}")
    } else {
        "no candidates returned".to_owned()
    };
    Err(OcrError::Blocked { feedback })
}

/// Request body for `generateContent`.
#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    /// Build a single-turn request with our instructions and one image.
    fn new(prompt: &'a str, mime_type: String, image: &[u8]) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: prompt },
                    RequestPart::InlineData {
                        inline_data: Blob {
                            mime_type,
                            data: BASE64_STANDARD.encode(image),
                        },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

/// Response body from `generateContent`. We only model what we use.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    /// Set on "thinking" output, which isn't part of the transcription.
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

/// Error body returned by Google APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}
