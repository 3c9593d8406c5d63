//! The instructions we send along with each page image.

use clap::Args;
use handlebars::{Handlebars, no_escape};
use schemars::JsonSchema;
use tokio::fs;

use crate::prelude::*;

/// The default OCR prompt, used if no prompt is provided.
const DEFAULT_OCR_PROMPT: &str = include_str!("prompt/default_ocr_prompt.toml");

/// An OCR prompt, loaded from TOML or JSON.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OcrPrompt {
    /// A Handlebars template for the recognition instructions. The optional
    /// hints are available as `typeface` and `context`.
    pub template: String,
}

impl OcrPrompt {
    /// Get our default OCR prompt.
    pub fn default_prompt() -> Self {
        toml::from_str::<OcrPrompt>(DEFAULT_OCR_PROMPT)
            .expect("failed to parse built-in OCR prompt")
    }

    /// Load a prompt from `path`, or fall back to the default.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json_or_toml(path).await,
            None => Ok(Self::default_prompt()),
        }
    }

    /// Render our template with `hints`. Hints are inserted verbatim, without
    /// any HTML escaping.
    pub fn render(&self, hints: &PromptHints) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(no_escape);
        handlebars
            .render_template(&self.template, hints)
            .context("failed to render OCR prompt")
    }
}

/// Optional free-text hints appended to the recognition instructions.
#[derive(Args, Clone, Debug, Default, Serialize)]
pub struct PromptHints {
    /// A description of the typeface or font, like "Clear Devanagari print".
    #[clap(long)]
    pub typeface: Option<String>,

    /// Context about the text, like "Commentary on the Lalita Sahasranama".
    #[clap(long)]
    pub context: Option<String>,
}

/// Read TOML or JSON from a file, based on its extension.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_has_no_hints() {
        let prompt = OcrPrompt::default_prompt()
            .render(&PromptHints::default())
            .unwrap();
        assert!(prompt.starts_with("Extract all text from this image"));
        assert!(prompt.contains("mark it with [?]"));
        assert!(prompt.ends_with("Return ONLY the extracted text, nothing else."));
        assert!(!prompt.contains("Typeface/Font:"));
        assert!(!prompt.contains("Context:"));
    }

    #[test]
    fn hints_are_appended_verbatim() {
        let hints = PromptHints {
            typeface: Some("Nirnaya Sagar <bold> & italic".to_owned()),
            context: Some("Bhaskararaya's commentary".to_owned()),
        };
        let prompt = OcrPrompt::default_prompt().render(&hints).unwrap();
        assert!(prompt.contains("Typeface/Font: Nirnaya Sagar <bold> & italic"));
        assert!(prompt.contains("Context: Bhaskararaya's commentary"));
        let typeface_at = prompt.find("Typeface/Font:").unwrap();
        let return_at = prompt.find("Return ONLY").unwrap();
        assert!(typeface_at < return_at);
    }

    #[tokio::test]
    async fn loads_custom_prompts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let toml_path = dir.path().join("prompt.toml");
        fs::write(&toml_path, "template = \"Read {{context}}\"\n").await?;
        let json_path = dir.path().join("prompt.json");
        fs::write(&json_path, r#"{"template": "Transcribe {{typeface}}"}"#).await?;

        let hints = PromptHints {
            typeface: Some("Grantha".to_owned()),
            context: Some("page".to_owned()),
        };
        let from_toml = OcrPrompt::load(Some(&toml_path)).await?;
        assert_eq!(from_toml.render(&hints)?, "Read page");
        let from_json = OcrPrompt::load(Some(&json_path)).await?;
        assert_eq!(from_json.render(&hints)?, "Transcribe Grantha");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_prompt_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("prompt.toml");
        fs::write(&path, "template = \"x\"\nmodel = \"y\"\n").await?;
        assert!(OcrPrompt::load(Some(&path)).await.is_err());
        Ok(())
    }
}
