//! Translation stage. The service accepts one bounded text chunk per
//! call; the chunker keeps requests under its limit and failed or
//! empty chunks are skipped rather than aborting the job, since a
//! degraded translation beats losing the whole run.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk;
use crate::config::TranslateConfig;
use crate::error::{DubError, Result};

#[derive(Debug, Clone, Serialize)]
struct TranslationRequest {
    q: String,
    source: String,
    target: String,
    format: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TranslationResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

/// Main trait for the translation stage.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String>;
}

/// Factory for creating translator instances.
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_default(config: TranslateConfig) -> Box<dyn Translator> {
        Box::new(HttpTranslator::new(config))
    }
}

/// Production translator calling a LibreTranslate-style HTTP API.
pub struct HttpTranslator {
    client: Client,
    config: TranslateConfig,
}

impl HttpTranslator {
    pub fn new(config: TranslateConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("HTTP client creation should not fail");

        Self { client, config }
    }

    /// Translate one chunk. `Ok(None)` means the service returned
    /// nothing usable; the caller skips the chunk.
    async fn translate_chunk(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<String>> {
        let request = TranslationRequest {
            q: text.to_string(),
            source: source_lang.to_string(),
            target: target_lang.to_string(),
            format: "text".to_string(),
        };

        let url = format!("{}/translate", self.config.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DubError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DubError::Translation(format!(
                "translation API error {}: {}",
                status, text
            )));
        }

        let parsed: TranslationResponse = response
            .json()
            .await
            .map_err(|e| DubError::Translation(format!("failed to parse response: {}", e)))?;

        Ok(parsed
            .translated_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        if text.trim().is_empty() {
            warn!("Translation requested for empty text");
            return Ok(String::new());
        }

        let chunks = chunk::chunk_text(text, self.config.max_chunk_chars);
        if chunks.is_empty() {
            return Ok(String::new());
        }

        info!(
            "Translating {} chunks from '{}' to '{}'...",
            chunks.len(),
            source_lang,
            target_lang
        );

        let mut translated_chunks: Vec<String> = Vec::with_capacity(chunks.len());
        for (index, chunk_text) in chunks.iter().enumerate() {
            debug!(
                "Translating chunk {}/{} ({} chars)",
                index + 1,
                chunks.len(),
                chunk_text.chars().count()
            );

            match self.translate_chunk(chunk_text, source_lang, target_lang).await {
                Ok(Some(translated)) => translated_chunks.push(translated),
                Ok(None) => {
                    warn!(
                        "Translation for chunk {} returned nothing, skipping",
                        index + 1
                    );
                }
                Err(e) => {
                    warn!("Error translating chunk {}: {}, skipping", index + 1, e);
                }
            }
        }

        if translated_chunks.is_empty() {
            return Err(DubError::Translation(
                "translation produced no content for any chunk".to_string(),
            ));
        }

        let joined = translated_chunks.join(" ").trim().to_string();
        info!("Translation completed");
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        // Must not touch the network for empty input.
        let translator = HttpTranslator::new(Config::default().translate);
        let result = translator.translate("   ", "en", "de").await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_chunk_limit_matches_service_ceiling() {
        let config = Config::default().translate;
        let text = "Sentence one. ".repeat(1000);
        let chunks = chunk::chunk_text(&text, config.max_chunk_chars);
        assert!(chunks.len() > 1);
        assert!(
            chunks
                .iter()
                .all(|c| c.chars().count() <= config.max_chunk_chars)
        );
    }
}
