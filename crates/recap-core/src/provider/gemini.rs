use super::client::IdleClient;
use super::{image_mime_type, read_image_base64, ModelProvider, ProviderSettings};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini backend via the `generateContent` REST endpoint. Images are
/// sent as inline base64 parts rather than the upload API.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    screenshots_dir: PathBuf,
    http: IdleClient,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings, model: &str) -> Self {
        Self {
            api_key: settings.gemini_api_key.clone(),
            model: model.to_string(),
            screenshots_dir: settings.screenshots_dir.clone(),
            http: IdleClient::new(settings.idle_window),
        }
    }

    async fn generate(&self, parts: Vec<serde_json::Value>) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(CoreError::Provider(
                "gemini api key is not configured".to_string(),
            ));
        }

        let client = self.http.connect()?;
        let result = self.send_request(&client, parts).await;
        self.http.touch();
        result
    }

    async fn send_request(
        &self,
        client: &reqwest::Client,
        parts: Vec<serde_json::Value>,
    ) -> Result<String> {
        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
        });

        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Provider(format!(
                "gemini returned {status}: {body_text}"
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("failed to parse gemini response: {e}")))?;

        Ok(join_candidate_parts(&resp_json))
    }
}

/// Join all candidate text parts into a single string.
fn join_candidate_parts(resp: &serde_json::Value) -> String {
    let mut out = String::new();
    if let Some(candidates) = resp["candidates"].as_array() {
        for candidate in candidates {
            if let Some(parts) = candidate["content"]["parts"].as_array() {
                for part in parts {
                    if let Some(text) = part["text"].as_str() {
                        out.push_str(text);
                    }
                }
            }
        }
    }
    out
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn api_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(vec![serde_json::json!({ "text": prompt })])
            .await
    }

    async fn describe_screenshot(&self, file_name: &str, prompt: &str) -> Result<String> {
        let image = read_image_base64(&self.screenshots_dir, file_name)?;
        self.generate(vec![
            serde_json::json!({
                "inline_data": {
                    "mime_type": image_mime_type(file_name),
                    "data": image,
                }
            }),
            serde_json::json!({ "text": prompt }),
        ])
        .await
    }

    async fn describe_bulk_screenshots(
        &self,
        file_names: &[String],
        prompt: &str,
    ) -> Result<String> {
        let mut descriptions = Vec::with_capacity(file_names.len());
        for file_name in file_names {
            descriptions.push(self.describe_screenshot(file_name, prompt).await?);
        }
        Ok(descriptions.join("\n"))
    }
}
