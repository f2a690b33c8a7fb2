use super::client::IdleClient;
use super::{read_image_base64, ModelProvider, ProviderSettings};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Local Ollama backend, using the non-streaming `/api/generate` endpoint.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    screenshots_dir: PathBuf,
    http: IdleClient,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings, model: &str) -> Self {
        Self {
            base_url: settings.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            screenshots_dir: settings.screenshots_dir.clone(),
            http: IdleClient::new(settings.idle_window),
        }
    }

    async fn generate(&self, prompt: &str, images: Option<Vec<String>>) -> Result<String> {
        let client = self.http.connect()?;
        let result = self.send_request(&client, prompt, images).await;
        self.http.touch();
        result
    }

    async fn send_request(
        &self,
        client: &reqwest::Client,
        prompt: &str,
        images: Option<Vec<String>>,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "images": images,
        });

        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Provider(format!(
                "ollama returned {status}: {body_text}"
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("failed to parse ollama response: {e}")))?;

        Ok(resp_json["response"].as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn api_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(prompt, None).await
    }

    async fn describe_screenshot(&self, file_name: &str, prompt: &str) -> Result<String> {
        let image = read_image_base64(&self.screenshots_dir, file_name)?;
        self.generate(prompt, Some(vec![image])).await
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
