use super::client::IdleClient;
use super::{image_mime_type, read_image_base64, ModelProvider, ProviderSettings};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenAI-compatible chat-completions backend. OpenRouter speaks the same
/// protocol, so it is constructed as a parameterized instance of this
/// client with a different endpoint and credential.
pub struct OpenAiProvider {
    api_name: &'static str,
    endpoint: String,
    api_key: String,
    model: String,
    screenshots_dir: PathBuf,
    http: IdleClient,
}

impl OpenAiProvider {
    pub fn openai(settings: &ProviderSettings, model: &str) -> Self {
        Self::with_endpoint(
            "openai",
            OPENAI_ENDPOINT,
            &settings.openai_api_key,
            settings,
            model,
        )
    }

    pub fn openrouter(settings: &ProviderSettings, model: &str) -> Self {
        Self::with_endpoint(
            "openrouter",
            OPENROUTER_ENDPOINT,
            &settings.openrouter_api_key,
            settings,
            model,
        )
    }

    fn with_endpoint(
        api_name: &'static str,
        endpoint: &str,
        api_key: &str,
        settings: &ProviderSettings,
        model: &str,
    ) -> Self {
        Self {
            api_name,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            screenshots_dir: settings.screenshots_dir.clone(),
            http: IdleClient::new(settings.idle_window),
        }
    }

    async fn chat(&self, content: serde_json::Value) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(CoreError::Provider(format!(
                "{} api key is not configured",
                self.api_name
            )));
        }

        let client = self.http.connect()?;
        let result = self.send_request(&client, content).await;
        self.http.touch();
        result
    }

    async fn send_request(
        &self,
        client: &reqwest::Client,
        content: serde_json::Value,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CoreError::Provider(format!("{} request failed: {e}", self.api_name))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Provider(format!(
                "{} returned {status}: {body_text}",
                self.api_name
            )));
        }

        let resp_json: serde_json::Value = response.json().await.map_err(|e| {
            CoreError::Provider(format!("failed to parse {} response: {e}", self.api_name))
        })?;

        Ok(resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn api_name(&self) -> &str {
        self.api_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.chat(serde_json::json!(prompt)).await
    }

    async fn describe_screenshot(&self, file_name: &str, prompt: &str) -> Result<String> {
        let image = read_image_base64(&self.screenshots_dir, file_name)?;
        let data_uri = format!("data:{};base64,{image}", image_mime_type(file_name));
        self.chat(serde_json::json!([
            { "type": "text", "text": prompt },
            { "type": "image_url", "image_url": { "url": data_uri } },
        ]))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            screenshots_dir: PathBuf::from("/tmp"),
            ollama_url: "http://localhost:11434".to_string(),
            gemini_api_key: String::new(),
            openai_api_key: "sk-test".to_string(),
            openrouter_api_key: String::new(),
            idle_window: Duration::from_secs(300),
        }
    }

    #[test]
    fn openrouter_differs_only_in_endpoint_and_key() {
        let s = settings();
        let openai = OpenAiProvider::openai(&s, "gpt-4o-mini");
        let openrouter = OpenAiProvider::openrouter(&s, "gpt-4o-mini");

        assert_eq!(openai.api_name(), "openai");
        assert_eq!(openrouter.api_name(), "openrouter");
        assert_ne!(openai.endpoint, openrouter.endpoint);
        assert_eq!(openai.model_name(), openrouter.model_name());
    }

    #[tokio::test]
    async fn missing_key_is_a_fatal_operation_error() {
        let provider = OpenAiProvider::openrouter(&settings(), "m");
        let err = provider.generate_text("hi").await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(_)));
    }
}
