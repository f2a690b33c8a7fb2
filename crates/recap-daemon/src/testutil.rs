use async_trait::async_trait;
use recap_core::provider::ModelProvider;
use recap_core::{CoreError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory provider double that counts calls and can be told to fail on
/// specific file names.
pub struct MockProvider {
    vision_calls: AtomicUsize,
    text_calls: AtomicUsize,
    fail_files: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            vision_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
            fail_files: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, file_name: &str) {
        self.fail_files.lock().unwrap().push(file_name.to_string());
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    /// Prompts received by `generate_text`, in call order.
    pub fn text_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn api_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("summary of the day".to_string())
    }

    async fn describe_screenshot(&self, file_name: &str, _prompt: &str) -> Result<String> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_files.lock().unwrap().iter().any(|f| f == file_name) {
            return Err(CoreError::Provider(format!("mock failure for {file_name}")));
        }
        Ok(format!("description of {file_name}"))
    }

    async fn describe_bulk_screenshots(
        &self,
        file_names: &[String],
        prompt: &str,
    ) -> Result<String> {
        let mut out = Vec::with_capacity(file_names.len());
        for file_name in file_names {
            out.push(self.describe_screenshot(file_name, prompt).await?);
        }
        Ok(out.join("\n"))
    }
}
