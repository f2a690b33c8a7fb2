pub mod client;
pub mod gemini;
pub mod ollama;
pub mod openai;

use crate::config::AppConfig;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A named text/vision generation backend.
///
/// Exactly one active vision provider and one active text provider exist at
/// a time; they may be the same instance when configured identically.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Registry name of the backing connector, e.g. `gemini`.
    fn api_name(&self) -> &str;

    /// Model identifier this instance was created with.
    fn model_name(&self) -> &str;

    /// Generate text from a plain prompt.
    async fn generate_text(&self, prompt: &str) -> Result<String>;

    /// Describe one screenshot. `file_name` is relative to the configured
    /// screenshots directory.
    async fn describe_screenshot(&self, file_name: &str, prompt: &str) -> Result<String>;

    /// Describe several screenshots, joining the answers with newlines.
    async fn describe_bulk_screenshots(&self, file_names: &[String], prompt: &str)
        -> Result<String>;
}

/// Everything a provider factory needs beyond the model name.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub screenshots_dir: PathBuf,
    pub ollama_url: String,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub idle_window: Duration,
}

impl ProviderSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            screenshots_dir: config.screenshots_dir()?,
            ollama_url: config.providers.ollama_url.clone(),
            gemini_api_key: config.providers.gemini_api_key.clone(),
            openai_api_key: config.providers.openai_api_key.clone(),
            openrouter_api_key: config.providers.openrouter_api_key.clone(),
            idle_window: Duration::from_secs(config.providers.idle_timeout_seconds),
        })
    }
}

pub type ProviderFactory = Box<dyn Fn(&str) -> Arc<dyn ModelProvider> + Send + Sync>;

/// Registry of provider factories, keyed by connector name.
///
/// Registration happens once at startup; duplicate registration is a
/// programming error and panics immediately. Resolution is read-locked so
/// concurrent lookups during pipeline operation never contend with each
/// other.
pub struct ProviderRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    factories: HashMap<String, ProviderFactory>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                factories: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// A registry with the built-in connectors registered: `gemini`,
    /// `ollama`, `openai`, `openrouter`. OpenRouter is a parameterized
    /// instance of the OpenAI-compatible client, not a separate
    /// implementation.
    pub fn with_builtins(settings: &ProviderSettings) -> Self {
        let registry = Self::new();

        let s = settings.clone();
        registry.register("gemini", move |model| {
            Arc::new(gemini::GeminiProvider::new(&s, model))
        });

        let s = settings.clone();
        registry.register("ollama", move |model| {
            Arc::new(ollama::OllamaProvider::new(&s, model))
        });

        let s = settings.clone();
        registry.register("openai", move |model| {
            Arc::new(openai::OpenAiProvider::openai(&s, model))
        });

        let s = settings.clone();
        registry.register("openrouter", move |model| {
            Arc::new(openai::OpenAiProvider::openrouter(&s, model))
        });

        registry
    }

    /// Associate a connector name with a factory.
    ///
    /// Panics on duplicate names: registrations are wired once at process
    /// start and a collision is a bug that must surface immediately.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&str) -> Arc<dyn ModelProvider> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.factories.contains_key(name) {
            panic!("attempted to register duplicate provider: {name}");
        }
        inner.factories.insert(name.to_string(), Box::new(factory));
        inner.order.push(name.to_string());
    }

    /// Instantiate the named connector for a model.
    pub fn resolve(&self, name: &str, model: &str) -> Result<Arc<dyn ModelProvider>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let factory = inner
            .factories
            .get(name)
            .ok_or_else(|| CoreError::Provider(format!("provider not found: {name}")))?;
        Ok(factory(model))
    }

    /// Registered connector names in registration order.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.order.clone()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The vision and text providers selected by configuration.
pub struct ActiveProviders {
    pub vision: Arc<dyn ModelProvider>,
    pub text: Arc<dyn ModelProvider>,
}

impl ActiveProviders {
    /// Resolve both active providers. When vision and text are configured
    /// with the same connector and model, one instance serves both roles so
    /// only a single underlying connection exists.
    pub fn from_config(registry: &ProviderRegistry, config: &AppConfig) -> Result<Self> {
        let vision = registry.resolve(&config.description.connector, &config.description.model)?;

        let text = if config.description.connector == config.report.connector
            && config.description.model == config.report.model
        {
            vision.clone()
        } else {
            registry.resolve(&config.report.connector, &config.report.model)?
        };

        Ok(Self { vision, text })
    }
}

/// Read a screenshot from the screenshots directory as base64.
pub(crate) fn read_image_base64(dir: &Path, file_name: &str) -> Result<String> {
    let path = dir.join(file_name);
    let bytes = std::fs::read(&path)
        .map_err(|e| CoreError::Provider(format!("failed to read {}: {e}", path.display())))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Best-effort mime type from the file extension. Screenshots are written
/// as PNG by default.
pub(crate) fn image_mime_type(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}
