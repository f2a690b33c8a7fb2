use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub description: DescriptionConfig,
    pub report: ReportConfig,
    pub queue: QueueConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: String,
}

/// Screenshot-capture timer and the external capture command. `command` is
/// run with `{output}` replaced by the target file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub command: String,
}

/// Description-generation timer and the per-image vision prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub connector: String,
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub connector: String,
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub batch_delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub ollama_url: String,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub idle_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/.recap".to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 10,
            command: "grim {output}".to_string(),
        }
    }
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 120,
            connector: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            prompt: "This image was captured on a user's computer. Describe what the \
                     user was working on. Do not expose passwords, other people's \
                     names, emails, and other private and secure information."
                .to_string(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            connector: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            prompt: "You are an AI assistant tasked with generating a daily activity \
                     report for a user based on a series of visual descriptions \
                     captured from their computer screen throughout the day. Your job \
                     is to summarize this data into brief items describing what the \
                     user worked on today."
                .to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            batch_delay_seconds: 60,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            openrouter_api_key: String::new(),
            idle_timeout_seconds: 300,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.recap/config.toml`, creating defaults if missing.
    pub fn load() -> Result<Self> {
        let base_dir = Self::default_base_dir()?;
        let config_path = base_dir.join("config.toml");

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = AppConfig::default();
            config.ensure_dirs()?;
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific path (for testing or custom setups).
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read config: {e}")))?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Write the current configuration out as pretty TOML.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))?;
        fs::write(path, toml_str)?;
        Ok(())
    }

    /// Default path of the config file.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_base_dir()?.join("config.toml"))
    }

    /// Apply a named setting to the live configuration view. Keys are
    /// dotted TOML paths, e.g. `capture.interval_minutes`. Each key maps to
    /// a typed setter resolved at compile time; unknown keys and unparsable
    /// values are config errors.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid value for {key}: {value}")))
        }

        match key {
            "storage.base_dir" => self.storage.base_dir = value.to_string(),
            "capture.enabled" => self.capture.enabled = parse(key, value)?,
            "capture.interval_minutes" => self.capture.interval_minutes = parse(key, value)?,
            "capture.command" => self.capture.command = value.to_string(),
            "description.enabled" => self.description.enabled = parse(key, value)?,
            "description.interval_minutes" => {
                self.description.interval_minutes = parse(key, value)?
            }
            "description.connector" => self.description.connector = value.to_string(),
            "description.model" => self.description.model = value.to_string(),
            "description.prompt" => self.description.prompt = value.to_string(),
            "report.connector" => self.report.connector = value.to_string(),
            "report.model" => self.report.model = value.to_string(),
            "report.prompt" => self.report.prompt = value.to_string(),
            "queue.batch_size" => self.queue.batch_size = parse(key, value)?,
            "queue.batch_delay_seconds" => self.queue.batch_delay_seconds = parse(key, value)?,
            "providers.ollama_url" => self.providers.ollama_url = value.to_string(),
            "providers.gemini_api_key" => self.providers.gemini_api_key = value.to_string(),
            "providers.openai_api_key" => self.providers.openai_api_key = value.to_string(),
            "providers.openrouter_api_key" => {
                self.providers.openrouter_api_key = value.to_string()
            }
            "providers.idle_timeout_seconds" => {
                self.providers.idle_timeout_seconds = parse(key, value)?
            }
            _ => return Err(CoreError::Config(format!("unknown setting: {key}"))),
        }
        Ok(())
    }

    /// All setting keys accepted by [`apply_setting`], for UI enumeration.
    pub fn setting_keys() -> &'static [&'static str] {
        &[
            "storage.base_dir",
            "capture.enabled",
            "capture.interval_minutes",
            "capture.command",
            "description.enabled",
            "description.interval_minutes",
            "description.connector",
            "description.model",
            "description.prompt",
            "report.connector",
            "report.model",
            "report.prompt",
            "queue.batch_size",
            "queue.batch_delay_seconds",
            "providers.ollama_url",
            "providers.gemini_api_key",
            "providers.openai_api_key",
            "providers.openrouter_api_key",
            "providers.idle_timeout_seconds",
        ]
    }

    /// Returns the resolved base directory (expands `~`).
    pub fn base_dir(&self) -> Result<PathBuf> {
        resolve_tilde(&self.storage.base_dir)
    }

    /// Returns the default base directory (`~/.recap`).
    pub fn default_base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".recap"))
    }

    /// Returns the path to the SQLite database.
    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.base_dir()?.join("recap.db"))
    }

    /// Returns the path to the screenshots directory.
    pub fn screenshots_dir(&self) -> Result<PathBuf> {
        Ok(self.base_dir()?.join("screenshots"))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        let base = self.base_dir()?;
        fs::create_dir_all(&base)?;
        fs::create_dir_all(base.join("screenshots"))?;
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
fn resolve_tilde(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if path == "~" {
        dirs::home_dir()
            .ok_or_else(|| CoreError::Config("could not determine home directory".to_string()))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Initialize tracing/logging with env filter.
///
/// Respects `RUST_LOG` env var. Defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.capture.interval_minutes, 10);
        assert_eq!(config.description.interval_minutes, 120);
        assert!(config.capture.enabled);
        assert_eq!(config.queue.batch_size, 15);
        assert_eq!(config.queue.batch_delay_seconds, 60);
        assert_eq!(config.providers.idle_timeout_seconds, 300);
        assert_eq!(config.description.connector, "gemini");
    }

    #[test]
    fn test_load_from_toml() {
        let toml_content = r#"
[capture]
interval_minutes = 5
enabled = false

[description]
connector = "ollama"
model = "llava"

[queue]
batch_size = 3
"#;
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(toml_content.as_bytes()).unwrap();

        let config = AppConfig::load_from(f.path()).unwrap();
        assert_eq!(config.capture.interval_minutes, 5);
        assert!(!config.capture.enabled);
        assert_eq!(config.description.connector, "ollama");
        assert_eq!(config.description.model, "llava");
        assert_eq!(config.queue.batch_size, 3);
        // defaults for fields not specified
        assert_eq!(config.queue.batch_delay_seconds, 60);
        assert_eq!(config.report.connector, "gemini");
    }

    #[test]
    fn test_apply_setting_typed() {
        let mut config = AppConfig::default();
        config.apply_setting("capture.interval_minutes", "30").unwrap();
        assert_eq!(config.capture.interval_minutes, 30);

        config.apply_setting("description.enabled", "false").unwrap();
        assert!(!config.description.enabled);

        config.apply_setting("report.model", "gemini-2.0-flash").unwrap();
        assert_eq!(config.report.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_apply_setting_rejects_unknown_key() {
        let mut config = AppConfig::default();
        assert!(config.apply_setting("no.such.key", "1").is_err());
    }

    #[test]
    fn test_apply_setting_rejects_bad_value() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_setting("capture.interval_minutes", "often")
            .is_err());
    }

    #[test]
    fn test_every_setting_key_is_applicable() {
        let mut config = AppConfig::default();
        for key in AppConfig::setting_keys() {
            // numeric/bool keys get a parsable value, the rest a string
            let value = match *key {
                k if k.ends_with("enabled") => "true",
                k if k.ends_with("minutes")
                    || k.ends_with("size")
                    || k.ends_with("seconds") =>
                {
                    "7"
                }
                _ => "x",
            };
            config
                .apply_setting(key, value)
                .unwrap_or_else(|e| panic!("key {key} failed: {e}"));
        }
    }
}
