use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, storage credentials) stay as env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Categories in scrape order; each owns an ordered tag list.
    pub targets: Vec<TargetGroup>,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetGroup {
    pub category: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub max_rounds: u32,
    pub concurrency: usize,
    pub cooldown_secs: u64,
    pub settle_ms: u64,
    pub content_timeout_secs: u64,
    pub fallback_timeout_secs: u64,
    /// Saved browser storage state (cookies) for the scraped site.
    pub session_path: PathBuf,
    /// Where no-content screenshots are written.
    pub diagnostics_dir: PathBuf,
    /// Site origin; cookies are applied here before navigating to targets.
    pub site_url: String,
    pub selectors: SelectorConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            concurrency: 3,
            cooldown_secs: 30,
            settle_ms: 3_000,
            content_timeout_secs: 30,
            fallback_timeout_secs: 10,
            session_path: PathBuf::from("auth/x_session.json"),
            diagnostics_dir: PathBuf::from("tmp"),
            site_url: "https://x.com".to_string(),
            selectors: SelectorConfig::default(),
        }
    }
}

impl ScrapeConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub content: String,
    pub fallback_content: String,
    pub author: String,
    pub text: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            content: "[data-testid='tweet']".to_string(),
            fallback_content: "[data-testid='tweetText']".to_string(),
            author: "[data-testid='User-Name']".to_string(),
            text: "[data-testid='tweetText']".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    pub window_size: usize,
    pub model: String,
    pub temperature: f32,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub branch: String,
    /// Storage namespace root; the repository name is appended.
    pub namespace_root: String,
    pub raw: TableConfig,
    pub classified: TableConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            namespace_root: "local://".to_string(),
            raw: TableConfig {
                repository: "tweets-repo".to_string(),
                prefix: "tweets".to_string(),
            },
            classified: TableConfig {
                repository: "tweets-repo-wordcloud".to_string(),
                prefix: "wordcloud".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub repository: String,
    pub prefix: String,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}
