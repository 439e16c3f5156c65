use std::env;

use crate::error::TagwatchError;

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
const DEFAULT_LAKEFS_ENDPOINT: &str = "http://localhost:8000";

/// Secrets and endpoints loaded from the environment (and `.env` if present).
/// Behaviour lives in the TOML [`FileConfig`](crate::FileConfig).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Browser
    pub webdriver_url: String,

    // AI
    pub gemini_api_key: Option<String>,

    // Versioned storage
    pub lakefs_endpoint: String,
    pub lakefs_access_key: Option<String>,
    pub lakefs_secret_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            lakefs_endpoint: env::var("LAKEFS_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_LAKEFS_ENDPOINT.to_string()),
            lakefs_access_key: optional_env("LAKEFS_ACCESS_KEY"),
            lakefs_secret_key: optional_env("LAKEFS_SECRET_KEY"),
        }
    }

    pub fn gemini_api_key(&self) -> Result<&str, TagwatchError> {
        required(&self.gemini_api_key, "GEMINI_API_KEY")
    }

    /// Access key and secret for lakeFS basic auth.
    pub fn lakefs_credentials(&self) -> Result<(&str, &str), TagwatchError> {
        Ok((
            required(&self.lakefs_access_key, "LAKEFS_ACCESS_KEY")?,
            required(&self.lakefs_secret_key, "LAKEFS_SECRET_KEY")?,
        ))
    }

    pub fn log_redacted(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.chars().take(4).map(char::len_utf8).sum::<usize>();
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  WEBDRIVER_URL: {}", self.webdriver_url);
        tracing::info!("  GEMINI_API_KEY: {}", preview_opt(&self.gemini_api_key));
        tracing::info!("  LAKEFS_ENDPOINT: {}", self.lakefs_endpoint);
        tracing::info!("  LAKEFS_ACCESS_KEY: {}", preview_opt(&self.lakefs_access_key));
        tracing::info!("  LAKEFS_SECRET_KEY: {}", preview_opt(&self.lakefs_secret_key));
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, TagwatchError> {
    value
        .as_deref()
        .ok_or_else(|| TagwatchError::Config(format!("{key} environment variable is required")))
}
