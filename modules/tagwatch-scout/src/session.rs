//! Saved browser session for the scraped site.
//!
//! Bootstrapping the session (logging in) happens outside this crate; here the
//! saved storage-state file is loaded, checked, and handed to every scrape job
//! as an explicit [`SessionHandle`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file {path} is unreadable")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {path} is malformed")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session file {path} is invalid: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Browser storage-state file: `{"cookies": [...], "origins": [...]}`.
#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default = "session_cookie")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn root_path() -> String {
    "/".to_string()
}

fn session_cookie() -> f64 {
    -1.0
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires > 0.0 && self.expires < now.timestamp() as f64
    }
}

#[derive(Debug)]
struct SessionState {
    site_url: String,
    cookies: Vec<StoredCookie>,
}

/// Shared, read-only session passed to every scrape job.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<SessionState>);

impl SessionHandle {
    /// Load a storage-state file, dropping cookies that expired before `now`.
    pub fn load(path: &Path, site_url: &str, now: DateTime<Utc>) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SessionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let state: StorageState =
            serde_json::from_str(&raw).map_err(|source| SessionError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let total = state.cookies.len();
        let cookies: Vec<_> = state
            .cookies
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .collect();

        if cookies.is_empty() {
            let reason = if total == 0 {
                "no cookies saved".to_string()
            } else {
                format!("all {total} cookies expired")
            };
            return Err(SessionError::Invalid {
                path: path.to_path_buf(),
                reason,
            });
        }

        tracing::info!(
            path = %path.display(),
            cookies = cookies.len(),
            expired = total - cookies.len(),
            "Session loaded"
        );
        Ok(Self::from_cookies(site_url, cookies))
    }

    pub fn from_cookies(site_url: &str, cookies: Vec<StoredCookie>) -> Self {
        Self(Arc::new(SessionState {
            site_url: site_url.trim_end_matches('/').to_string(),
            cookies,
        }))
    }

    pub fn site_url(&self) -> &str {
        &self.0.site_url
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.0.cookies
    }
}

/// True when the site bounced the page to its login or signup flow.
pub fn is_login_url(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.starts_with("/login") || path.starts_with("/i/flow/login") || path.starts_with("/i/flow/signup")
}
