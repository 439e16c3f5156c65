pub mod error;
pub mod types;

pub use error::{Result, WebDriverError};
pub use types::{Cookie, ElementRef};

use std::time::{Duration, Instant};

use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use types::{ErrorValue, NewSession, ValueResponse};

/// Interval between element lookups while waiting for a selector.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct WebDriverClient {
    client: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a new browser session with the given `alwaysMatch` capabilities.
    pub async fn new_session(&self, capabilities: Value) -> Result<WebDriverSession> {
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let resp = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?;

        let session: NewSession = read_value(resp).await?;
        debug!(session_id = %session.session_id, "WebDriver session started");

        Ok(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session.session_id),
            id: session.session_id,
        })
    }
}

/// One live browser session. Release it with [`WebDriverSession::delete`].
pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    id: String,
}

impl WebDriverSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let _: Value = self.post("url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        self.get("url").await
    }

    /// Run a synchronous script; `arguments[i]` in the script maps to `args[i]`.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    pub async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>> {
        self.post("elements", json!({ "using": "css selector", "value": css }))
            .await
    }

    /// Poll until at least one element matches `css`, or fail with `Timeout`.
    pub async fn wait_for_selector(&self, css: &str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if !self.find_elements(css).await?.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(WebDriverError::Timeout {
                    selector: css.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn add_cookie(&self, cookie: &Cookie) -> Result<()> {
        let _: Value = self.post("cookie", json!({ "cookie": cookie })).await?;
        Ok(())
    }

    /// PNG screenshot of the current viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let encoded: String = self.get("screenshot").await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| WebDriverError::Parse(e.to_string()))
    }

    /// End the session and release the browser.
    pub async fn delete(&self) -> Result<()> {
        let resp = self.client.delete(&self.session_url).send().await?;
        let _: Value = read_value(resp).await?;
        debug!(session_id = %self.id, "WebDriver session deleted");
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, command: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}/{}", self.session_url, command))
            .send()
            .await?;
        read_value(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, command: &str, body: Value) -> Result<T> {
        let resp = self
            .client
            .post(format!("{}/{}", self.session_url, command))
            .json(&body)
            .send()
            .await?;
        read_value(resp).await
    }
}

async fn read_value<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }

    let parsed: ValueResponse<T> = serde_json::from_str(&body)?;
    Ok(parsed.value)
}

fn api_error(status: u16, body: &str) -> WebDriverError {
    match serde_json::from_str::<ValueResponse<ErrorValue>>(body) {
        Ok(err) if err.value.error == "invalid session id" => {
            WebDriverError::InvalidSession(err.value.message)
        }
        Ok(err) => WebDriverError::Api {
            status,
            error: err.value.error,
            message: err.value.message,
        },
        Err(_) => WebDriverError::Api {
            status,
            error: "unknown error".to_string(),
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_session_error_is_distinguished() {
        let body = r#"{"value": {"error": "invalid session id", "message": "session deleted"}}"#;
        assert!(matches!(
            api_error(404, body),
            WebDriverError::InvalidSession(msg) if msg == "session deleted"
        ));
    }

    #[test]
    fn other_errors_keep_status_and_code() {
        let body = r#"{"value": {"error": "no such window", "message": "gone"}}"#;
        match api_error(404, body) {
            WebDriverError::Api {
                status,
                error,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(error, "no such window");
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unparseable_error_body_is_kept_verbatim() {
        match api_error(502, "Bad Gateway") {
            WebDriverError::Api { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
