//! WebDriver-backed browser: one headless Chrome session per page.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use webdriver_client::{Cookie, WebDriverClient, WebDriverError, WebDriverSession};

use crate::session::{SessionHandle, StoredCookie};
use crate::traits::{BrowserLauncher, DriverError, PageSession};

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";
const EXTENT_SCRIPT: &str = "return document.body.scrollHeight;";
const TEXTS_SCRIPT: &str =
    "return Array.from(document.querySelectorAll(arguments[0])).map(e => e.textContent || '');";

impl From<WebDriverError> for DriverError {
    fn from(err: WebDriverError) -> Self {
        match err {
            WebDriverError::Timeout { selector, .. } => DriverError::Timeout { selector },
            other => DriverError::Other(other.into()),
        }
    }
}

pub struct WebDriverBrowser {
    client: WebDriverClient,
    capabilities: Value,
}

impl WebDriverBrowser {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            client: WebDriverClient::new(webdriver_url),
            capabilities: json!({
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": ["--headless=new", "--disable-gpu", "--window-size=1280,1024"]
                }
            }),
        }
    }

    /// Land on the site origin and install the saved cookies there.
    async fn authenticate(
        &self,
        session: &WebDriverSession,
        handle: &SessionHandle,
    ) -> Result<(), DriverError> {
        session.navigate(handle.site_url()).await?;
        for cookie in handle.cookies() {
            session
                .add_cookie(&to_webdriver_cookie(cookie))
                .await
                .with_context(|| format!("Failed to install cookie {}", cookie.name))?;
        }
        debug!(session_id = session.id(), cookies = handle.cookies().len(), "Session cookies installed");
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverBrowser {
    async fn open(&self, handle: &SessionHandle) -> Result<Box<dyn PageSession>, DriverError> {
        let session = self.client.new_session(self.capabilities.clone()).await?;

        if let Err(e) = self.authenticate(&session, handle).await {
            if let Err(close_err) = session.delete().await {
                warn!(error = %close_err, "Failed to release browser after setup error");
            }
            return Err(e);
        }
        Ok(Box::new(WebDriverPage { session }))
    }
}

fn to_webdriver_cookie(cookie: &StoredCookie) -> Cookie {
    Cookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: Some(cookie.domain.clone()),
        path: Some(cookie.path.clone()),
        secure: cookie.secure,
        http_only: cookie.http_only,
        expiry: (cookie.expires > 0.0).then_some(cookie.expires as u64),
    }
}

pub struct WebDriverPage {
    session: WebDriverSession,
}

#[async_trait]
impl PageSession for WebDriverPage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        Ok(self.session.navigate(url).await?)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.session.current_url().await?)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        Ok(self.session.wait_for_selector(selector, timeout).await?)
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.session.execute(SCROLL_SCRIPT, vec![]).await?;
        Ok(())
    }

    async fn scroll_extent(&self) -> Result<u64, DriverError> {
        let value = self.session.execute(EXTENT_SCRIPT, vec![]).await?;
        value
            .as_f64()
            .map(|h| h as u64)
            .with_context(|| format!("scrollHeight was not a number: {value}"))
            .map_err(DriverError::Other)
    }

    async fn query_texts(&self, selector: &str) -> Result<Vec<String>, DriverError> {
        let value = self.session.execute(TEXTS_SCRIPT, vec![json!(selector)]).await?;
        serde_json::from_value(value)
            .context("Element texts were not a string list")
            .map_err(DriverError::Other)
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let png = self.session.screenshot().await?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tokio::fs::write(path, png)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(self.session.delete().await?)
    }
}
