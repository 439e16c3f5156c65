// Trait seams for the pipeline's external collaborators.
//
// BrowserLauncher / PageSession: one rendered page per scrape job.
// TextGenerator: the classification model, prompt in, free text out.
// TableStore: versioned, calendar-partitioned tables.
//
// Production adapters live in `browser`, `store` and the impl below; the
// in-memory doubles in `testing` let the whole pipeline run without a browser,
// an API key or a lakeFS server.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use ai_client::{Gemini, PromptBuilder};
use tagwatch_common::Partition;

use crate::session::SessionHandle;
use crate::store::TableRef;

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("timed out waiting for {selector}")]
    Timeout { selector: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single page bound to an authenticated session.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// URL after redirects; a login URL here means the session is stale.
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Resolve once `selector` matches, or fail with [`DriverError::Timeout`].
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn scroll_to_bottom(&self) -> Result<(), DriverError>;

    /// Growth signal: total document height.
    async fn scroll_extent(&self) -> Result<u64, DriverError>;

    /// Text content of every element matching `selector`, in document order.
    async fn query_texts(&self, selector: &str) -> Result<Vec<String>, DriverError>;

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    /// Release the underlying browser resources.
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, session: &SessionHandle) -> Result<Box<dyn PageSession>, DriverError>;
}

// ---------------------------------------------------------------------------
// TextGenerator
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, temperature: f32) -> Result<String>;
}

#[async_trait]
impl TextGenerator for Gemini {
    async fn generate(&self, system: &str, prompt: &str, temperature: f32) -> Result<String> {
        self.prompt(prompt)
            .preamble(system)
            .temperature(temperature)
            .send()
            .await
    }
}

// ---------------------------------------------------------------------------
// TableStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create the backing repository if it does not exist yet.
    async fn ensure_table(&self, table: &TableRef) -> Result<()>;

    /// Stage one partition's rows.
    async fn write_partition(&self, table: &TableRef, partition: Partition, rows: Vec<Value>)
        -> Result<()>;

    /// Make staged partitions durable.
    async fn commit(&self, table: &TableRef, message: &str) -> Result<()>;

    /// Read back the rows this store's run committed, keeping only `columns`.
    /// Rows from earlier runs are not included.
    async fn read_back(&self, table: &TableRef, columns: &[&str]) -> Result<Vec<Map<String, Value>>>;
}
