// Test doubles for the tagwatch pipeline.
//
// One double per trait boundary:
// - MockBrowser / MockPage (BrowserLauncher / PageSession): per-URL PageScript
// - EchoGenerator (TextGenerator): deterministic labels derived from the prompt
// - ScriptedGenerator (TextGenerator): canned responses in call order
// - MemoryTableStore (TableStore): in-memory partitions, earlier-run history
//   and commit counter
//
// Plus fixtures for sessions, rendered post frames and normalized posts.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use tagwatch_common::file_config::SelectorConfig;
use serde::Serialize;

use tagwatch_common::{NormalizedPost, Partition, Partitioned};

use crate::normalize::normalize_time;
use crate::session::{SessionHandle, StoredCookie};
use crate::store::TableRef;
use crate::traits::{BrowserLauncher, DriverError, PageSession, TableStore, TextGenerator};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Capture instant used by [`normalized_post`].
pub fn fixed_capture() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

pub fn test_session() -> SessionHandle {
    SessionHandle::from_cookies(
        "https://x.com",
        vec![StoredCookie {
            name: "auth_token".into(),
            value: "test".into(),
            domain: ".x.com".into(),
            path: "/".into(),
            expires: -1.0,
            http_only: true,
            secure: true,
        }],
    )
}

/// Rendered `(author, text)` pairs for posts `range`, e.g. `"a3 @a3 · 4h"`.
pub fn post_frame(prefix: &str, range: Range<usize>) -> Vec<(String, String)> {
    range
        .map(|i| {
            (
                format!("{prefix}{i} @{prefix}{i} · {}h", i + 1),
                format!("{prefix} post {i} #{prefix}"),
            )
        })
        .collect()
}

/// A normalized post captured at [`fixed_capture`], tag taken as given.
pub fn normalized_post(tag: &str, author: &str, text: &str, token: &str) -> NormalizedPost {
    let captured_at = fixed_capture();
    let post_time_raw = normalize_time(token, captured_at);
    let partition = post_time_raw.map(Partition::of);
    NormalizedPost {
        author: author.to_string(),
        text: text.to_string(),
        captured_at,
        category: "test".to_string(),
        tag: tag.to_string(),
        time_token: token.to_string(),
        post_time_raw,
        year: partition.map(|p| p.year),
        month: partition.map(|p| p.month),
        day: partition.map(|p| p.day),
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentMode {
    Primary,
    FallbackOnly,
    Missing,
}

/// What one target URL looks like when a mock page navigates to it.
/// Builder pattern: `.extents()`, `.frame()`, `.fallback_only()`, `.no_content()`,
/// `.lands_on()`, `.fail_on_round()`, `.navigation_fails()`, `.content_wait_fails()`.
#[derive(Debug, Clone)]
pub struct PageScript {
    landing_url: Option<String>,
    content: ContentMode,
    extents: Vec<u64>,
    frames: Vec<Vec<(String, String)>>,
    fail_on_round: Option<u32>,
    navigation_error: Option<String>,
    content_error: Option<String>,
}

impl Default for PageScript {
    fn default() -> Self {
        Self::new()
    }
}

impl PageScript {
    pub fn new() -> Self {
        Self {
            landing_url: None,
            content: ContentMode::Primary,
            extents: vec![1000],
            frames: Vec::new(),
            fail_on_round: None,
            navigation_error: None,
            content_error: None,
        }
    }

    /// Scroll heights in read order; the first is read before round 1 and
    /// the last repeats once exhausted.
    pub fn extents(mut self, extents: impl IntoIterator<Item = u64>) -> Self {
        self.extents = extents.into_iter().collect();
        self
    }

    /// Visible posts after the next round; the last frame repeats.
    pub fn frame(mut self, pairs: Vec<(String, String)>) -> Self {
        self.frames.push(pairs);
        self
    }

    pub fn fallback_only(mut self) -> Self {
        self.content = ContentMode::FallbackOnly;
        self
    }

    pub fn no_content(mut self) -> Self {
        self.content = ContentMode::Missing;
        self
    }

    /// Report `url` as the page location after navigation.
    pub fn lands_on(mut self, url: &str) -> Self {
        self.landing_url = Some(url.to_string());
        self
    }

    /// Make the scroll of round `round` (1-based) fail.
    pub fn fail_on_round(mut self, round: u32) -> Self {
        self.fail_on_round = Some(round);
        self
    }

    /// Make navigation to this URL fail with `message`.
    pub fn navigation_fails(mut self, message: &str) -> Self {
        self.navigation_error = Some(message.to_string());
        self
    }

    /// Make the content wait fail with `message` instead of timing out.
    pub fn content_wait_fails(mut self, message: &str) -> Self {
        self.content_error = Some(message.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct BrowserStats {
    opened: usize,
    closed: usize,
    in_flight: usize,
    max_in_flight: usize,
    screenshots: Vec<PathBuf>,
}

/// Scripted browser keyed by target URL. Navigating anywhere else fails.
pub struct MockBrowser {
    scripts: Arc<HashMap<String, PageScript>>,
    selectors: SelectorConfig,
    page_delay: Duration,
    stats: Arc<Mutex<BrowserStats>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(HashMap::new()),
            selectors: SelectorConfig::default(),
            page_delay: Duration::ZERO,
            stats: Arc::new(Mutex::new(BrowserStats::default())),
        }
    }

    pub fn on_target(mut self, url: &str, script: PageScript) -> Self {
        Arc::make_mut(&mut self.scripts).insert(url.to_string(), script);
        self
    }

    /// Simulated page load time, applied on every navigation.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn opened(&self) -> usize {
        self.stats.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.stats.lock().unwrap().closed
    }

    /// Highest number of pages open at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.stats.lock().unwrap().max_in_flight
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.stats.lock().unwrap().screenshots.clone()
    }
}

#[async_trait]
impl BrowserLauncher for MockBrowser {
    async fn open(&self, _session: &SessionHandle) -> Result<Box<dyn PageSession>, DriverError> {
        {
            let mut stats = self.stats.lock().unwrap();
            stats.opened += 1;
            stats.in_flight += 1;
            stats.max_in_flight = stats.max_in_flight.max(stats.in_flight);
        }
        Ok(Box::new(MockPage {
            scripts: self.scripts.clone(),
            selectors: self.selectors.clone(),
            page_delay: self.page_delay,
            stats: self.stats.clone(),
            state: Mutex::new(PageState::default()),
        }))
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    script: Option<PageScript>,
    extent_reads: usize,
    scrolls: u32,
}

pub struct MockPage {
    scripts: Arc<HashMap<String, PageScript>>,
    selectors: SelectorConfig,
    page_delay: Duration,
    stats: Arc<Mutex<BrowserStats>>,
    state: Mutex<PageState>,
}

impl MockPage {
    fn script(&self) -> Result<PageScript, DriverError> {
        self.state
            .lock()
            .unwrap()
            .script
            .clone()
            .ok_or_else(|| DriverError::Other(anyhow!("page used before navigation")))
    }
}

#[async_trait]
impl PageSession for MockPage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        let script = self
            .scripts
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::Other(anyhow!("no page scripted for {url}")))?;
        if let Some(message) = &script.navigation_error {
            return Err(DriverError::Other(anyhow!("{message}")));
        }
        let mut state = self.state.lock().unwrap();
        state.url = script.landing_url.clone().unwrap_or_else(|| url.to_string());
        state.script = Some(script);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<(), DriverError> {
        let script = self.script()?;
        if let Some(message) = &script.content_error {
            return Err(DriverError::Other(anyhow!("{message}")));
        }
        let visible = match script.content {
            ContentMode::Primary => true,
            ContentMode::FallbackOnly => selector != self.selectors.content,
            ContentMode::Missing => false,
        };
        if visible {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
            })
        }
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        let script = self.script()?;
        let mut state = self.state.lock().unwrap();
        state.scrolls += 1;
        if script.fail_on_round == Some(state.scrolls) {
            return Err(DriverError::Other(anyhow!("renderer crashed on scroll {}", state.scrolls)));
        }
        Ok(())
    }

    async fn scroll_extent(&self) -> Result<u64, DriverError> {
        let script = self.script()?;
        let mut state = self.state.lock().unwrap();
        let i = state.extent_reads.min(script.extents.len().saturating_sub(1));
        state.extent_reads += 1;
        Ok(script.extents.get(i).copied().unwrap_or(0))
    }

    async fn query_texts(&self, selector: &str) -> Result<Vec<String>, DriverError> {
        let script = self.script()?;
        let scrolls = self.state.lock().unwrap().scrolls as usize;
        let Some(frame) = script
            .frames
            .get(scrolls.saturating_sub(1).min(script.frames.len().saturating_sub(1)))
        else {
            return Ok(Vec::new());
        };

        let pick_author = selector == self.selectors.author;
        Ok(frame
            .iter()
            .map(|(author, text)| if pick_author { author.clone() } else { text.clone() })
            .collect())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        self.stats.lock().unwrap().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut stats = self.stats.lock().unwrap();
        stats.closed += 1;
        stats.in_flight = stats.in_flight.saturating_sub(1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Labels every `index: text` line of the prompt: odd indices as `faq`, even as
/// `issue`, topic `topic<index / 10>`, subtopic `sub<index>`.
#[derive(Default)]
pub struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Indices listed in each prompt, in call order.
    pub fn windows(&self) -> Vec<Vec<usize>> {
        self.prompts().iter().map(|p| prompt_indices(p)).collect()
    }
}

fn prompt_indices(prompt: &str) -> Vec<usize> {
    prompt
        .split_once("\nPosts:\n")
        .map(|(_, posts)| posts)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.split_once(':')?.0.trim().parse().ok())
        .collect()
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, _system: &str, prompt: &str, _temperature: f32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let (faq, issue): (Vec<usize>, Vec<usize>) =
            prompt_indices(prompt).into_iter().partition(|i| i % 2 == 1);
        let entries = |indices: Vec<usize>| -> Vec<Value> {
            indices
                .into_iter()
                .map(|i| json!({"index": i, "topic": [format!("topic{}", i / 10)], "subtopic": [format!("sub{i}")]}))
                .collect()
        };

        // Doubled braces, as the real model tends to answer.
        let body = json!({"issue": entries(issue), "faq": entries(faq)}).to_string();
        Ok(format!("```json\n{}\n```", body.replace('{', "{{").replace('}', "}}")))
    }
}

/// Returns canned responses in call order; errors once they run out.
pub struct ScriptedGenerator {
    responses: Mutex<Vec<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    temperatures: Mutex<Vec<f32>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self::from_results(vec![Err(message.to_string())])
    }

    fn from_results(mut responses: Vec<Result<String, String>>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            temperatures: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.temperatures.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _system: &str, prompt: &str, temperature: f32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.temperatures.lock().unwrap().push(temperature);
        match self.responses.lock().unwrap().pop() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryTableStore
// ---------------------------------------------------------------------------

type Rows = Vec<(Partition, Value)>;

#[derive(Default)]
struct Tables {
    ensured: Vec<String>,
    /// Rows committed by earlier runs.
    history: HashMap<String, Rows>,
    staged: HashMap<String, Rows>,
    committed: HashMap<String, Rows>,
    commits: usize,
}

/// In-memory partitioned tables. Rows become readable after `commit`, and
/// `read_back` only sees rows this store committed itself.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<Tables>,
    lossy: bool,
    drop_writes: bool,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose read-back always loses one row.
    pub fn lossy() -> Self {
        Self {
            lossy: true,
            ..Self::default()
        }
    }

    /// Accept writes and commits but never keep the rows.
    pub fn dropping_writes(mut self) -> Self {
        self.drop_writes = true;
        self
    }

    /// Pre-populate `table` with rows an earlier run committed.
    pub fn with_history<R: Serialize + Partitioned>(mut self, table: &TableRef, rows: &[R]) -> Self {
        let tables = self.tables.get_mut().unwrap();
        tables.ensured.push(table.to_string());
        let history = tables.history.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(partition) = row.partition() {
                history.push((partition, serde_json::to_value(row).unwrap()));
            }
        }
        self
    }

    pub fn commits(&self) -> usize {
        self.tables.lock().unwrap().commits
    }

    pub fn ensured(&self) -> Vec<String> {
        self.tables.lock().unwrap().ensured.clone()
    }

    /// Rows this store committed to `table`, as written.
    pub fn rows(&self, table: &TableRef) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .committed
            .get(&table.to_string())
            .map(|rows| rows.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    /// Every committed row of `table`, earlier runs first.
    pub fn all_rows(&self, table: &TableRef) -> Vec<Value> {
        let tables = self.tables.lock().unwrap();
        let key = table.to_string();
        [tables.history.get(&key), tables.committed.get(&key)]
            .into_iter()
            .flatten()
            .flat_map(|rows| rows.iter().map(|(_, v)| v.clone()))
            .collect()
    }

    pub fn partitions(&self, table: &TableRef) -> Vec<Partition> {
        let mut partitions: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .committed
            .get(&table.to_string())
            .map(|rows| rows.iter().map(|(p, _)| *p).collect())
            .unwrap_or_default();
        partitions.dedup();
        partitions
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn ensure_table(&self, table: &TableRef) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let key = table.to_string();
        if !tables.ensured.contains(&key) {
            tables.ensured.push(key);
        }
        Ok(())
    }

    async fn write_partition(&self, table: &TableRef, partition: Partition, rows: Vec<Value>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.ensured.contains(&table.to_string()) {
            return Err(anyhow!("table {table} was never ensured"));
        }
        if self.drop_writes {
            return Ok(());
        }
        tables
            .staged
            .entry(table.to_string())
            .or_default()
            .extend(rows.into_iter().map(|row| (partition, row)));
        Ok(())
    }

    async fn commit(&self, table: &TableRef, _message: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let staged = tables.staged.remove(&table.to_string()).unwrap_or_default();
        tables
            .committed
            .entry(table.to_string())
            .or_default()
            .extend(staged);
        tables.commits += 1;
        Ok(())
    }

    async fn read_back(&self, table: &TableRef, columns: &[&str]) -> Result<Vec<Map<String, Value>>> {
        let mut rows: Vec<Map<String, Value>> = self
            .rows(table)
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(mut map) => {
                    map.retain(|key, _| columns.contains(&key.as_str()));
                    Some(map)
                }
                _ => None,
            })
            .collect();
        if self.lossy {
            rows.pop();
        }
        Ok(rows)
    }
}
