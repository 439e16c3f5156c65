//! Scroll-and-collect extraction for a single hashtag target.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use tagwatch_common::file_config::{ScrapeConfig, SelectorConfig};
use tagwatch_common::{RawPost, Target};

use crate::session::{is_login_url, SessionHandle};
use crate::traits::{BrowserLauncher, DriverError, PageSession};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub max_rounds: u32,
    pub settle: Duration,
    pub content_timeout: Duration,
    pub fallback_timeout: Duration,
    pub diagnostics_dir: PathBuf,
    pub selectors: SelectorConfig,
}

impl From<&ScrapeConfig> for ExtractorConfig {
    fn from(config: &ScrapeConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            settle: config.settle(),
            content_timeout: config.content_timeout(),
            fallback_timeout: config.fallback_timeout(),
            diagnostics_dir: config.diagnostics_dir.clone(),
            selectors: config.selectors.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page stopped growing.
    Converged,
    RoundLimit,
    /// Neither content selector appeared.
    NoContent,
    /// A driver error after the page opened; posts are partial or empty.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub posts: Vec<RawPost>,
    pub rounds: u32,
    pub stop: StopReason,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("session rejected for {target}: redirected to {url}")]
    SessionInvalid { target: String, url: String },

    #[error("failed to open page for {target}")]
    Open {
        target: String,
        #[source]
        source: DriverError,
    },
}

pub struct Extractor {
    browser: Arc<dyn BrowserLauncher>,
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(browser: Arc<dyn BrowserLauncher>, config: ExtractorConfig) -> Self {
        Self { browser, config }
    }

    /// Collect posts for one target. The page is closed on every exit path.
    ///
    /// Only a stale session or a page that cannot be opened is an error. Any
    /// later driver failure ends the job with [`StopReason::Failed`] and
    /// whatever was collected so far.
    pub async fn extract(
        &self,
        session: &SessionHandle,
        target: &Target,
    ) -> Result<Extraction, ExtractError> {
        let page = self
            .browser
            .open(session)
            .await
            .map_err(|source| ExtractError::Open {
                target: target.to_string(),
                source,
            })?;

        let result = self.drive(page.as_ref(), target).await;

        if let Err(e) = page.close().await {
            warn!(target = %target, error = %e, "Failed to close page");
        }

        if let Ok(extraction) = &result {
            info!(
                target = %target,
                posts = extraction.posts.len(),
                rounds = extraction.rounds,
                stop = ?extraction.stop,
                "Extraction finished"
            );
        }
        result
    }

    async fn drive(
        &self,
        page: &dyn PageSession,
        target: &Target,
    ) -> Result<Extraction, ExtractError> {
        if let Err(e) = page.navigate(&target.url).await {
            return Ok(abandoned(target, "navigate", &e));
        }

        let landed = match page.current_url().await {
            Ok(url) => url,
            Err(e) => return Ok(abandoned(target, "current-url", &e)),
        };
        if is_login_url(&landed) {
            return Err(ExtractError::SessionInvalid {
                target: target.to_string(),
                url: landed,
            });
        }

        let found = match self.wait_for_content(page, target).await {
            Ok(found) => found,
            Err(e) => return Ok(abandoned(target, "wait-content", &e)),
        };
        if !found {
            self.capture_diagnostics(page, target).await;
            return Ok(Extraction {
                posts: Vec::new(),
                rounds: 0,
                stop: StopReason::NoContent,
            });
        }

        let mut posts = Vec::new();
        let mut seen = HashSet::new();
        let mut rounds = 0;

        let stop = match self
            .scroll_rounds(page, &mut posts, &mut seen, &mut rounds)
            .await
        {
            Ok(stop) => stop,
            Err(e) => {
                warn!(
                    target = %target,
                    rounds,
                    collected = posts.len(),
                    error = %e,
                    "Round loop failed, keeping partial posts"
                );
                StopReason::Failed
            }
        };

        Ok(Extraction {
            posts,
            rounds,
            stop,
        })
    }

    /// Primary selector first, then the fallback. `false` when neither shows.
    async fn wait_for_content(
        &self,
        page: &dyn PageSession,
        target: &Target,
    ) -> Result<bool, DriverError> {
        let selectors = &self.config.selectors;
        let attempts = [
            (selectors.content.as_str(), self.config.content_timeout),
            (selectors.fallback_content.as_str(), self.config.fallback_timeout),
        ];

        for (selector, timeout) in attempts {
            match page.wait_for_selector(selector, timeout).await {
                Ok(()) => return Ok(true),
                Err(DriverError::Timeout { .. }) => {
                    warn!(target = %target, selector, "Content selector timed out");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn scroll_rounds(
        &self,
        page: &dyn PageSession,
        posts: &mut Vec<RawPost>,
        seen: &mut HashSet<(String, String)>,
        rounds: &mut u32,
    ) -> Result<StopReason, DriverError> {
        let max_rounds = self.config.max_rounds.max(1);
        let mut extent = page.scroll_extent().await?;

        while *rounds < max_rounds {
            *rounds += 1;
            page.scroll_to_bottom().await?;
            tokio::time::sleep(self.config.settle).await;

            let next_extent = page.scroll_extent().await?;
            let added = self.collect_visible(page, posts, seen).await?;
            debug!(round = *rounds, extent = next_extent, added, "Scroll round");

            if next_extent == extent {
                return Ok(StopReason::Converged);
            }
            extent = next_extent;
        }
        Ok(StopReason::RoundLimit)
    }

    /// Zip author and text blocks in document order and keep unseen pairs.
    async fn collect_visible(
        &self,
        page: &dyn PageSession,
        posts: &mut Vec<RawPost>,
        seen: &mut HashSet<(String, String)>,
    ) -> Result<usize, DriverError> {
        let authors = page.query_texts(&self.config.selectors.author).await?;
        let texts = page.query_texts(&self.config.selectors.text).await?;
        let captured_at = Utc::now();
        let before = posts.len();

        for (author, text) in authors.into_iter().zip(texts) {
            if author.trim().is_empty() || text.trim().is_empty() {
                continue;
            }
            if seen.insert((author.clone(), text.clone())) {
                posts.push(RawPost {
                    author,
                    text,
                    captured_at,
                });
            }
        }
        Ok(posts.len() - before)
    }

    async fn capture_diagnostics(&self, page: &dyn PageSession, target: &Target) {
        let path = diagnostics_path(&self.config.diagnostics_dir, target);
        match page.screenshot(&path).await {
            Ok(()) => warn!(target = %target, path = %path.display(), "No content, screenshot saved"),
            Err(e) => warn!(target = %target, error = %e, "No content, screenshot failed"),
        }
    }
}

fn abandoned(target: &Target, stage: &'static str, error: &DriverError) -> Extraction {
    warn!(target = %target, stage, error = %error, "Page failed before collection, skipping target");
    Extraction {
        posts: Vec::new(),
        rounds: 0,
        stop: StopReason::Failed,
    }
}

fn diagnostics_path(dir: &Path, target: &Target) -> PathBuf {
    let tag: String = target
        .tag
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!(
        "no-content-{}-{}.png",
        tag.trim_matches('_'),
        Utc::now().format("%Y%m%dT%H%M%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post_frame, test_session, MockBrowser, PageScript};

    fn config(max_rounds: u32) -> ExtractorConfig {
        ExtractorConfig {
            max_rounds,
            settle: Duration::from_millis(10),
            content_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(10),
            diagnostics_dir: PathBuf::from("tmp"),
            selectors: SelectorConfig::default(),
        }
    }

    fn target() -> Target {
        Target::search("uni", "#TU").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_extent_stops_growing() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .extents([1000, 2000, 2000, 3000])
                .frame(post_frame("a", 0..3))
                .frame(post_frame("a", 2..5)),
        ));
        let extractor = Extractor::new(browser.clone(), config(20));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();

        assert_eq!(extraction.stop, StopReason::Converged);
        assert_eq!(extraction.rounds, 2);
        assert_eq!(extraction.posts.len(), 5);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn round_limit_caps_a_growing_page() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .extents([1000, 2000, 3000, 4000, 5000])
                .frame(post_frame("a", 0..2))
                .frame(post_frame("a", 2..4))
                .frame(post_frame("a", 4..6)),
        ));
        let extractor = Extractor::new(browser, config(3));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();

        assert_eq!(extraction.stop, StopReason::RoundLimit);
        assert_eq!(extraction.rounds, 3);
        assert_eq!(extraction.posts.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rounds_is_clamped_to_one() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .extents([1000, 2000])
                .frame(post_frame("a", 0..2)),
        ));
        let extractor = Extractor::new(browser, config(0));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.rounds, 1);
        assert_eq!(extraction.posts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pairs_are_kept_once() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .extents([1000, 2000, 3000, 3000])
                .frame(post_frame("a", 0..4))
                .frame(post_frame("a", 0..4))
                .frame(post_frame("a", 1..6)),
        ));
        let extractor = Extractor::new(browser, config(20));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();

        let mut pairs: Vec<_> = extraction
            .posts
            .iter()
            .map(|p| (p.author.clone(), p.text.clone()))
            .collect();
        assert_eq!(pairs.len(), 6);
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_values_are_skipped() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new().extents([1000, 1000]).frame(vec![
                ("Alice · 1h".to_string(), "".to_string()),
                ("".to_string(), "orphan text".to_string()),
                ("Bob · 2h".to_string(), "kept".to_string()),
            ]),
        ));
        let extractor = Extractor::new(browser, config(5));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.posts.len(), 1);
        assert_eq!(extraction.posts[0].text, "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_selector_rescues_the_page() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .fallback_only()
                .extents([1000, 1000])
                .frame(post_frame("a", 0..2)),
        ));
        let extractor = Extractor::new(browser, config(5));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.stop, StopReason::Converged);
        assert_eq!(extraction.posts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_content_returns_empty_and_screenshots() {
        let dir = tempfile::tempdir().unwrap();
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(&target.url, PageScript::new().no_content()));
        let mut cfg = config(5);
        cfg.diagnostics_dir = dir.path().to_path_buf();
        let extractor = Extractor::new(browser.clone(), cfg);

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();

        assert_eq!(extraction.stop, StopReason::NoContent);
        assert!(extraction.posts.is_empty());
        let shots = browser.screenshots();
        assert_eq!(shots.len(), 1);
        assert!(shots[0].starts_with(dir.path()));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn login_redirect_is_session_invalid() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new().lands_on("https://x.com/i/flow/login"),
        ));
        let extractor = Extractor::new(browser.clone(), config(5));

        let err = extractor.extract(&test_session(), &target).await.unwrap_err();
        assert!(matches!(err, ExtractError::SessionInvalid { .. }));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_failure_keeps_partial_posts() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new()
                .extents([1000, 2000, 3000, 4000])
                .frame(post_frame("a", 0..3))
                .frame(post_frame("a", 3..6))
                .fail_on_round(3),
        ));
        let extractor = Extractor::new(browser.clone(), config(20));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.stop, StopReason::Failed);
        assert_eq!(extraction.posts.len(), 6);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_is_not_fatal() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new().navigation_fails("net::ERR_CONNECTION_RESET"),
        ));
        let extractor = Extractor::new(browser.clone(), config(5));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.stop, StopReason::Failed);
        assert_eq!(extraction.rounds, 0);
        assert!(extraction.posts.is_empty());
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn content_wait_error_is_not_fatal() {
        let target = target();
        let browser = Arc::new(MockBrowser::new().on_target(
            &target.url,
            PageScript::new().content_wait_fails("target closed"),
        ));
        let extractor = Extractor::new(browser.clone(), config(5));

        let extraction = extractor.extract(&test_session(), &target).await.unwrap();
        assert_eq!(extraction.stop, StopReason::Failed);
        assert!(browser.screenshots().is_empty());
    }

    #[test]
    fn open_error_names_its_cause_once() {
        let err = anyhow::Error::from(ExtractError::Open {
            target: "uni/#TU".into(),
            source: DriverError::Other(anyhow::anyhow!("net::ERR_CONNECTION_RESET")),
        });
        let rendered = format!("{err:#}");
        assert_eq!(rendered.matches("ERR_CONNECTION_RESET").count(), 1, "{rendered}");
    }

    #[test]
    fn diagnostics_path_is_filesystem_safe() {
        let path = diagnostics_path(Path::new("tmp"), &Target::search("uni", "#TU 89!").unwrap());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("no-content-TU_89-"));
        assert!(name.ends_with(".png"));
    }
}
