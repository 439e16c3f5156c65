//! The scheduled flow: collect, merge, validate, classify, persist.
//!
//! Every stage runs as a named step inside its own tracing span. A failing
//! step aborts the flow; the original error stays in the chain under a
//! `step <name> failed` context.

use std::future::Future;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use tagwatch_common::file_config::{ClassifyConfig, ScrapeConfig, TargetGroup};
use tagwatch_common::{FileConfig, NormalizedPost};

use crate::classifier::{ClassificationRun, IncrementalClassifier};
use crate::consolidate::{merge_posts, validate_posts, Violation};
use crate::extractor::{ExtractError, Extractor, ExtractorConfig};
use crate::normalize::normalize_post;
use crate::orchestrator::{expand_targets, CollectionRun, Orchestrator};
use crate::session::SessionHandle;
use crate::store::{persist_partitioned, PersistReport, TableRef, CLASSIFIED_COLUMNS, RAW_COLUMNS};
use crate::traits::{BrowserLauncher, TableStore, TextGenerator};

/// Run `fut` as the step `name`.
async fn step<T>(name: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let started = Instant::now();
    let result = fut
        .instrument(info_span!("step", name))
        .await
        .with_context(|| format!("step {name} failed"));

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(step = name, elapsed_ms, "Step finished"),
        Err(e) => error!(step = name, elapsed_ms, error = %format!("{e:#}"), "Step failed"),
    }
    result
}

/// Load and check the saved browser session.
pub async fn load_session(scrape: &ScrapeConfig) -> Result<SessionHandle> {
    step("load-session", async {
        Ok(SessionHandle::load(
            &scrape.session_path,
            &scrape.site_url,
            Utc::now(),
        )?)
    })
    .await
}

/// Posts that survived merge and validation.
#[derive(Debug)]
pub struct Collected {
    pub posts: Vec<NormalizedPost>,
    pub targets: usize,
    pub scraped: usize,
    pub group_sizes: Vec<usize>,
    pub violations: Vec<Violation>,
}

/// Scrape every configured target, then merge and validate the posts.
pub async fn collect_posts(
    targets: &[TargetGroup],
    scrape: &ScrapeConfig,
    browser: Arc<dyn BrowserLauncher>,
    session: &SessionHandle,
    cancel: CancellationToken,
) -> Result<Collected> {
    let targets = step("encode-tags", async { Ok(expand_targets(targets)?) }).await?;
    info!(targets = targets.len(), "Targets expanded");

    let extractor = Extractor::new(browser, ExtractorConfig::from(scrape));
    let orchestrator = Orchestrator::new(scrape.concurrency, scrape.cooldown(), cancel);

    let CollectionRun {
        items, group_sizes, ..
    } = step("scrape-tags", async {
        let run = orchestrator
            .run_all(&targets, |target| {
                let extractor = &extractor;
                let session = session.clone();
                async move {
                    let extraction = extractor.extract(&session, &target).await?;
                    Ok::<_, ExtractError>(
                        extraction
                            .posts
                            .into_iter()
                            .map(|raw| normalize_post(raw, &target))
                            .collect::<Vec<_>>(),
                    )
                }
            })
            .await?;
        Ok(run)
    })
    .await?;

    let scraped = items.len();
    let merged = step("merge", async { Ok(merge_posts([items])) }).await?;
    let report = step("validate", async { Ok(validate_posts(merged)) }).await?;

    Ok(Collected {
        posts: report.valid,
        targets: targets.len(),
        scraped,
        group_sizes,
        violations: report.violations,
    })
}

/// Label posts window by window.
pub async fn classify_posts(
    config: &ClassifyConfig,
    generator: Arc<dyn TextGenerator>,
    posts: &[NormalizedPost],
) -> Result<ClassificationRun> {
    let classifier = IncrementalClassifier::from_config(generator, config);
    step("classify", async { Ok(classifier.classify(posts).await?) }).await
}

#[derive(Debug)]
pub struct FlowReport {
    pub targets: usize,
    pub scraped: usize,
    pub valid: usize,
    pub dropped: usize,
    pub windows: usize,
    pub records: usize,
    pub raw: PersistReport,
    pub classified: PersistReport,
}

/// The full collection run with its collaborators.
pub struct ScrapeFlow {
    config: FileConfig,
    browser: Arc<dyn BrowserLauncher>,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn TableStore>,
    cancel: CancellationToken,
}

impl ScrapeFlow {
    pub fn new(
        config: FileConfig,
        browser: Arc<dyn BrowserLauncher>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn TableStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            browser,
            generator,
            store,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<FlowReport> {
        let session = load_session(&self.config.scrape).await?;
        self.run_with_session(&session).await
    }

    pub async fn run_with_session(&self, session: &SessionHandle) -> Result<FlowReport> {
        let collected = collect_posts(
            &self.config.targets,
            &self.config.scrape,
            self.browser.clone(),
            session,
            self.cancel.clone(),
        )
        .await?;

        let classification =
            classify_posts(&self.config.classify, self.generator.clone(), &collected.posts).await?;

        let storage = &self.config.storage;
        let raw_table = TableRef::from_config(storage, &storage.raw);
        let raw = step("load-raw", async {
            Ok(persist_partitioned(self.store.as_ref(), &raw_table, &collected.posts, RAW_COLUMNS).await?)
        })
        .await?;

        let classified_table = TableRef::from_config(storage, &storage.classified);
        let classified = step("load-classified", async {
            Ok(persist_partitioned(
                self.store.as_ref(),
                &classified_table,
                &classification.records,
                CLASSIFIED_COLUMNS,
            )
            .await?)
        })
        .await?;

        let report = FlowReport {
            targets: collected.targets,
            scraped: collected.scraped,
            valid: collected.posts.len(),
            dropped: collected.violations.len(),
            windows: classification.windows,
            records: classification.records.len(),
            raw,
            classified,
        };
        info!(
            targets = report.targets,
            scraped = report.scraped,
            valid = report.valid,
            records = report.records,
            "Flow finished"
        );
        Ok(report)
    }
}

/// Write one JSON object per line.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(
            serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid row", path.display(), i + 1))?,
        );
    }
    Ok(rows)
}
