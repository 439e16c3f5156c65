//! Windowed topic labeling with a vocabulary that grows across windows.
//!
//! Posts are cleaned, ordered by post time and deduplicated by text, then
//! sent to the model in fixed-size windows, one window at a time. Each window's
//! prompt carries every label seen so far so later windows reuse them.

pub mod prompt;
pub mod response;
pub mod taxonomy;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use tagwatch_common::file_config::ClassifyConfig;
use tagwatch_common::{ClassifiedRecord, NormalizedPost, RecordClass};

use crate::traits::TextGenerator;

pub use prompt::{build_window_prompt, SYSTEM_INSTRUCTION};
pub use response::{parse_window_response, LabelEntry, ResponseError, WindowResponse};
pub use taxonomy::{LabelSet, Taxonomy};

static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\S+").expect("Invalid regex"));

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("text generation failed for window {window}")]
    Generator {
        window: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("unusable response for window {window}")]
    MalformedResponse {
        window: usize,
        #[source]
        source: ResponseError,
    },
}

/// A cleaned post with its dense 1-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRow {
    pub index: usize,
    pub text: String,
    /// Position of the source post in the classifier input.
    pub source: usize,
}

/// Strip hashtags, order by post time (missing last), drop repeated texts and
/// number what is left from 1.
pub fn prepare_rows(posts: &[NormalizedPost]) -> Vec<IndexedRow> {
    let mut order: Vec<usize> = (0..posts.len()).collect();
    order.sort_by_key(|&i| (posts[i].post_time_raw.is_none(), posts[i].post_time_raw));

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for source in order {
        let text = HASHTAG_RE.replace_all(&posts[source].text, "").trim().to_string();
        if !seen.insert(text.clone()) {
            continue;
        }
        rows.push(IndexedRow {
            index: rows.len() + 1,
            text,
            source,
        });
    }
    rows
}

/// Every non-empty `#`-separated piece of every input tag.
pub fn stop_words(posts: &[NormalizedPost]) -> BTreeSet<String> {
    posts
        .iter()
        .flat_map(|p| p.tag.split('#'))
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
pub struct ClassificationRun {
    /// One record per `faq` entry, in window order.
    pub records: Vec<ClassifiedRecord>,
    pub windows: usize,
    pub taxonomy: Taxonomy,
}

pub struct IncrementalClassifier {
    generator: Arc<dyn TextGenerator>,
    window_size: usize,
    temperature: f32,
}

impl IncrementalClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, window_size: usize, temperature: f32) -> Self {
        Self {
            generator,
            window_size: window_size.max(1),
            temperature,
        }
    }

    pub fn from_config(generator: Arc<dyn TextGenerator>, config: &ClassifyConfig) -> Self {
        Self::new(generator, config.window_size, config.temperature)
    }

    /// Label `posts` window by window. Any generator or parse failure aborts
    /// the run.
    pub async fn classify(&self, posts: &[NormalizedPost]) -> Result<ClassificationRun, ClassifyError> {
        let rows = prepare_rows(posts);
        let mut taxonomy = Taxonomy::default();
        let mut responses = Vec::new();

        for (i, window) in rows.chunks(self.window_size).enumerate() {
            let (next, response) = self.classify_window(taxonomy, window, i + 1).await?;
            taxonomy = next;
            responses.push(response);
        }

        let windows = responses.len();
        let records = join_faq(posts, &rows, responses, &stop_words(posts));
        info!(
            posts = posts.len(),
            rows = rows.len(),
            windows,
            records = records.len(),
            "Classification finished"
        );

        Ok(ClassificationRun {
            records,
            windows,
            taxonomy,
        })
    }

    /// Label one window and fold its labels into the vocabulary.
    pub async fn classify_window(
        &self,
        taxonomy: Taxonomy,
        window: &[IndexedRow],
        number: usize,
    ) -> Result<(Taxonomy, WindowResponse), ClassifyError> {
        let prompt = build_window_prompt(&taxonomy, window);
        let raw = self
            .generator
            .generate(SYSTEM_INSTRUCTION, &prompt, self.temperature)
            .await
            .map_err(|source| ClassifyError::Generator {
                window: number,
                source,
            })?;

        let response = parse_window_response(&raw).map_err(|source| ClassifyError::MalformedResponse {
            window: number,
            source,
        })?;

        let taxonomy = taxonomy.absorb(&response);
        let (issue_topics, issue_subtopics, faq_topics, faq_subtopics) = taxonomy.sizes();
        info!(
            window = number,
            rows = window.len(),
            issue = response.issue.len(),
            faq = response.faq.len(),
            issue_topics,
            issue_subtopics,
            faq_topics,
            faq_subtopics,
            "Window classified"
        );
        Ok((taxonomy, response))
    }
}

/// Join `faq` entries back to their source posts and drop stop-word labels.
fn join_faq(
    posts: &[NormalizedPost],
    rows: &[IndexedRow],
    responses: Vec<WindowResponse>,
    stop_words: &BTreeSet<String>,
) -> Vec<ClassifiedRecord> {
    let by_index: HashMap<usize, &IndexedRow> = rows.iter().map(|r| (r.index, r)).collect();
    let strip = |labels: Vec<String>| -> Vec<String> {
        labels
            .into_iter()
            .filter(|l| !stop_words.contains(l.trim()))
            .collect()
    };

    let mut records = Vec::new();
    for entry in responses.into_iter().flat_map(|r| r.faq) {
        let Some(row) = by_index.get(&entry.index) else {
            warn!(index = entry.index, "Label for unknown post index, skipping");
            continue;
        };
        let post = &posts[row.source];
        records.push(ClassifiedRecord {
            class: RecordClass::Faq,
            topic: strip(entry.topic),
            subtopic: strip(entry.subtopic),
            text: row.text.clone(),
            tag: post.tag.clone(),
            author: post.author.clone(),
            post_time_raw: post.post_time_raw,
            year: post.year,
            month: post.month,
            day: post.day,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{normalized_post, ScriptedGenerator};

    #[test]
    fn rows_are_cleaned_sorted_and_deduped() {
        let posts = vec![
            normalized_post("tu", "a", "late #TU #news", "1h"),
            normalized_post("tu", "b", "earliest #TU", "5h"),
            normalized_post("tu", "c", "no time", "??"),
            normalized_post("tu", "d", "late", "2m"),
        ];

        let rows = prepare_rows(&posts);

        let texts: Vec<_> = rows.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["earliest", "late", "no time"]);
        let indices: Vec<_> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, [1, 2, 3]);
        assert_eq!(rows[1].source, 0);
    }

    #[test]
    fn stop_words_split_tags_on_hash() {
        let mut post = normalized_post("tu", "a", "x", "1h");
        post.tag = "#TU#ธรรมศาสตร์".into();
        let words = stop_words(&[post, normalized_post("cu", "b", "y", "1h")]);
        let words: Vec<_> = words.iter().map(String::as_str).collect();
        assert_eq!(words, ["TU", "cu", "ธรรมศาสตร์"]);
    }

    #[tokio::test]
    async fn faq_entries_are_joined_and_stop_words_removed() {
        let posts = vec![
            normalized_post("TU", "alice", "when is the deadline? #TU", "2h"),
            normalized_post("TU", "bob", "wifi is down again", "1h"),
        ];
        let generator = Arc::new(ScriptedGenerator::new([r#"{"issue": [{"index": 2, "topic": ["wifi"], "subtopic": ["outage"]}],
              "faq": [{"index": 1, "topic": ["admission", "TU"], "subtopic": ["deadline"]},
                      {"index": 99, "topic": ["ghost"], "subtopic": []}]}"#]));
        let classifier = IncrementalClassifier::new(generator.clone(), 20, 0.2);

        let run = classifier.classify(&posts).await.unwrap();

        assert_eq!(run.windows, 1);
        assert_eq!(run.records.len(), 1);
        let record = &run.records[0];
        assert_eq!(record.class, RecordClass::Faq);
        assert_eq!(record.topic, ["admission"]);
        assert_eq!(record.subtopic, ["deadline"]);
        assert_eq!(record.text, "when is the deadline?");
        assert_eq!(record.author, "alice");
        assert!(run.taxonomy.issue.topics.contains("wifi"));
        assert!(run.taxonomy.faq.topics.contains("ghost"));
        assert_eq!(generator.temperatures(), [0.2]);
    }

    #[tokio::test]
    async fn malformed_response_aborts_with_window_number() {
        let posts: Vec<_> = (0..3)
            .map(|i| normalized_post("tu", "a", &format!("post {i}"), &format!("{}h", i + 1)))
            .collect();
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"issue": [], "faq": []}"#,
            "sorry, no JSON today",
        ]));
        let classifier = IncrementalClassifier::new(generator, 2, 0.2);

        let err = classifier.classify(&posts).await.unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::MalformedResponse {
                window: 2,
                source: ResponseError::NoObject
            }
        ));
    }

    #[tokio::test]
    async fn generator_failure_is_not_retried() {
        let posts = vec![normalized_post("tu", "a", "x", "1h")];
        let generator = Arc::new(ScriptedGenerator::failing("quota exceeded"));
        let classifier = IncrementalClassifier::new(generator.clone(), 20, 0.2);

        let err = classifier.classify(&posts).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Generator { window: 1, .. }));
        assert_eq!(generator.prompts().len(), 1);

        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chain, "text generation failed for window 1: quota exceeded");
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<&str>::new()));
        let classifier = IncrementalClassifier::new(generator.clone(), 0, 0.2);

        let run = classifier.classify(&[]).await.unwrap();
        assert_eq!(run.windows, 0);
        assert!(run.records.is_empty());
        assert!(generator.prompts().is_empty());
    }
}
