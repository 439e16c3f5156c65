use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TagwatchError;

/// Search page for hashtag queries, newest first.
pub const SEARCH_BASE_URL: &str = "https://x.com/search";

// --- Targets ---

/// One (category, tag) pair with its resolved search locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub category: String,
    pub tag: String,
    pub url: String,
}

impl Target {
    /// Build the live-search locator for `tag`; the tag is percent-encoded.
    pub fn search(category: &str, tag: &str) -> Result<Self, TagwatchError> {
        let url = url::Url::parse_with_params(
            SEARCH_BASE_URL,
            &[("q", tag), ("src", "typeahead_click"), ("f", "live")],
        )
        .map_err(|source| TagwatchError::TargetUrl {
            tag: tag.to_string(),
            source,
        })?;

        Ok(Self {
            category: category.to_string(),
            tag: tag.to_string(),
            url: url.into(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.tag)
    }
}

// --- Posts ---

/// One post as observed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    /// Rendered author block, including the trailing `· <time>` token.
    pub author: String,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

/// A raw post with its tag, absolute post time and calendar partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPost {
    pub author: String,
    pub text: String,
    pub captured_at: DateTime<Utc>,
    pub category: String,
    /// Sanitized tag.
    pub tag: String,
    /// Time token as rendered, e.g. `3h` or `Jan 4`.
    pub time_token: String,
    pub post_time_raw: Option<DateTime<Utc>>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

// --- Partitions ---

/// Calendar partition key for persisted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Partition {
    pub fn of(instant: DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
            day: instant.day(),
        }
    }

    pub fn from_parts(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> Option<Self> {
        Some(Self {
            year: year?,
            month: month?,
            day: day?,
        })
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Hive-style path segment: `year=2024/month=1/day=4`.
    pub fn path(&self) -> String {
        format!("year={}/month={}/day={}", self.year, self.month, self.day)
    }

    /// Recover a partition from any path containing hive-style segments.
    pub fn parse_path(path: &str) -> Option<Self> {
        let mut year = None;
        let mut month = None;
        let mut day = None;
        for segment in path.split('/') {
            if let Some((key, value)) = segment.split_once('=') {
                match key {
                    "year" => year = value.parse().ok(),
                    "month" => month = value.parse().ok(),
                    "day" => day = value.parse().ok(),
                    _ => {}
                }
            }
        }
        Self::from_parts(year, month, day)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Rows that can be written to a calendar-partitioned table.
pub trait Partitioned {
    fn partition(&self) -> Option<Partition>;
}

impl Partitioned for NormalizedPost {
    fn partition(&self) -> Option<Partition> {
        Partition::from_parts(self.year, self.month, self.day)
    }
}

// --- Classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordClass {
    Issue,
    Faq,
}

impl RecordClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordClass::Issue => "issue",
            RecordClass::Faq => "faq",
        }
    }
}

/// A labeled post joined back to its source metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedRecord {
    pub class: RecordClass,
    pub topic: Vec<String>,
    pub subtopic: Vec<String>,
    pub text: String,
    pub tag: String,
    pub author: String,
    pub post_time_raw: Option<DateTime<Utc>>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl Partitioned for ClassifiedRecord {
    fn partition(&self) -> Option<Partition> {
        Partition::from_parts(self.year, self.month, self.day)
    }
}
