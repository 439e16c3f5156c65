//! Cross-job merge and row validation before classification and storage.

use std::collections::HashSet;

use tracing::{info, warn};

use tagwatch_common::{NormalizedPost, Partition};

use crate::normalize::is_relative_token;

/// Flatten per-job batches, keeping the first occurrence of every
/// `(tag, author, text)`.
pub fn merge_posts<I>(batches: I) -> Vec<NormalizedPost>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = NormalizedPost>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let mut dropped = 0usize;

    for post in batches.into_iter().flatten() {
        if seen.insert((post.tag.clone(), post.author.clone(), post.text.clone())) {
            merged.push(post);
        } else {
            dropped += 1;
        }
    }

    info!(kept = merged.len(), dropped, "Merged posts");
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    EmptyAuthor,
    EmptyText,
    EmptyTag,
    /// A relative age resolved past the capture instant.
    FuturePostTime,
    /// `year`/`month`/`day` disagree with `post_time_raw`.
    PartitionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub row: usize,
    pub kind: ViolationKind,
}

#[derive(Debug)]
pub struct ValidationReport {
    pub valid: Vec<NormalizedPost>,
    pub violations: Vec<Violation>,
}

/// Drop rows that break a row invariant. Each dropped row is logged once,
/// with its first violation.
pub fn validate_posts(posts: Vec<NormalizedPost>) -> ValidationReport {
    let mut valid = Vec::with_capacity(posts.len());
    let mut violations = Vec::new();

    for (row, post) in posts.into_iter().enumerate() {
        match check(&post) {
            None => valid.push(post),
            Some(kind) => {
                warn!(row, ?kind, tag = %post.tag, "Dropping invalid post");
                violations.push(Violation { row, kind });
            }
        }
    }

    info!(valid = valid.len(), dropped = violations.len(), "Validated posts");
    ValidationReport { valid, violations }
}

fn check(post: &NormalizedPost) -> Option<ViolationKind> {
    if post.author.trim().is_empty() {
        return Some(ViolationKind::EmptyAuthor);
    }
    if post.text.trim().is_empty() {
        return Some(ViolationKind::EmptyText);
    }
    if post.tag.is_empty() {
        return Some(ViolationKind::EmptyTag);
    }

    let stored = Partition::from_parts(post.year, post.month, post.day);
    match post.post_time_raw {
        Some(at) => {
            if is_relative_token(&post.time_token) && at > post.captured_at {
                return Some(ViolationKind::FuturePostTime);
            }
            if stored != Some(Partition::of(at)) {
                return Some(ViolationKind::PartitionMismatch);
            }
        }
        None => {
            if post.year.is_some() || post.month.is_some() || post.day.is_some() {
                return Some(ViolationKind::PartitionMismatch);
            }
        }
    }
    None
}
