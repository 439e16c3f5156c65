use std::collections::BTreeSet;

use super::response::{LabelEntry, WindowResponse};

/// Topics and subtopics seen so far for one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    pub topics: BTreeSet<String>,
    pub subtopics: BTreeSet<String>,
}

impl LabelSet {
    fn absorb(&mut self, entries: &[LabelEntry]) {
        for entry in entries {
            self.topics.extend(non_empty(&entry.topic));
            self.subtopics.extend(non_empty(&entry.subtopic));
        }
    }

    fn is_superset_of(&self, other: &LabelSet) -> bool {
        self.topics.is_superset(&other.topics) && self.subtopics.is_superset(&other.subtopics)
    }
}

fn non_empty(labels: &[String]) -> impl Iterator<Item = String> + '_ {
    labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Label vocabulary for a run. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    pub issue: LabelSet,
    pub faq: LabelSet,
}

impl Taxonomy {
    /// Union every label of a window's response into the vocabulary.
    pub fn absorb(mut self, response: &WindowResponse) -> Self {
        self.issue.absorb(&response.issue);
        self.faq.absorb(&response.faq);
        self
    }

    /// `(issue topics, issue subtopics, faq topics, faq subtopics)`.
    pub fn sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.issue.topics.len(),
            self.issue.subtopics.len(),
            self.faq.topics.len(),
            self.faq.subtopics.len(),
        )
    }

    pub fn is_superset_of(&self, earlier: &Taxonomy) -> bool {
        self.issue.is_superset_of(&earlier.issue) && self.faq.is_superset_of(&earlier.faq)
    }
}
