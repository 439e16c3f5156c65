use std::collections::BTreeSet;
use std::fmt::Write;

use super::taxonomy::Taxonomy;
use super::IndexedRow;

pub const SYSTEM_INSTRUCTION: &str = "\
You label short social media posts for a topic dashboard.

Each post is either an `issue` (a complaint, problem or incident) or a `faq` \
(a question or request for information). For every post, pick one class and \
give one or more short topic labels and one or more short subtopic labels.

Reuse an existing label whenever it fits; only invent a new label when none \
of the existing ones apply. Keep labels in the language of the post.

Answer with a single JSON object and nothing else:
{\"issue\": [{\"index\": <n>, \"topic\": [\"...\"], \"subtopic\": [\"...\"]}], \
\"faq\": [{\"index\": <n>, \"topic\": [\"...\"], \"subtopic\": [\"...\"]}]}
Use the post's index exactly as given.";

/// Render one window: the vocabulary so far, then `index: text` lines.
pub fn build_window_prompt(taxonomy: &Taxonomy, rows: &[IndexedRow]) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "Existing labels:");
    render_set(&mut prompt, "issue topics", &taxonomy.issue.topics);
    render_set(&mut prompt, "issue subtopics", &taxonomy.issue.subtopics);
    render_set(&mut prompt, "faq topics", &taxonomy.faq.topics);
    render_set(&mut prompt, "faq subtopics", &taxonomy.faq.subtopics);

    let _ = writeln!(prompt, "\nPosts:");
    for row in rows {
        let text = row.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let _ = writeln!(prompt, "{}: {}", row.index, text);
    }
    prompt
}

fn render_set(prompt: &mut String, name: &str, labels: &BTreeSet<String>) {
    if labels.is_empty() {
        let _ = writeln!(prompt, "- {name}: (none yet)");
    } else {
        let joined = labels.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        let _ = writeln!(prompt, "- {name}: {joined}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::response::{LabelEntry, WindowResponse};

    fn row(index: usize, text: &str) -> IndexedRow {
        IndexedRow {
            index,
            text: text.to_string(),
            source: 0,
        }
    }

    #[test]
    fn empty_taxonomy_is_marked() {
        let prompt = build_window_prompt(&Taxonomy::default(), &[row(1, "hello")]);
        assert!(prompt.contains("- faq topics: (none yet)"));
        assert!(prompt.ends_with("1: hello\n"));
    }

    #[test]
    fn known_labels_and_flattened_rows_are_listed() {
        let taxonomy = Taxonomy::default().absorb(&WindowResponse {
            issue: vec![],
            faq: vec![LabelEntry {
                index: 1,
                topic: vec!["housing".into(), "admission".into()],
                subtopic: vec![],
            }],
        });

        let prompt = build_window_prompt(&taxonomy, &[row(7, "line one\nline two"), row(8, "x")]);

        assert!(prompt.contains("- faq topics: admission, housing\n"));
        assert!(prompt.contains("7: line one line two\n8: x\n"));
    }
}
