//! Windowed classification with a deterministic generator.

use std::sync::Arc;

use tagwatch_common::{NormalizedPost, RecordClass};
use tagwatch_scout::classifier::{prepare_rows, IncrementalClassifier, Taxonomy};
use tagwatch_scout::testing::{normalized_post, EchoGenerator};

/// `n` distinct posts, one minute apart, oldest first once sorted.
fn posts(n: usize) -> Vec<NormalizedPost> {
    (0..n)
        .map(|i| {
            normalized_post(
                "TU",
                &format!("user{i}"),
                &format!("question number {i} #TU"),
                &format!("{}m", n - i),
            )
        })
        .collect()
}

#[tokio::test]
async fn forty_five_rows_make_windows_of_twenty_twenty_five() {
    let generator = Arc::new(EchoGenerator::new());
    let classifier = IncrementalClassifier::new(generator.clone(), 20, 0.2);

    let run = classifier.classify(&posts(45)).await.unwrap();

    assert_eq!(run.windows, 3);
    let sizes: Vec<_> = generator.windows().iter().map(Vec::len).collect();
    assert_eq!(sizes, [20, 20, 5]);
    assert_eq!(generator.windows()[2], [41, 42, 43, 44, 45]);

    // Odd indices come back as faq, even as issue; only faq is kept.
    assert_eq!(run.records.len(), 23);
    assert!(run.records.iter().all(|r| r.class == RecordClass::Faq));
    assert_eq!(run.records[0].text, "question number 0");
    assert_eq!(run.records[0].subtopic, ["sub1"]);
}

#[tokio::test]
async fn taxonomy_only_grows_and_feeds_later_prompts() {
    let generator = Arc::new(EchoGenerator::new());
    let classifier = IncrementalClassifier::new(generator.clone(), 20, 0.2);
    let rows = prepare_rows(&posts(45));

    let mut taxonomy = Taxonomy::default();
    let mut history = vec![taxonomy.clone()];
    for (i, window) in rows.chunks(20).enumerate() {
        let (next, _) = classifier.classify_window(taxonomy, window, i + 1).await.unwrap();
        taxonomy = next;
        history.push(taxonomy.clone());
    }

    for pair in history.windows(2) {
        assert!(pair[1].is_superset_of(&pair[0]));
    }
    assert_eq!(taxonomy.faq.subtopics.len(), 23);
    assert_eq!(taxonomy.issue.subtopics.len(), 22);

    let prompts = generator.prompts();
    assert!(prompts[0].contains("- faq subtopics: (none yet)"));
    assert!(prompts[2].contains("sub21"));
    assert!(!prompts[1].contains("sub21"));
}

#[tokio::test]
async fn same_input_and_generator_give_the_same_records() {
    let input = posts(30);

    let first = IncrementalClassifier::new(Arc::new(EchoGenerator::new()), 20, 0.2)
        .classify(&input)
        .await
        .unwrap();
    let second = IncrementalClassifier::new(Arc::new(EchoGenerator::new()), 20, 0.2)
        .classify(&input)
        .await
        .unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.taxonomy, second.taxonomy);
}

#[tokio::test]
async fn repeated_texts_are_classified_once() {
    let mut input = posts(4);
    input.push(normalized_post("TU", "copycat", "question number 1 #other", "30s"));

    let generator = Arc::new(EchoGenerator::new());
    let run = IncrementalClassifier::new(generator.clone(), 20, 0.2)
        .classify(&input)
        .await
        .unwrap();

    assert_eq!(generator.windows(), [vec![1, 2, 3, 4]]);
    assert_eq!(run.records.len(), 2);
}
