//! End-to-end flow against in-memory collaborators.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tagwatch_common::file_config::parse_config;
use tagwatch_common::{FileConfig, Target};
use tagwatch_scout::flow::ScrapeFlow;
use tagwatch_scout::session::SessionError;
use tagwatch_scout::store::TableRef;
use tagwatch_scout::testing::{
    post_frame, test_session, EchoGenerator, MemoryTableStore, MockBrowser, PageScript, ScriptedGenerator,
};

fn config() -> FileConfig {
    parse_config(
        r##"
        [[targets]]
        category = "university"
        tags = ["#TU", "#CU"]

        [scrape]
        concurrency = 2
        cooldown_secs = 0
        settle_ms = 0
        session_path = "/nonexistent/x_session.json"

        [classify]
        window_size = 4
        "##,
    )
    .unwrap()
}

fn browser() -> MockBrowser {
    let page = |prefix: &str| {
        PageScript::new()
            .extents([1000, 2000, 2000])
            .frame(post_frame(prefix, 0..3))
            .frame(post_frame(prefix, 0..5))
    };
    MockBrowser::new()
        .on_target(&Target::search("university", "#TU").unwrap().url, page("tu"))
        .on_target(&Target::search("university", "#CU").unwrap().url, page("cu"))
}

#[tokio::test(start_paused = true)]
async fn full_flow_persists_raw_and_classified_tables() {
    let config = config();
    let store = Arc::new(MemoryTableStore::new());
    let generator = Arc::new(EchoGenerator::new());
    let flow = ScrapeFlow::new(
        config.clone(),
        Arc::new(browser()),
        generator.clone(),
        store.clone(),
        CancellationToken::new(),
    );

    let report = flow.run_with_session(&test_session()).await.unwrap();

    assert_eq!(report.targets, 2);
    assert_eq!(report.scraped, 10);
    assert_eq!(report.valid, 10);
    assert_eq!(report.windows, 3);
    assert_eq!(report.records, 5);
    assert_eq!(report.raw.written, 10);
    assert_eq!(report.raw.read_back, 10);
    assert_eq!(report.classified.written, 5);
    assert_eq!(store.commits(), 2);

    let raw_table = TableRef::from_config(&config.storage, &config.storage.raw);
    let classified_table = TableRef::from_config(&config.storage, &config.storage.classified);
    assert_eq!(store.ensured(), [raw_table.to_string(), classified_table.to_string()]);
    assert_eq!(store.rows(&raw_table).len(), 10);

    let classified = store.rows(&classified_table);
    assert!(classified.iter().all(|row| row["class"] == "faq"));
    assert!(classified.iter().all(|row| row.get("index").is_none()));
}

#[tokio::test(start_paused = true)]
async fn classification_failure_stops_before_loading() {
    let store = Arc::new(MemoryTableStore::new());
    let flow = ScrapeFlow::new(
        config(),
        Arc::new(browser()),
        Arc::new(ScriptedGenerator::new(["no json here"])),
        store.clone(),
        CancellationToken::new(),
    );

    let err = flow.run_with_session(&test_session()).await.unwrap_err();

    assert_eq!(err.to_string(), "step classify failed");
    assert_eq!(store.commits(), 0);
    assert!(store.ensured().is_empty());
}

#[tokio::test]
async fn missing_session_file_fails_first() {
    let browser = Arc::new(browser());
    let flow = ScrapeFlow::new(
        config(),
        browser.clone(),
        Arc::new(EchoGenerator::new()),
        Arc::new(MemoryTableStore::new()),
        CancellationToken::new(),
    );

    let err = flow.run().await.unwrap_err();

    assert_eq!(err.to_string(), "step load-session failed");
    assert!(err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<SessionError>(), Some(SessionError::Unreadable { .. }))));
    assert_eq!(browser.opened(), 0);
}
