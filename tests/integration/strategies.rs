//! Strategy selection and the per-entity strategies

use dataverse_metadata_fetcher::orchestrator::{FetchConfig, FetchOptions};
use dataverse_metadata_fetcher::FetchStrategy;
use std::sync::Arc;
use std::time::Duration;

use crate::support::fixtures::{fast_scheduler, names, orchestrator, orchestrator_with, ProgressLog};
use crate::support::mock_api::{MockApi, Route};

#[tokio::test]
async fn test_cached_bulk_uses_large_batches() {
    let api = Arc::new(MockApi::new().with_entities(250));
    let orchestrator = orchestrator(&api);
    let progress = ProgressLog::default();
    let callback = progress.callback();
    let input: Vec<String> = (0..250).map(|i| format!("entity_{i}")).collect();

    let report = orchestrator
        .fetch_entities(&input, &FetchOptions::default().with_cache(true), Some(&callback))
        .await
        .unwrap();

    assert_eq!(report.strategy, FetchStrategy::CachedBulk);
    assert_eq!(report.stats.fetched, 250);
    assert_eq!(api.count(|r| matches!(r, Route::Entity(_))), 250);
    assert_eq!(api.count(|r| matches!(r, Route::OrFilter(_))), 0);

    let calls: Vec<_> = progress.calls().into_iter().map(|(done, total, _)| (done, total)).collect();
    assert_eq!(calls, vec![(100, 250), (200, 250), (250, 250)]);
}

#[tokio::test]
async fn test_cache_wins_over_relationships() {
    let options = FetchOptions::default().with_cache(true).with_relationships(true);
    assert_eq!(options.strategy(), FetchStrategy::CachedBulk);

    let api = Arc::new(MockApi::new().with_entity("account"));
    let report = orchestrator(&api)
        .fetch_entities(&names(&["account"]), &options, None)
        .await
        .unwrap();
    assert_eq!(report.strategy, FetchStrategy::CachedBulk);
    assert!(report.entities[0].entity.has_relationships());
}

#[tokio::test]
async fn test_individual_fetch_expands_relationships() {
    let api = Arc::new(MockApi::new().with_entity("account").with_entity("contact"));
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(
            &names(&["account", "contact"]),
            &FetchOptions::default().with_cache(false).with_relationships(true),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.strategy, FetchStrategy::IndividualWithRelationships);
    assert!(report.entities.iter().all(|e| e.entity.has_relationships()));
    assert_eq!(
        api.requests(),
        vec![Route::Entity("account".into()), Route::Entity("contact".into())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_individual_batches_are_spaced() {
    let api = Arc::new(MockApi::new().with_entities(25));
    let config = FetchConfig::default().with_scheduler(fast_scheduler());
    let orchestrator = orchestrator_with(&api, config);
    let progress = ProgressLog::default();
    let callback = progress.callback();
    let input: Vec<String> = (0..25).map(|i| format!("entity_{i}")).collect();

    let started = tokio::time::Instant::now();
    let report = orchestrator
        .fetch_entities(
            &input,
            &FetchOptions::default().with_cache(false).with_relationships(true),
            Some(&callback),
        )
        .await
        .unwrap();

    // 3 batches of at most 10, two 500ms pauses between them
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(report.stats.fetched, 25);
    assert_eq!(
        progress.calls(),
        vec![
            (10, 25, Some("entity_9".to_string())),
            (20, 25, Some("entity_19".to_string())),
            (25, 25, Some("entity_24".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_empty_input_is_a_no_op() {
    let api = Arc::new(MockApi::new().with_entity("account"));
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(&[], &FetchOptions::default().with_cache(false).with_attributes(true), None)
        .await
        .unwrap();

    assert!(report.entities.is_empty());
    assert_eq!(report.stats.requested, 0);
    assert_eq!(api.request_count(), 0);
}

#[tokio::test]
async fn test_duplicate_names_fetched_once() {
    let api = Arc::new(MockApi::new().with_entity("account").with_entity("contact"));
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(
            &names(&["account", "contact", "account"]),
            &FetchOptions::default().with_cache(false),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.stats.requested, 2);
    assert_eq!(report.entities.len(), 2);
    assert_eq!(api.requests(), vec![Route::OrFilter(names(&["account", "contact"]))]);
}

#[tokio::test]
async fn test_list_entity_names() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("contact")
            .with_entity("new_widget")
            .with_entity("account"),
    );
    let orchestrator = orchestrator(&api);

    let all = orchestrator.list_entity_names(false).await.unwrap();
    assert_eq!(all, vec!["account", "contact", "new_widget"]);

    let custom = orchestrator.list_entity_names(true).await.unwrap();
    assert_eq!(custom, vec!["new_widget"]);

    assert_eq!(
        api.requests(),
        vec![
            Route::List { custom_only: false },
            Route::List { custom_only: true }
        ]
    );
}
