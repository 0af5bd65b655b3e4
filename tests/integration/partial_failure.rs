//! Per-entity degradation: one bad lookup never aborts the run

use dataverse_metadata_fetcher::orchestrator::{FetchOptions, OrchestratorError};
use dataverse_metadata_fetcher::AttributeStatus;
use std::sync::Arc;

use crate::support::fixtures::{attribute, names, orchestrator};
use crate::support::mock_api::{MockApi, Route};

fn individual() -> FetchOptions {
    FetchOptions::default()
        .with_cache(false)
        .with_relationships(true)
}

#[tokio::test]
async fn test_failed_entity_is_reported_and_others_continue() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("account")
            .with_entity("broken")
            .with_entity("contact")
            .failing_entity("broken", 500),
    );
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(&names(&["account", "broken", "contact"]), &individual(), None)
        .await
        .unwrap();

    let fetched: Vec<_> = report.entities.iter().map(|e| e.logical_name()).collect();
    assert_eq!(fetched, vec!["account", "contact"]);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity, "broken");
    assert!(report.failures[0].message.contains("500"));

    // 1 attempt + 3 retries for the transient 500
    assert_eq!(
        api.count(|r| matches!(r, Route::Entity(name) if name == "broken")),
        4
    );
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("account")
            .with_entity("forbidden")
            .failing_entity("forbidden", 403),
    );
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(&names(&["account", "forbidden"]), &individual(), None)
        .await
        .unwrap();

    assert_eq!(report.stats.fetched, 1);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(
        api.count(|r| matches!(r, Route::Entity(name) if name == "forbidden")),
        1
    );
}

#[tokio::test]
async fn test_not_found_is_not_a_failure() {
    let api = Arc::new(MockApi::new().with_entity("account"));
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(&names(&["account", "doesnotexist"]), &individual(), None)
        .await
        .unwrap();

    assert_eq!(report.stats.fetched, 1);
    assert_eq!(report.stats.not_found, 1);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.not_found, vec!["doesnotexist"]);
    // 404 is never retried
    assert_eq!(
        api.count(|r| matches!(r, Route::Entity(name) if name == "doesnotexist")),
        1
    );
}

#[tokio::test]
async fn test_throttled_lookup_recovers() {
    let api = Arc::new(MockApi::new().with_entity("account").throttled("account", 2));
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(&names(&["account"]), &individual(), None)
        .await
        .unwrap();

    assert_eq!(report.stats.fetched, 1);
    assert!(report.entities[0].entity.has_relationships());
    assert_eq!(api.count(|r| matches!(r, Route::Entity(_))), 3);
}

#[tokio::test]
async fn test_failed_chunk_counts_its_entities_as_failed() {
    let api = Arc::new(
        MockApi::new()
            .with_entities(30)
            .failing_entity("entity_27", 400),
    );
    let orchestrator = orchestrator(&api);
    let input: Vec<String> = (0..30).map(|i| format!("entity_{i}")).collect();

    let report = orchestrator
        .fetch_entities(&input, &FetchOptions::default().with_cache(false), None)
        .await
        .unwrap();

    // Second chunk (entity_25..entity_29) fails as a whole
    assert_eq!(report.stats.fetched, 25);
    assert_eq!(report.stats.failed, 5);
    assert_eq!(report.stats.not_found, 0);
    let failed: Vec<_> = report.failures.iter().map(|f| f.entity.as_str()).collect();
    assert_eq!(
        failed,
        vec!["entity_25", "entity_26", "entity_27", "entity_28", "entity_29"]
    );
}

#[tokio::test]
async fn test_attribute_failure_keeps_basic_entity() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("account")
            .with_entity("contact")
            .with_attributes("account", vec![attribute("name", "String")])
            .failing_attributes("contact", 403),
    );
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(
            &names(&["account", "contact"]),
            &FetchOptions::default().with_cache(false).with_attributes(true),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.entities.len(), 2);
    assert_eq!(
        report.entity("account").unwrap().attribute_status,
        AttributeStatus::Enriched
    );

    let contact = report.entity("contact").unwrap();
    assert_eq!(contact.attribute_status, AttributeStatus::Failed);
    assert!(contact.attributes.is_empty());
    assert_eq!(contact.entity.schema_name.as_deref(), Some("Contact"));

    assert_eq!(report.stats.attribute_failures, 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].entity, "contact");
}

#[tokio::test]
async fn test_cast_failure_keeps_basic_attributes() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("account")
            .with_attributes(
                "account",
                vec![attribute("name", "String"), attribute("industrycode", "Picklist")],
            )
            .failing_cast("PicklistAttributeMetadata"),
    );
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(
            &names(&["account"]),
            &FetchOptions::default().with_cache(false).with_attributes(true),
            None,
        )
        .await
        .unwrap();

    let account = report.entity("account").unwrap();
    assert_eq!(account.attribute_status, AttributeStatus::Enriched);
    assert!(report.warnings.is_empty());

    let industry = account
        .attributes
        .iter()
        .find(|a| a.logical_name == "industrycode")
        .unwrap();
    assert!(industry.options().is_none());

    // Casts get a single retry
    assert_eq!(api.count(|r| matches!(r, Route::Cast(..))), 2);
}

#[tokio::test]
async fn test_zero_entities_is_fatal() {
    let api = Arc::new(MockApi::new().with_entity("broken").failing_entity("broken", 400));
    let orchestrator = orchestrator(&api);

    let result = orchestrator
        .fetch_entities(
            &names(&["broken", "doesnotexist"]),
            &FetchOptions::default().with_cache(false),
            None,
        )
        .await;

    match result {
        Err(OrchestratorError::NoEntitiesFetched {
            requested,
            not_found,
            failed,
        }) => {
            assert_eq!(requested, 2);
            // Both share the failing chunk
            assert_eq!(not_found, 0);
            assert_eq!(failed, 2);
        }
        other => panic!("expected NoEntitiesFetched, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_of_three_degrades_after_retries() {
    let api = Arc::new(
        MockApi::new()
            .with_entity("account")
            .with_entity("contact")
            .with_entity("lead")
            .with_attributes("account", vec![attribute("name", "String")])
            .with_attributes("lead", vec![attribute("subject", "String")])
            .failing_attributes("contact", 503),
    );
    let orchestrator = orchestrator(&api);

    let report = orchestrator
        .fetch_entities(
            &names(&["account", "contact", "lead"]),
            &FetchOptions::default().with_cache(false).with_attributes(true),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.entities.len(), 3);
    assert_eq!(report.stats.fetched, 3);
    assert_eq!(report.stats.attribute_failures, 1);

    let statuses: Vec<_> = report.entities.iter().map(|e| e.attribute_status).collect();
    assert_eq!(
        statuses,
        vec![
            AttributeStatus::Enriched,
            AttributeStatus::Failed,
            AttributeStatus::Enriched
        ]
    );
    let contact = report.entity("contact").unwrap();
    assert!(contact.attributes.is_empty());
    assert_eq!(contact.entity.schema_name.as_deref(), Some("Contact"));

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].entity, "contact");
    assert!(report.warnings[0].message.contains("503"));

    // 1 attempt + 3 retries for the transient 503
    assert_eq!(
        api.count(|r| matches!(r, Route::Attributes(name) if name == "contact")),
        4
    );
}
