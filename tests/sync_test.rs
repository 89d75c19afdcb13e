// Integration tests for sync runs and the background worker

mod common;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use common::Harness;
use std::sync::Arc;
use wearsync::credentials::TokenStatus;
use wearsync::events::DomainEvent;
use wearsync::provider::ProviderError;
use wearsync::scopes::Category;
use wearsync::sync::{SyncDispatcher, SyncError, SyncJob, SyncWorker};

#[tokio::test]
async fn test_transient_failure_is_retried_until_success() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");
    h.provider
        .script_fetch(Err(ProviderError::Unavailable("503".into())));
    h.provider.script_fetch(Err(ProviderError::RateLimited {
        retry_after_secs: None,
    }));

    let since = Utc::now() - Duration::days(1);
    let result = h
        .trigger
        .trigger_sync(&record.provider_credential, since, 3, "u1")
        .await
        .unwrap();

    assert_eq!(h.provider.fetch_count(), 3);
    assert_eq!(result.categories.len(), 1);
    assert_eq!(result.categories[0].category, Category::Body);
    assert_eq!(result.categories[0].attempts, 3);
    assert_eq!(result.status, TokenStatus::ValidToken);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let h = Harness::new("sleep-scope");
    let record = h.seed_linked("sleep-scope");
    for _ in 0..5 {
        h.provider
            .script_fetch(Err(ProviderError::Transport("timeout".into())));
    }

    let err = h
        .trigger
        .trigger_sync(&record.provider_credential, Utc::now(), 3, "u1")
        .await
        .unwrap_err();

    assert_eq!(h.provider.fetch_count(), 3);
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.category(), Some(Category::Sleep));

    // Nothing was synced, so the horizon stays where it was
    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    assert_eq!(stored.provider_credential.last_sync, None);
    assert_eq!(stored.provider_credential.status, Some(TokenStatus::ValidToken));
}

#[tokio::test]
async fn test_rejected_token_is_not_retried_and_downgrades_status() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");
    h.provider
        .script_fetch(Err(ProviderError::InvalidToken("revoked".into())));

    let err = h
        .trigger
        .trigger_sync(&record.provider_credential, Utc::now(), 3, "u1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Provider { attempts: 1, .. }));
    assert_eq!(h.provider.fetch_count(), 1);

    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    assert_eq!(stored.provider_credential.status, Some(TokenStatus::InvalidToken));
}

#[tokio::test]
async fn test_expired_token_downgrades_status() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");
    h.provider
        .script_fetch(Err(ProviderError::ExpiredToken("expired".into())));

    h.trigger
        .trigger_sync(&record.provider_credential, Utc::now(), 3, "u1")
        .await
        .unwrap_err();

    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    assert_eq!(stored.provider_credential.status, Some(TokenStatus::ExpiredToken));
}

#[tokio::test]
async fn test_sync_category_covers_one_day() {
    let h = Harness::new("weight-scope sleep-scope");
    let record = h.seed_linked("weight-scope sleep-scope");
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    let result = h
        .trigger
        .sync_category(&record.provider_credential, "u1", Category::Sleep, date, 1)
        .await
        .unwrap();

    let day_start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    assert_eq!(result.window.start, day_start);
    assert_eq!(result.window.end, day_start + Duration::days(1));

    let calls = h.provider.fetch_calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(Category::Sleep, result.window)]);

    let events = h.publisher.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        DomainEvent::DataSync {
            category,
            provider_user_id,
            records,
            ..
        } => {
            assert_eq!(*category, Category::Sleep);
            assert_eq!(provider_user_id.as_deref(), Some("p1"));
            assert_eq!(records.len(), 1);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // A single day of a single category is not a horizon for the user
    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    assert_eq!(stored.provider_credential.last_sync, None);
}

#[tokio::test]
async fn test_category_sync_keeps_horizon_for_other_categories() {
    let h = Harness::new("weight-scope sleep-scope");
    let record = h.seed_linked("weight-scope sleep-scope");
    let week_ago = Utc::now() - Duration::days(7);
    h.store.record_sync("u1", week_ago).unwrap();

    let today = Utc::now().date_naive();
    h.trigger
        .sync_category(&record.provider_credential, "u1", Category::Sleep, today, 1)
        .await
        .unwrap();

    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    assert_eq!(
        stored.provider_credential.last_sync.map(|ts| ts.timestamp()),
        Some(week_ago.timestamp())
    );

    // The next full sync still covers the week for every category
    h.provider.fetch_calls.lock().unwrap().clear();
    h.orchestrator.request_sync("u1").await.unwrap();

    let calls = h.provider.fetch_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    for (category, window) in calls {
        assert_eq!(window.start.timestamp(), week_ago.timestamp(), "{category}");
        assert!(window.start <= window.end, "{category}");
    }
}

#[tokio::test]
async fn test_full_sync_never_records_future_horizon() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");

    let result = h
        .trigger
        .trigger_sync(&record.provider_credential, Utc::now() - Duration::days(1), 1, "u1")
        .await
        .unwrap();

    let stored = h.store.find_by_internal_user_id("u1").unwrap().unwrap();
    let last_sync = stored.provider_credential.last_sync.unwrap();
    assert!(last_sync <= Utc::now());
    assert_eq!(last_sync, result.window.end);
}

#[tokio::test]
async fn test_bus_failure_fails_sync() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");
    h.publisher.fail_with("stream unavailable");

    let err = h
        .trigger
        .trigger_sync(&record.provider_credential, Utc::now(), 1, "u1")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Bus(_)));
}

#[tokio::test]
async fn test_worker_publishes_failure_of_background_job() {
    let h = Harness::new("weight-scope");
    let record = h.seed_linked("weight-scope");
    for _ in 0..3 {
        h.provider
            .script_fetch(Err(ProviderError::Unavailable("503".into())));
    }

    let (dispatcher, worker) = SyncWorker::channel(h.trigger.clone(), h.publisher.clone(), 8);
    let handle = worker.start();

    dispatcher.submit(SyncJob::Full {
        internal_user_id: "u1".to_string(),
        credential: record.provider_credential,
        since: Utc::now() - Duration::days(30),
        max_attempts: 3,
    });
    drop(dispatcher);
    handle.await.unwrap();

    assert_eq!(h.provider.fetch_count(), 3);
    let failures: Vec<DomainEvent> = h
        .publisher
        .events()
        .into_iter()
        .filter(|e| matches!(e, DomainEvent::SyncFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        DomainEvent::SyncFailed {
            internal_user_id,
            category,
            attempts,
            ..
        } => {
            assert_eq!(internal_user_id, "u1");
            assert_eq!(*category, Some(Category::Body));
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_runs_announce_and_category_jobs() {
    let h = Harness::new("weight-scope");
    h.seed_linked("weight-scope");
    let last_sync = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let (dispatcher, worker) = SyncWorker::channel(h.trigger.clone(), h.publisher.clone(), 8);
    let dispatcher: Arc<dyn SyncDispatcher> = Arc::new(dispatcher);
    let handle = worker.start();

    dispatcher.submit(SyncJob::AnnounceLastSync {
        internal_user_id: "u1".to_string(),
        last_sync,
    });
    dispatcher.submit(SyncJob::Category {
        internal_user_id: "u1".to_string(),
        credential: h.store.find_by_internal_user_id("u1").unwrap().unwrap().provider_credential,
        category: Category::Body,
        date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        max_attempts: 1,
    });
    drop(dispatcher);
    handle.await.unwrap();

    let events = h.publisher.events();
    assert!(events.contains(&DomainEvent::LastSync {
        internal_user_id: "u1".to_string(),
        last_sync,
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, DomainEvent::DataSync { category: Category::Body, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DomainEvent::SyncFailed { .. })));
}
