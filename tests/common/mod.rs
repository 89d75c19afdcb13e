// Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wearsync::credentials::{CredentialRecord, CredentialStore, ProviderCredential, TokenStatus};
use wearsync::directory::StaticUserDirectory;
use wearsync::events::{BusError, DomainEvent, EventPublisher};
use wearsync::orchestrator::CredentialOrchestrator;
use wearsync::provider::{Introspection, ProviderApi, ProviderError, SyncWindow};
use wearsync::scopes::Category;
use wearsync::subscription::SubscriptionRegistrar;
use wearsync::sync::{RetryPolicy, SyncDispatcher, SyncJob, SyncTrigger};

/// Provider fake with scripted answers and recorded calls.
pub struct RecordingProvider {
    pub introspection: Mutex<Result<Introspection, ProviderError>>,
    pub subscribe_failure: Mutex<Option<ProviderError>>,
    pub revoke_failure: Mutex<Option<ProviderError>>,
    /// Answers for successive fetches; empty means one record per fetch
    pub fetch_script: Mutex<VecDeque<Result<Vec<serde_json::Value>, ProviderError>>>,

    pub introspect_calls: Mutex<Vec<String>>,
    pub subscribe_calls: Mutex<Vec<Category>>,
    /// Provider account of each subscription call
    pub subscribed_accounts: Mutex<Vec<Option<String>>>,
    pub revoke_calls: Mutex<Vec<String>>,
    pub fetch_calls: Mutex<Vec<(Category, SyncWindow)>>,
}

impl RecordingProvider {
    pub fn granting(scope: &str) -> Self {
        Self {
            introspection: Mutex::new(Ok(Introspection {
                subject_id: Some("p1".to_string()),
                scope: Some(scope.to_string()),
                expires_in: Some(3600),
            })),
            subscribe_failure: Mutex::new(None),
            revoke_failure: Mutex::new(None),
            fetch_script: Mutex::new(VecDeque::new()),
            introspect_calls: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            subscribed_accounts: Mutex::new(Vec::new()),
            revoke_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
        }
    }

    /// Introspection now reports `subject` as the provider account.
    pub fn set_subject(&self, subject: &str) {
        if let Ok(claims) = self.introspection.lock().unwrap().as_mut() {
            claims.subject_id = Some(subject.to_string());
        }
    }

    pub fn set_introspection(&self, result: Result<Introspection, ProviderError>) {
        *self.introspection.lock().unwrap() = result;
    }

    pub fn script_fetch(&self, result: Result<Vec<serde_json::Value>, ProviderError>) {
        self.fetch_script.lock().unwrap().push_back(result);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.lock().unwrap().len()
    }

    pub fn revoke_count(&self) -> usize {
        self.revoke_calls.lock().unwrap().len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderApi for RecordingProvider {
    async fn introspect(&self, access_token: &str) -> Result<Introspection, ProviderError> {
        self.introspect_calls
            .lock()
            .unwrap()
            .push(access_token.to_string());
        self.introspection.lock().unwrap().clone()
    }

    async fn subscribe(
        &self,
        credential: &ProviderCredential,
        category: Category,
    ) -> Result<(), ProviderError> {
        self.subscribe_calls.lock().unwrap().push(category);
        self.subscribed_accounts
            .lock()
            .unwrap()
            .push(credential.provider_user_id.clone());
        match self.subscribe_failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn revoke(&self, access_token: &str) -> Result<(), ProviderError> {
        self.revoke_calls
            .lock()
            .unwrap()
            .push(access_token.to_string());
        match self.revoke_failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch(
        &self,
        _credential: &ProviderCredential,
        category: Category,
        window: SyncWindow,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        self.fetch_calls.lock().unwrap().push((category, window));
        self.fetch_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![serde_json::json!({ "value": 1 })]))
    }
}

/// Publisher fake that keeps every event.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<DomainEvent>>,
    pub failure: Mutex<Option<BusError>>,
}

impl RecordingPublisher {
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(BusError(reason.to_string()));
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), BusError> {
        if let Some(e) = self.failure.lock().unwrap().clone() {
            return Err(e);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Dispatcher fake that records jobs without running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub jobs: Mutex<Vec<SyncJob>>,
}

impl RecordingDispatcher {
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl SyncDispatcher for RecordingDispatcher {
    fn submit(&self, job: SyncJob) {
        self.jobs.lock().unwrap().push(job);
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// Everything wired together over an in-memory database.
pub struct Harness {
    pub store: Arc<CredentialStore>,
    pub directory: Arc<StaticUserDirectory>,
    pub provider: Arc<RecordingProvider>,
    pub publisher: Arc<RecordingPublisher>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub trigger: Arc<SyncTrigger>,
    pub orchestrator: Arc<CredentialOrchestrator>,
}

impl Harness {
    /// Directory knows `u1`; the provider grants `scope` to account `p1`.
    pub fn new(scope: &str) -> Self {
        let directory = Arc::new(StaticUserDirectory::with_users(["u1"]));
        let key = BASE64.encode([0u8; 32]);
        let store = Arc::new(CredentialStore::new(":memory:", &key, directory.clone()).unwrap());

        let provider = Arc::new(RecordingProvider::granting(scope));
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let trigger = Arc::new(SyncTrigger::new(
            store.clone(),
            provider.clone(),
            publisher.clone(),
            fast_retry(),
        ));
        let orchestrator = CredentialOrchestrator::new(
            store.clone(),
            provider.clone(),
            SubscriptionRegistrar::new(provider.clone(), publisher.clone()),
            trigger.clone(),
            dispatcher.clone(),
        );

        Self {
            store,
            directory,
            provider,
            publisher,
            dispatcher,
            trigger,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Stores a linked record for `u1`/`p1` directly, bypassing the provider.
    pub fn seed_linked(&self, scope: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new("u1", "token-1");
        record.provider_credential.provider_user_id = Some("p1".to_string());
        record.provider_credential.scope = Some(scope.to_string());
        record.provider_credential.status = Some(TokenStatus::ValidToken);
        self.store.upsert(&record).unwrap()
    }
}
