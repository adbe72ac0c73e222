use std::sync::Arc;

use crate::lifecycle::inflight::InFlight;
use crate::lifecycle::pricing::PricingDefaults;
use crate::observability::metrics::Metrics;
use crate::refresh::ViewCache;
use crate::store::DocumentStore;
use crate::store::backend::RequestBackend;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub backend: Arc<dyn RequestBackend>,
    pub in_flight: InFlight,
    pub pricing: PricingDefaults,
    pub views: ViewCache,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn RequestBackend>,
        pricing: PricingDefaults,
    ) -> Self {
        let metrics = Metrics::new();
        Self {
            store,
            backend,
            in_flight: InFlight::new(metrics.operations_in_flight.clone()),
            pricing,
            views: ViewCache::new(),
            metrics,
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::AppState;
    use crate::lifecycle::pricing::PricingDefaults;
    use crate::models::company::{City, CompanyIdentity, CompanyProfile};
    use crate::store::backend::{BackendError, BackendRequest, RequestBackend};
    use crate::store::memory::MemoryStore;
    use crate::store::{Collection, DocumentStore, Fields};

    #[derive(Default)]
    struct StubData {
        profile: Option<CompanyProfile>,
        cities: Vec<City>,
        pending: Vec<BackendRequest>,
        failing: bool,
    }

    /// In-process backend with canned answers.
    #[derive(Clone, Default)]
    pub struct StubBackend {
        data: Arc<Mutex<StubData>>,
        seed_calls: Arc<AtomicUsize>,
    }

    impl StubBackend {
        pub fn with_profile(self, profile: CompanyProfile) -> Self {
            self.data.lock().unwrap().profile = Some(profile);
            self
        }

        pub fn with_cities(self, cities: Vec<City>) -> Self {
            self.data.lock().unwrap().cities = cities;
            self
        }

        pub fn with_pending(self, pending: Vec<BackendRequest>) -> Self {
            self.data.lock().unwrap().pending = pending;
            self
        }

        pub fn failing(self) -> Self {
            self.data.lock().unwrap().failing = true;
            self
        }

        pub fn seed_calls(&self) -> usize {
            self.seed_calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), BackendError> {
            if self.data.lock().unwrap().failing {
                return Err(BackendError::Http("connection refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RequestBackend for StubBackend {
        async fn pending_requests(&self, _city: Option<&str>) -> Result<Vec<BackendRequest>, BackendError> {
            self.check()?;
            Ok(self.data.lock().unwrap().pending.clone())
        }

        async fn company_profile(&self, _uid: &str) -> Result<Option<CompanyProfile>, BackendError> {
            self.check()?;
            Ok(self.data.lock().unwrap().profile.clone())
        }

        async fn cities(&self) -> Result<Vec<City>, BackendError> {
            self.check()?;
            Ok(self.data.lock().unwrap().cities.clone())
        }

        async fn seed_country_cities(&self) -> Result<(), BackendError> {
            self.seed_calls.fetch_add(1, Ordering::SeqCst);
            self.check()
        }

        async fn seed_cities_from_users(&self) -> Result<(), BackendError> {
            self.seed_calls.fetch_add(1, Ordering::SeqCst);
            self.check()
        }

        async fn update_location(
            &self,
            _user_id: &str,
            _city_id: Option<i64>,
            _city_name: Option<&str>,
        ) -> Result<(), BackendError> {
            self.check()
        }
    }

    pub fn test_state_with(backend: StubBackend) -> AppState {
        AppState::new(
            Arc::new(MemoryStore::new(256)),
            Arc::new(backend),
            PricingDefaults::default(),
        )
    }

    pub fn test_state() -> AppState {
        test_state_with(StubBackend::default())
    }

    pub fn company() -> CompanyIdentity {
        CompanyIdentity::new("co-1").with_name("Acme")
    }

    pub fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }

    pub async fn seed(state: &AppState, collection: Collection, id: &str, value: Value) {
        state
            .store
            .put(collection, id, fields(value))
            .await
            .unwrap();
    }
}
