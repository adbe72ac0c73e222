//! Company profile, city catalogue and location settings.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::lifecycle::observe;
use crate::models::company::{City, CompanyIdentity, CompanyOverview, CompanyProfile, ProfileSource};
use crate::normalize::first_text;
use crate::refresh::refresh_company;
use crate::state::AppState;
use crate::store::{Collection, Document, DocumentStore, Filter, Patch, StoreResult};

/// Below this many cities the backend catalogue is considered unseeded.
const MIN_CITIES: usize = 10;

const PROFILE_NAME: &[&str] = &["nombreEmpresa", "companyName", "displayName", "name", "nombreCompleto"];
const PROFILE_CITY: &[&str] = &["ciudad", "city", "ciudadNombre"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[serde(default)]
    pub city_id: Option<i64>,
    #[serde(default)]
    pub city_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocationOutcome {
    pub backend_updated: bool,
    pub profile_updated: bool,
}

/// The company's `users` document, keyed by id or carrying it in a field.
pub async fn user_document(store: &dyn DocumentStore, user_id: &str) -> StoreResult<Option<Document>> {
    if let Some(doc) = store.get(Collection::Users, user_id).await? {
        return Ok(Some(doc));
    }
    for field in ["uid", "userId", "id"] {
        let found = store
            .query(Collection::Users, &[Filter::eq(field, user_id)])
            .await?;
        if let Some(doc) = found.into_iter().next() {
            return Ok(Some(doc));
        }
    }
    Ok(None)
}

async fn backend_profile(state: &AppState, company: &CompanyIdentity) -> Option<CompanyProfile> {
    match state.backend.company_profile(&company.id).await {
        Ok(profile) => profile,
        Err(err) => {
            warn!(company_id = %company.id, error = %err, "backend profile unavailable");
            None
        }
    }
}

pub async fn company_profile(
    state: &AppState,
    company: &CompanyIdentity,
) -> Result<CompanyOverview, AppError> {
    if let Some(profile) = backend_profile(state, company).await {
        return Ok(CompanyOverview {
            id: company.id.clone(),
            name: profile
                .nombre_completo
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| company.label().to_string()),
            verified: profile.verified,
            city: profile.ciudad.filter(|city| !city.is_empty()),
            source: ProfileSource::Backend,
        });
    }

    match user_document(state.store.as_ref(), &company.id).await {
        Ok(Some(doc)) => {
            return Ok(CompanyOverview {
                id: company.id.clone(),
                name: first_text(&doc.data, PROFILE_NAME)
                    .unwrap_or_else(|| company.label().to_string()),
                verified: doc
                    .field("verified")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                city: first_text(&doc.data, PROFILE_CITY),
                source: ProfileSource::Document,
            });
        }
        Ok(None) => {}
        Err(err) => warn!(company_id = %company.id, error = %err, "profile document unavailable"),
    }

    Ok(CompanyOverview {
        id: company.id.clone(),
        name: company.label().to_string(),
        verified: false,
        city: None,
        source: ProfileSource::Identity,
    })
}

/// Backend city catalogue, seeding it first when it looks empty.
pub async fn cities(state: &AppState) -> Result<Vec<City>, AppError> {
    let cities = state.backend.cities().await?;
    if cities.len() >= MIN_CITIES {
        return Ok(cities);
    }

    info!(count = cities.len(), "city catalogue is sparse, seeding");
    if let Err(err) = state.backend.seed_country_cities().await {
        warn!(error = %err, "failed to seed country cities");
    }
    if let Err(err) = state.backend.seed_cities_from_users().await {
        warn!(error = %err, "failed to seed cities from users");
    }

    match state.backend.cities().await {
        Ok(seeded) => Ok(seeded),
        Err(err) => {
            warn!(error = %err, "failed to reload cities after seeding");
            Ok(cities)
        }
    }
}

pub async fn update_location(
    state: &AppState,
    company: &CompanyIdentity,
    update: &LocationUpdate,
) -> Result<LocationOutcome, AppError> {
    observe(state, "update_location", async {
        let city_name = update
            .city_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        if update.city_id.is_none() && city_name.is_none() {
            return Err(AppError::BadRequest(
                "cityId or cityName is required".to_string(),
            ));
        }

        let backend_user = backend_profile(state, company)
            .await
            .and_then(|profile| profile.id)
            .map(|id| id.to_string())
            .unwrap_or_else(|| company.id.clone());
        let backend_updated = match state
            .backend
            .update_location(&backend_user, update.city_id, city_name)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(company_id = %company.id, error = %err, "backend location update failed");
                false
            }
        };

        let profile_updated = match update_profile_city(state, company, update.city_id, city_name).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(company_id = %company.id, error = %err, "profile location update failed");
                false
            }
        };

        info!(
            company_id = %company.id,
            backend_updated,
            profile_updated,
            "company location updated"
        );
        if let Err(err) = refresh_company(state, company, true).await {
            warn!(company_id = %company.id, error = %err, "dashboard refresh after relocation failed");
        }

        Ok(LocationOutcome {
            backend_updated,
            profile_updated,
        })
    })
    .await
}

async fn update_profile_city(
    state: &AppState,
    company: &CompanyIdentity,
    city_id: Option<i64>,
    city_name: Option<&str>,
) -> StoreResult<bool> {
    let store = state.store.as_ref();
    let Some(doc) = user_document(store, &company.id).await? else {
        return Ok(false);
    };

    let mut patch = Patch::new().server_timestamp("updatedAt");
    if let Some(id) = city_id {
        patch = patch.set("ciudadId", id);
    }
    if let Some(name) = city_name {
        patch = patch.set("ciudad", name);
    }
    store.patch(Collection::Users, &doc.id, patch).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{company, seed, test_state, test_state_with, StubBackend};
    use serde_json::json;

    #[tokio::test]
    async fn profile_prefers_backend() {
        let backend = StubBackend::default().with_profile(CompanyProfile {
            id: Some(7),
            nombre_completo: Some("Acme S.A.S.".to_string()),
            verified: true,
            ciudad: Some("Bogotá".to_string()),
        });
        let state = test_state_with(backend);

        let overview = company_profile(&state, &company()).await.unwrap();
        assert_eq!(overview.source, ProfileSource::Backend);
        assert_eq!(overview.name, "Acme S.A.S.");
        assert_eq!(overview.city.as_deref(), Some("Bogotá"));
    }

    #[tokio::test]
    async fn profile_falls_back_to_document_then_identity() {
        let state = test_state();
        let fallback = company_profile(&state, &company()).await.unwrap();
        assert_eq!(fallback.source, ProfileSource::Identity);
        assert_eq!(fallback.name, "Acme");

        seed(&state, Collection::Users, "u-9", json!({
            "uid": "co-1",
            "nombreEmpresa": "Acme Logística",
            "ciudad": "Cali"
        }))
        .await;
        let overview = company_profile(&state, &company()).await.unwrap();
        assert_eq!(overview.source, ProfileSource::Document);
        assert_eq!(overview.name, "Acme Logística");
        assert_eq!(overview.city.as_deref(), Some("Cali"));
    }

    #[tokio::test]
    async fn sparse_catalogue_is_seeded() {
        let backend = StubBackend::default().with_cities(vec![City {
            id: 1,
            nombre: "Bogotá".to_string(),
        }]);
        let state = test_state_with(backend.clone());

        let listed = cities(&state).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(backend.seed_calls(), 2);
    }

    #[tokio::test]
    async fn location_requires_a_city() {
        let state = test_state();
        let result = update_location(&state, &company(), &LocationUpdate::default()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn location_updates_profile_document() {
        let state = test_state();
        seed(&state, Collection::Users, "co-1", json!({ "displayName": "Acme" })).await;

        let outcome = update_location(
            &state,
            &company(),
            &LocationUpdate {
                city_id: Some(3),
                city_name: Some("Medellín".to_string()),
            },
        )
        .await
        .unwrap();
        assert!(outcome.profile_updated);
        assert!(outcome.backend_updated);

        let doc = state.store.get(Collection::Users, "co-1").await.unwrap().unwrap();
        assert_eq!(doc.data["ciudad"], "Medellín");
        assert_eq!(doc.data["ciudadId"], 3);
        assert!(state.views.get(&company().id).is_some());
    }
}
