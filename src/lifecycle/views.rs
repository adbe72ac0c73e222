//! Read side of the lifecycle. There is no native "requests visible to
//! this company" query, so views over-fetch by status and filter here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;
use crate::geo::display_km;
use crate::lifecycle::company::locate_source;
use crate::lifecycle::{load_delivery, messages};
use crate::links::whatsapp_link;
use crate::models::company::{CompanyIdentity, DriverProfile};
use crate::models::delivery::{Delivery, DeliveryStatus, GeoPoint, PublicationState};
use crate::models::request::{
    CandidateCompany, CompanyState, Request, RequestDeliveryStatus, RequestStatus,
};
use crate::normalize::{first_number, first_text, normalize_request};
use crate::state::AppState;
use crate::store::{Collection, DocumentStore, Filter, StoreResult};

pub const UNSPECIFIED_COMPANY: &str = "No especificada";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: Request,
    pub company_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDelivery {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactLink {
    pub url: String,
}

fn candidate_matches(candidate: &CandidateCompany, company: &CompanyIdentity) -> bool {
    match candidate {
        CandidateCompany::Id(id) => *id == company.id,
        CandidateCompany::Profile(profile) if profile.has_id() => {
            profile.id.as_deref() == Some(company.id.as_str())
                || profile.company_id.as_deref() == Some(company.id.as_str())
        }
        // Names are only trusted when the entry carries no id at all.
        CandidateCompany::Profile(profile) => [&profile.name, &profile.company_name]
            .into_iter()
            .filter_map(|name| name.as_deref())
            .any(|name| company.answers_to_name(name)),
    }
}

/// Candidate-list match OR legacy single-company fields.
pub fn matches_company(request: &Request, company: &CompanyIdentity) -> bool {
    let by_candidate = request
        .candidate_companies
        .iter()
        .any(|candidate| candidate_matches(candidate, company));
    let by_legacy = request.company_id.as_deref() == Some(company.id.as_str())
        || request
            .company_name
            .as_deref()
            .is_some_and(|name| company.answers_to_name(name))
        || request.requester_id.as_deref() == Some(company.id.as_str());
    by_candidate || by_legacy
}

fn claimed_by_other(request: &Request, company: &CompanyIdentity) -> bool {
    request
        .company_id
        .as_deref()
        .is_some_and(|owner| !owner.is_empty() && owner != company.id)
}

/// Whether `company` may change the request: it is addressed to the
/// company and no other company has confirmed it.
pub fn may_act_on(request: &Request, company: &CompanyIdentity) -> bool {
    matches_company(request, company) && !claimed_by_other(request, company)
}

fn is_delivered(request: &Request) -> bool {
    request.status == RequestStatus::Delivered
        || request.delivery_status == Some(RequestDeliveryStatus::Delivered)
}

pub fn is_pending_for(request: &Request, company: &CompanyIdentity) -> bool {
    request.status == RequestStatus::Pending
        && !request.has_driver()
        && request.company_state != Some(CompanyState::InProgress)
        && !request.active_for_company
        && matches_company(request, company)
}

pub fn is_active_for(request: &Request, company: &CompanyIdentity) -> bool {
    let has_marker = request.status == RequestStatus::Confirmed
        || request.has_driver()
        || request.active_for_company;
    has_marker
        && request.status != RequestStatus::Denied
        && !is_delivered(request)
        && !claimed_by_other(request, company)
        && matches_company(request, company)
}

pub fn is_completed_for(request: &Request, company: &CompanyIdentity) -> bool {
    is_delivered(request) && !claimed_by_other(request, company) && matches_company(request, company)
}

fn newest_first(requests: &mut [Request]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Runs each query and merges the hits, deduplicated by id.
async fn union(
    store: &dyn DocumentStore,
    queries: &[Vec<Filter>],
) -> StoreResult<Vec<Request>> {
    let mut merged = BTreeMap::new();
    for filters in queries {
        for doc in store.query(Collection::Requests, filters).await? {
            merged
                .entry(doc.id.clone())
                .or_insert_with(|| normalize_request(&doc.id, &doc.data));
        }
    }
    Ok(merged.into_values().collect())
}

pub async fn pending_requests(
    state: &AppState,
    company: &CompanyIdentity,
) -> Result<Vec<Request>, AppError> {
    let docs = state
        .store
        .query(
            Collection::Requests,
            &[Filter::not_in(
                "status",
                [
                    RequestStatus::Confirmed.as_str(),
                    RequestStatus::Denied.as_str(),
                    RequestStatus::Delivered.as_str(),
                ],
            )],
        )
        .await?;

    let mut requests: Vec<Request> = docs
        .iter()
        .map(|doc| normalize_request(&doc.id, &doc.data))
        .filter(|request| is_pending_for(request, company))
        .collect();
    newest_first(&mut requests);
    Ok(requests)
}

pub async fn active_requests(
    state: &AppState,
    company: &CompanyIdentity,
) -> Result<Vec<Request>, AppError> {
    let queries = [
        vec![Filter::is_in(
            "status",
            [
                RequestStatus::Confirmed.as_str(),
                RequestStatus::Delivered.as_str(),
            ],
        )],
        vec![Filter::eq(
            "deliveryStatus",
            RequestDeliveryStatus::DriverAssigned.as_str(),
        )],
        vec![Filter::exists("driverId")],
        vec![Filter::eq("activeForCompany", true)],
    ];

    let mut requests: Vec<Request> = union(state.store.as_ref(), &queries)
        .await?
        .into_iter()
        .filter(|request| is_active_for(request, company))
        .collect();
    newest_first(&mut requests);
    Ok(requests)
}

pub async fn completed_requests(
    state: &AppState,
    company: &CompanyIdentity,
) -> Result<Vec<Request>, AppError> {
    let queries = [
        vec![Filter::is_in("status", ["entregado", "delivered"])],
        vec![Filter::is_in("deliveryStatus", ["entregado", "delivered"])],
    ];

    let mut requests: Vec<Request> = union(state.store.as_ref(), &queries)
        .await?
        .into_iter()
        .filter(|request| is_completed_for(request, company))
        .collect();
    newest_first(&mut requests);
    Ok(requests)
}

pub async fn status_summary(
    state: &AppState,
    company: &CompanyIdentity,
) -> Result<StatusSummary, AppError> {
    Ok(StatusSummary {
        pending: pending_requests(state, company).await?.len(),
        active: active_requests(state, company).await?.len(),
        completed: completed_requests(state, company).await?.len(),
    })
}

/// Name of the company a request is addressed to: the candidate matching
/// `company`, else the first candidate.
pub fn company_label(request: &Request, company: &CompanyIdentity) -> String {
    let describe = |candidate: &CandidateCompany| match candidate {
        CandidateCompany::Id(id) => Some(id.clone()),
        CandidateCompany::Profile(profile) => profile
            .label()
            .map(str::to_string)
            .or_else(|| profile.company_id.clone())
            .or_else(|| profile.id.clone()),
    };

    let matching = request
        .candidate_companies
        .iter()
        .find(|candidate| candidate_matches(candidate, company));
    let label = match matching {
        Some(CandidateCompany::Id(_)) => Some(company.label().to_string()),
        Some(candidate) => describe(candidate),
        None => request.candidate_companies.first().and_then(describe),
    };
    label.unwrap_or_else(|| UNSPECIFIED_COMPANY.to_string())
}

pub async fn request_detail(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
) -> Result<RequestDetail, AppError> {
    let (_, doc) = locate_source(state.store.as_ref(), request_id).await?;
    let request = normalize_request(&doc.id, &doc.data);
    let company_label = company_label(&request, company);
    Ok(RequestDetail {
        request,
        company_label,
    })
}

/// Profile from the `users` collection, `None` when absent.
pub async fn driver_profile(
    store: &dyn DocumentStore,
    driver_id: &str,
) -> StoreResult<Option<DriverProfile>> {
    let Some(doc) = store.get(Collection::Users, driver_id).await? else {
        return Ok(None);
    };
    let placeholder = DriverProfile::placeholder(driver_id);
    Ok(Some(DriverProfile {
        id: driver_id.to_string(),
        name: first_text(&doc.data, &["displayName", "name", "nombre", "nombreCompleto"])
            .unwrap_or(placeholder.name),
        phone: first_text(&doc.data, &["phone", "telefono", "phoneNumber"]).unwrap_or_default(),
        rating: first_number(&doc.data, &["rating", "calificacion"]).unwrap_or(0.0),
        photo: first_text(&doc.data, &["photoURL", "photoUrl", "photo"]).unwrap_or_default(),
    }))
}

/// Profiles of drivers interested in a delivery; unknown drivers get
/// placeholder values.
pub async fn interested_drivers(
    state: &AppState,
    delivery_id: &str,
) -> Result<Vec<DriverProfile>, AppError> {
    let store = state.store.as_ref();
    let (_, delivery) = load_delivery(store, delivery_id).await?;

    let mut profiles = Vec::with_capacity(delivery.interested_drivers.len());
    for driver_id in &delivery.interested_drivers {
        let profile = match driver_profile(store, driver_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => DriverProfile::placeholder(driver_id),
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "driver lookup failed");
                DriverProfile::placeholder(driver_id)
            }
        };
        profiles.push(profile);
    }
    Ok(profiles)
}

/// Drivers of the delivery attached to a request.
pub async fn request_drivers(
    state: &AppState,
    request_id: &str,
) -> Result<Vec<DriverProfile>, AppError> {
    let (_, doc) = locate_source(state.store.as_ref(), request_id).await?;
    let request = normalize_request(&doc.id, &doc.data);
    match request.delivery_id {
        Some(delivery_id) => interested_drivers(state, &delivery_id).await,
        None => Ok(Vec::new()),
    }
}

/// Published deliveries still waiting for a driver. With an origin, each
/// carries its distance; with a radius, farther or unlocated deliveries
/// are dropped.
pub async fn available_deliveries(
    state: &AppState,
    origin: Option<GeoPoint>,
    max_km: Option<f64>,
) -> Result<Vec<AvailableDelivery>, AppError> {
    let docs = state
        .store
        .query(
            Collection::Deliveries,
            &[
                Filter::eq("status", DeliveryStatus::PendingDriver.as_str()),
                Filter::eq("publication", PublicationState::Published.as_str()),
            ],
        )
        .await?;

    let mut available: Vec<AvailableDelivery> = Vec::with_capacity(docs.len());
    for doc in &docs {
        let delivery = match Delivery::from_document(doc) {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(delivery_id = %doc.id, error = %err, "skipping malformed delivery");
                continue;
            }
        };
        let distance_km = match (origin, delivery.delivery_coordinates) {
            (Some(origin), Some(target)) => Some(display_km(&origin, &target)),
            _ => None,
        };
        if let (Some(limit), Some(_)) = (max_km, origin) {
            if !distance_km.is_some_and(|km| km <= limit) {
                continue;
            }
        }
        available.push(AvailableDelivery {
            delivery,
            distance_km,
        });
    }

    if origin.is_some() {
        available.sort_by(|a, b| {
            let a = a.distance_km.unwrap_or(f64::INFINITY);
            let b = b.distance_km.unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });
    } else {
        available.sort_by(|a, b| b.delivery.created_at.cmp(&a.delivery.created_at));
    }
    Ok(available)
}

pub async fn delivery(state: &AppState, delivery_id: &str) -> Result<Delivery, AppError> {
    let (_, delivery) = load_delivery(state.store.as_ref(), delivery_id).await?;
    Ok(delivery)
}

/// Comment thread of a delivery, oldest first.
pub async fn delivery_comments(
    state: &AppState,
    delivery_id: &str,
) -> Result<Vec<Value>, AppError> {
    let store = state.store.as_ref();
    load_delivery(store, delivery_id).await?;
    let entries = store
        .list_sub(Collection::Deliveries, delivery_id, "comments")
        .await?;
    Ok(entries
        .into_iter()
        .map(|doc| {
            let mut data = doc.data;
            data.insert("id".to_string(), Value::String(doc.id));
            Value::Object(data)
        })
        .collect())
}

pub async fn contact_link(state: &AppState, request_id: &str) -> Result<ContactLink, AppError> {
    let (_, doc) = locate_source(state.store.as_ref(), request_id).await?;
    let request = normalize_request(&doc.id, &doc.data);
    let phone = request.phone.as_deref().ok_or_else(|| {
        AppError::Precondition(format!("request {request_id} has no contact phone"))
    })?;
    let url = whatsapp_link(phone, &messages::contact(&request.title)).ok_or_else(|| {
        AppError::Precondition(format!("request {request_id} has an invalid phone"))
    })?;
    Ok(ContactLink { url })
}
