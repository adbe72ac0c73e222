use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::lifecycle::pricing::PricingOptions;
use crate::lifecycle::views::{driver_profile, may_act_on};
use crate::lifecycle::{MAX_ATTEMPTS, load, load_delivery, messages, observe, to_value};
use crate::models::comment::Comment;
use crate::models::company::CompanyIdentity;
use crate::models::delivery::{Delivery, DeliveryStatus, Pricing, PublicationState};
use crate::models::request::{Request, RequestStatus};
use crate::normalize::normalize_request;
use crate::state::AppState;
use crate::store::{Collection, Document, DocumentStore, Filter, Patch, WriteBatch, new_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub delivery_id: String,
    /// False when an existing delivery was returned.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub delivery_id: String,
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub delivery_id: String,
    pub driver_id: String,
    pub driver_name: Option<String>,
    /// False when the driver already held the delivery.
    pub changed: bool,
}

/// Finds the request document in `solicitud`, then in the legacy
/// `cotizaciones` collection.
pub async fn locate_source(
    store: &dyn DocumentStore,
    request_id: &str,
) -> Result<(Collection, Document), AppError> {
    for collection in [Collection::Requests, Collection::Quotes] {
        if let Some(doc) = store.get(collection, request_id).await? {
            return Ok((collection, doc));
        }
    }
    Err(AppError::NotFound(format!("request {request_id} not found")))
}

/// Retries `attempt` while its commit loses to a concurrent write, up to
/// [`MAX_ATTEMPTS`] times. Each attempt re-reads what it validates.
pub(crate) async fn with_retries<T, F, Fut>(mut attempt: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(AppError::StaleWrite(msg)) if tries < MAX_ATTEMPTS => {
                debug!(attempt = tries, reason = %msg, "write conflict, retrying");
            }
            other => return other,
        }
    }
}

/// The company must be addressed by the request and must not be acting on
/// one another company already took.
fn require_owner(request: &Request, company: &CompanyIdentity) -> Result<(), AppError> {
    if !may_act_on(request, company) {
        return Err(AppError::Forbidden(format!(
            "request {} does not belong to company {}",
            request.id, company.id
        )));
    }
    Ok(())
}

fn require_live(request: &Request, action: &str) -> Result<(), AppError> {
    if request.is_terminal() {
        return Err(AppError::Precondition(format!(
            "request {} is {} and cannot be {action}",
            request.id,
            request.status.as_str()
        )));
    }
    Ok(())
}

fn require_reopenable(delivery: &Delivery) -> Result<(), AppError> {
    if matches!(
        delivery.status,
        DeliveryStatus::Cancelled | DeliveryStatus::Delivered
    ) {
        return Err(AppError::Precondition(format!(
            "delivery {} is {}",
            delivery.id,
            delivery.status.as_str()
        )));
    }
    Ok(())
}

fn new_delivery(company: &CompanyIdentity, request: &Request, pricing: Pricing) -> Delivery {
    let now = Utc::now();
    let client_id = request
        .requester_id
        .clone()
        .unwrap_or_else(|| "cliente".to_string());
    let client_name = request
        .requester_name
        .clone()
        .or_else(|| request.requester_id.clone())
        .unwrap_or_else(|| "Cliente".to_string());

    Delivery {
        id: String::new(),
        order_id: request.id.clone(),
        company_id: company.id.clone(),
        company_name: company.label().to_string(),
        client_id,
        client_name,
        items: request.items.clone(),
        total_amount: request.total_amount.unwrap_or(0.0),
        delivery_fee: request.delivery_fee,
        status: DeliveryStatus::PendingDriver,
        publication: PublicationState::Published,
        pricing,
        interested_drivers: Vec::new(),
        driver_id: None,
        driver_name: None,
        driver_phone: None,
        estimated_delivery_time: None,
        proposed_fee: None,
        delivery_coordinates: request.coordinates,
        delivery_address: request.delivery_address.clone(),
        cancellations: 0,
        cancel_reason: None,
        created_at: now,
        updated_at: Some(now),
        published_at: Some(now),
        unpublished_at: None,
        assigned_at: None,
        delivered_at: None,
        cancelled_at: None,
    }
}

/// One read-validate-commit pass of confirmation against an already read
/// request document.
async fn confirm_once(
    state: &AppState,
    company: &CompanyIdentity,
    collection: Collection,
    doc: &Document,
    pricing: Option<Pricing>,
) -> Result<ConfirmOutcome, AppError> {
    let store = state.store.as_ref();
    let request = normalize_request(&doc.id, &doc.data);
    require_owner(&request, company)?;
    if request.status == RequestStatus::Denied {
        return Err(AppError::Precondition(format!(
            "request {} was denied and cannot be confirmed",
            doc.id
        )));
    }

    if let Some(delivery_id) = request.delivery_id.clone() {
        debug!(request_id = %doc.id, %delivery_id, "request already has a delivery");
        return Ok(ConfirmOutcome {
            delivery_id,
            created: false,
        });
    }

    let existing = store
        .query(
            Collection::Deliveries,
            &[Filter::eq("orderId", doc.id.clone())],
        )
        .await?;
    if let Some(found) = existing.first() {
        warn!(
            request_id = %doc.id,
            delivery_id = %found.id,
            "request lost its delivery reference, relinking"
        );
        store
            .commit(WriteBatch::new().patch_if(
                collection,
                &doc.id,
                doc.version,
                Patch::new()
                    .set("deliveryId", found.id.clone())
                    .server_timestamp("updatedAt"),
            ))
            .await?;
        return Ok(ConfirmOutcome {
            delivery_id: found.id.clone(),
            created: false,
        });
    }

    require_live(&request, "confirmed")?;

    let pricing = pricing.unwrap_or_else(|| state.pricing.default_pricing(request.total_amount));
    let delivery = new_delivery(company, &request, pricing.clone());
    let delivery_id = new_id();
    let comment = Comment::system(messages::confirmed(company.label()), &company.id, company.label());

    let request_patch = Patch::new()
        .set("status", RequestStatus::Confirmed.as_str())
        .set("estadoEmpresa", "en_espera")
        .set("deliveryStatus", "pendingDriver")
        .set("deliveryId", delivery_id.clone())
        .set("publication", PublicationState::Published.as_str())
        .set("pricing", to_value(&pricing)?)
        .set("companyId", company.id.clone())
        .set("companyName", company.label())
        .array_union("comments", vec![comment.to_value()])
        .server_timestamp("updatedAt");

    store
        .commit(
            WriteBatch::new()
                .create(Collection::Deliveries, &delivery_id, delivery.to_fields()?)
                .patch_if(collection, &doc.id, doc.version, request_patch),
        )
        .await?;

    info!(
        request_id = %doc.id,
        %delivery_id,
        company_id = %company.id,
        "request confirmed and delivery published"
    );

    Ok(ConfirmOutcome {
        delivery_id,
        created: true,
    })
}

/// Confirms a request and publishes its delivery with the default fixed
/// fee. Idempotent: a request that already has a delivery gets it back.
pub async fn confirm(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
) -> Result<ConfirmOutcome, AppError> {
    observe(state, "confirm", async {
        let _slot = state.in_flight.request(request_id)?;
        with_retries(move || async move {
            let (collection, doc) = locate_source(state.store.as_ref(), request_id).await?;
            confirm_once(state, company, collection, &doc, None).await
        })
        .await
    })
    .await
}

async fn publish_once(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
    delivery_id: Option<&str>,
    options: Option<&PricingOptions>,
) -> Result<PublishOutcome, AppError> {
    let store = state.store.as_ref();
    let (collection, mut doc) = locate_source(store, request_id).await?;
    let request = normalize_request(&doc.id, &doc.data);
    require_owner(&request, company)?;
    require_live(&request, "published")?;

    let delivery_id = match delivery_id
        .map(str::to_string)
        .or_else(|| request.delivery_id.clone())
    {
        Some(id) => id,
        None => {
            let fallback = state.pricing.default_pricing(request.total_amount);
            let pricing = match options {
                Some(options) => options.resolve(None, fallback)?,
                None => fallback,
            };
            let created = confirm_once(state, company, collection, &doc, Some(pricing)).await?;
            doc = load(store, collection, request_id).await?;
            created.delivery_id
        }
    };

    let (delivery_doc, delivery) = load_delivery(store, &delivery_id).await?;
    if delivery.order_id != request_id {
        return Err(AppError::Precondition(format!(
            "delivery {delivery_id} does not belong to request {request_id}"
        )));
    }
    require_reopenable(&delivery)?;
    if delivery.driver_id.is_some()
        || matches!(
            delivery.status,
            DeliveryStatus::DriverAssigned | DeliveryStatus::InTransit
        )
    {
        return Err(AppError::Precondition(format!(
            "delivery {delivery_id} already has a driver"
        )));
    }

    let fallback = state.pricing.default_pricing(Some(delivery.total_amount));
    let pricing = match options {
        Some(options) => options.resolve(Some(&delivery.pricing), fallback)?,
        None => delivery.pricing.clone(),
    };
    let pricing_value = to_value(&pricing)?;
    let comment = Comment::system(messages::published(&pricing), &company.id, "Sistema");
    let thread = Comment::system(messages::published_thread(&pricing), &company.id, company.label());

    let batch = WriteBatch::new()
        .patch_if(
            Collection::Deliveries,
            &delivery_id,
            delivery_doc.version,
            Patch::new()
                .set("status", DeliveryStatus::PendingDriver.as_str())
                .set("publication", PublicationState::Published.as_str())
                .set("pricing", pricing_value.clone())
                .server_timestamp("publishedAt")
                .server_timestamp("updatedAt"),
        )
        .patch_if(
            collection,
            request_id,
            doc.version,
            Patch::new()
                .set("deliveryId", delivery_id.clone())
                .set("deliveryStatus", "pendingDriver")
                .set("publication", PublicationState::Published.as_str())
                .set("pricing", pricing_value)
                .array_union("comments", vec![comment.to_value()])
                .server_timestamp("updatedAt"),
        )
        .append(
            Collection::Deliveries,
            &delivery_id,
            "comments",
            thread.to_thread_entry(),
        );
    store.commit(batch).await?;

    info!(
        request_id,
        %delivery_id,
        bidding = pricing.is_bidding(),
        "delivery published"
    );

    Ok(PublishOutcome {
        delivery_id,
        pricing,
    })
}

/// Publishes the request's delivery, creating it first when the request
/// has none.
pub async fn publish(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
    delivery_id: Option<&str>,
    options: Option<&PricingOptions>,
) -> Result<PublishOutcome, AppError> {
    observe(state, "publish", async {
        let _slot = state.in_flight.request(request_id)?;
        with_retries(move || publish_once(state, company, request_id, delivery_id, options)).await
    })
    .await
}

pub async fn unpublish(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
    delivery_id: Option<&str>,
) -> Result<(), AppError> {
    observe(state, "unpublish", async {
        let delivery_id = delivery_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            AppError::Precondition(format!(
                "request {request_id} has no delivery id to unpublish"
            ))
        })?;
        let _slot = state.in_flight.request(request_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (collection, doc) = locate_source(store, request_id).await?;
            let request = normalize_request(&doc.id, &doc.data);
            require_owner(&request, company)?;
            require_live(&request, "unpublished")?;
            let (delivery_doc, delivery) = load_delivery(store, delivery_id).await?;
            if delivery.order_id != request_id {
                return Err(AppError::Precondition(format!(
                    "delivery {delivery_id} does not belong to request {request_id}"
                )));
            }
            require_reopenable(&delivery)?;
            if delivery.driver_id.is_some() {
                return Err(AppError::Precondition(format!(
                    "delivery {delivery_id} already has a driver"
                )));
            }

            let comment = Comment::system(messages::UNPUBLISHED, &company.id, company.label());
            let thread =
                Comment::system(messages::UNPUBLISHED_THREAD, &company.id, company.label());

            store
                .commit(
                    WriteBatch::new()
                        .patch_if(
                            Collection::Deliveries,
                            delivery_id,
                            delivery_doc.version,
                            Patch::new()
                                .set("publication", PublicationState::Unpublished.as_str())
                                .server_timestamp("unpublishedAt")
                                .server_timestamp("updatedAt"),
                        )
                        .patch_if(
                            collection,
                            request_id,
                            doc.version,
                            Patch::new()
                                .set("publication", PublicationState::Unpublished.as_str())
                                .array_union("comments", vec![comment.to_value()])
                                .server_timestamp("updatedAt"),
                        )
                        .append(
                            Collection::Deliveries,
                            delivery_id,
                            "comments",
                            thread.to_thread_entry(),
                        ),
                )
                .await?;

            info!(request_id, delivery_id, "delivery unpublished");
            Ok(())
        })
        .await
    })
    .await
}

/// Hands the delivery to a driver chosen by the company.
pub async fn assign_driver(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
    driver_id: &str,
    delivery_id: &str,
) -> Result<AssignOutcome, AppError> {
    observe(state, "assign_driver", async {
        if driver_id.is_empty() {
            return Err(AppError::BadRequest("driverId is required".to_string()));
        }
        let _slot = state.in_flight.request(request_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (collection, doc) = locate_source(store, request_id).await?;
            let request = normalize_request(&doc.id, &doc.data);
            require_owner(&request, company)?;
            require_live(&request, "assigned")?;
            let (delivery_doc, delivery) = load_delivery(store, delivery_id).await?;

            if delivery.order_id != request_id {
                return Err(AppError::Precondition(format!(
                    "delivery {delivery_id} does not belong to request {request_id}"
                )));
            }
            match delivery.driver_id.as_deref() {
                Some(current) if current != driver_id => {
                    return Err(AppError::Conflict(format!(
                        "delivery {delivery_id} is already assigned to another driver"
                    )));
                }
                Some(_) => {
                    return Ok(AssignOutcome {
                        delivery_id: delivery_id.to_string(),
                        driver_id: driver_id.to_string(),
                        driver_name: delivery.driver_name.clone(),
                        changed: false,
                    });
                }
                None => {}
            }
            require_reopenable(&delivery)?;

            let profile = match driver_profile(store, driver_id).await {
                Ok(Some(profile)) => Some(profile),
                Ok(None) => {
                    warn!(driver_id, "driver profile not found, skipping assignment comment");
                    None
                }
                Err(err) => {
                    warn!(driver_id, error = %err, "driver lookup failed, skipping assignment comment");
                    None
                }
            };

            let mut delivery_patch = Patch::new()
                .set("status", DeliveryStatus::DriverAssigned.as_str())
                .set("driverId", driver_id)
                .server_timestamp("assignedAt")
                .server_timestamp("updatedAt");
            let mut request_patch = Patch::new()
                .set("deliveryStatus", "driverAssigned")
                .set("status", RequestStatus::Confirmed.as_str())
                .set("estadoEmpresa", "en_progreso")
                .set("driverId", driver_id)
                .set("activeForCompany", true)
                .server_timestamp("updatedAt");
            if let Some(profile) = &profile {
                delivery_patch = delivery_patch
                    .set("driverName", profile.name.clone())
                    .set("driverPhone", profile.phone.clone());
                let comment = Comment::system(
                    messages::driver_assigned(&profile.name),
                    &company.id,
                    company.label(),
                );
                request_patch = request_patch.array_union("comments", vec![comment.to_value()]);
            }

            store
                .commit(
                    WriteBatch::new()
                        .patch_if(
                            Collection::Deliveries,
                            delivery_id,
                            delivery_doc.version,
                            delivery_patch,
                        )
                        .patch_if(collection, request_id, doc.version, request_patch),
                )
                .await?;

            info!(request_id, delivery_id, driver_id, "driver assigned");
            Ok(AssignOutcome {
                delivery_id: delivery_id.to_string(),
                driver_id: driver_id.to_string(),
                driver_name: profile.map(|p| p.name),
                changed: true,
            })
        })
        .await
    })
    .await
}

/// Rejects a request. A confirmed but unassigned delivery is withdrawn in
/// the same batch.
pub async fn deny(
    state: &AppState,
    company: &CompanyIdentity,
    request_id: &str,
) -> Result<(), AppError> {
    observe(state, "deny", async {
        let _slot = state.in_flight.request(request_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (collection, doc) = locate_source(store, request_id).await?;
            let request = normalize_request(&doc.id, &doc.data);
            require_owner(&request, company)?;

            if request.status == RequestStatus::Denied {
                return Ok(());
            }
            if request.has_driver() {
                return Err(AppError::Precondition(format!(
                    "request {request_id} already has a driver assigned"
                )));
            }
            if request.is_terminal() {
                return Err(AppError::Precondition(format!(
                    "request {request_id} was already delivered"
                )));
            }

            let comment = Comment::system(messages::DENIED, &company.id, company.label());
            let mut batch = WriteBatch::new().patch_if(
                collection,
                request_id,
                doc.version,
                Patch::new()
                    .set("status", RequestStatus::Denied.as_str())
                    .array_union("comments", vec![comment.to_value()])
                    .server_timestamp("updatedAt"),
            );
            if let Some(delivery_id) = &request.delivery_id {
                if let Some(delivery_doc) = store.get(Collection::Deliveries, delivery_id).await? {
                    batch = batch.patch_if(
                        Collection::Deliveries,
                        delivery_id,
                        delivery_doc.version,
                        Patch::new()
                            .set("status", DeliveryStatus::Cancelled.as_str())
                            .set("publication", PublicationState::Unpublished.as_str())
                            .server_timestamp("cancelledAt")
                            .server_timestamp("updatedAt"),
                    );
                }
            }
            store.commit(batch).await?;

            info!(request_id, company_id = %company.id, "request denied");
            Ok(())
        })
        .await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::pricing::PricingDefaults;
    use crate::lifecycle::views::{active_requests, pending_requests};
    use crate::state::test_support::{company, seed, test_state};
    use serde_json::{Value, json};

    async fn seed_request(state: &AppState, id: &str, extra: Value) {
        let mut body = json!({
            "title": "Tornillos",
            "status": "pendiente",
            "userId": "client-1",
            "clientName": "Laura",
            "selectedCompanies": ["co-1"],
            "createdAt": "2024-05-01T10:00:00Z"
        });
        if let (Some(base), Value::Object(extra)) = (body.as_object_mut(), extra) {
            base.extend(extra);
        }
        seed(state, Collection::Requests, id, body).await;
    }

    async fn delivery_count(state: &AppState, request_id: &str) -> usize {
        state
            .store
            .query(
                Collection::Deliveries,
                &[Filter::eq("orderId", request_id)],
            )
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn confirm_twice_returns_the_same_delivery() {
        let state = test_state();
        seed_request(&state, "r1", json!({ "totalAmount": 200000 })).await;

        let first = confirm(&state, &company(), "r1").await.unwrap();
        let second = confirm(&state, &company(), "r1").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.delivery_id, second.delivery_id);
        assert_eq!(delivery_count(&state, "r1").await, 1);

        let (_, delivery) = load_delivery(state.store.as_ref(), &first.delivery_id)
            .await
            .unwrap();
        assert_eq!(delivery.pricing, Pricing::Fixed { fixed_price: 20000.0 });
        assert_eq!(delivery.publication, PublicationState::Published);
        assert_eq!(delivery.status, DeliveryStatus::PendingDriver);
    }

    #[tokio::test]
    async fn zero_total_uses_fallback_fee() {
        let state = test_state();
        seed_request(&state, "r1", json!({ "totalAmount": 0 })).await;

        let outcome = confirm(&state, &company(), "r1").await.unwrap();
        let (_, delivery) = load_delivery(state.store.as_ref(), &outcome.delivery_id)
            .await
            .unwrap();
        assert_eq!(
            delivery.pricing,
            Pricing::Fixed {
                fixed_price: PricingDefaults::default().fallback_fee
            }
        );
        assert_eq!(delivery.delivery_coordinates, None);
    }

    #[tokio::test]
    async fn confirm_relinks_an_orphaned_delivery() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        seed(
            &state,
            Collection::Deliveries,
            "d-orphan",
            json!({
                "orderId": "r1",
                "companyId": "co-1",
                "companyName": "Acme",
                "clientId": "client-1",
                "clientName": "Laura",
                "totalAmount": 0,
                "pricing": { "mode": "fixed", "fixedPrice": 5000 },
                "createdAt": "2024-05-01T10:00:00Z"
            }),
        )
        .await;

        let outcome = confirm(&state, &company(), "r1").await.unwrap();
        assert_eq!(outcome.delivery_id, "d-orphan");
        assert!(!outcome.created);

        let doc = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(doc.data["deliveryId"], "d-orphan");
    }

    #[tokio::test]
    async fn denied_request_cannot_be_confirmed() {
        let state = test_state();
        seed_request(&state, "r1", json!({ "status": "denegado" })).await;

        let result = confirm(&state, &company(), "r1").await;
        assert!(matches!(result, Err(AppError::Precondition(_))));
        assert_eq!(delivery_count(&state, "r1").await, 0);
    }

    #[tokio::test]
    async fn confirm_of_missing_request_is_not_found() {
        let state = test_state();
        let result = confirm(&state, &company(), "ghost").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn busy_request_is_rejected_without_writes() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        seed_request(&state, "r2", json!({})).await;

        let slot = state.in_flight.request("r1").unwrap();
        let result = confirm(&state, &company(), "r1").await;
        assert!(matches!(result, Err(AppError::Busy(_))));
        assert_eq!(delivery_count(&state, "r1").await, 0);

        assert!(confirm(&state, &company(), "r2").await.is_ok());
        drop(slot);
        assert!(confirm(&state, &company(), "r1").await.is_ok());
    }

    #[tokio::test]
    async fn publish_without_delivery_creates_it_from_a_legacy_quote() {
        let state = test_state();
        seed(
            &state,
            Collection::Quotes,
            "q1",
            json!({
                "title": "Cotización",
                "status": "pendiente",
                "amount": 1000,
                "selectedCompanies": ["co-1"]
            }),
        )
        .await;

        let options = PricingOptions {
            bid_enabled: true,
            fixed_price: None,
            min_bid_price: Some(250.0),
        };
        let outcome = publish(&state, &company(), "q1", None, Some(&options))
            .await
            .unwrap();

        assert_eq!(delivery_count(&state, "q1").await, 1);
        assert_eq!(
            outcome.pricing,
            Pricing::Bidding { min_bid_price: 250.0, bids: vec![] }
        );
        let thread = state
            .store
            .list_sub(Collection::Deliveries, &outcome.delivery_id, "comments")
            .await
            .unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].data["type"], "system");
    }

    #[tokio::test]
    async fn switching_pricing_leaves_no_stale_fields() {
        let state = test_state();
        seed_request(&state, "r1", json!({ "totalAmount": 1000 })).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        let bidding = PricingOptions {
            bid_enabled: true,
            fixed_price: None,
            min_bid_price: Some(50.0),
        };
        publish(&state, &company(), "r1", Some(&confirmed.delivery_id), Some(&bidding))
            .await
            .unwrap();
        let doc = load(state.store.as_ref(), Collection::Deliveries, &confirmed.delivery_id)
            .await
            .unwrap();
        assert!(doc.field("pricing.fixedPrice").is_none());
        assert_eq!(doc.field("pricing.minBidPrice"), Some(&json!(50.0)));

        let fixed = PricingOptions {
            bid_enabled: false,
            fixed_price: Some(700.0),
            min_bid_price: None,
        };
        publish(&state, &company(), "r1", Some(&confirmed.delivery_id), Some(&fixed))
            .await
            .unwrap();
        let doc = load(state.store.as_ref(), Collection::Deliveries, &confirmed.delivery_id)
            .await
            .unwrap();
        assert!(doc.field("pricing.minBidPrice").is_none());
        assert!(doc.field("pricing.bids").is_none());
        assert_eq!(doc.field("pricing.fixedPrice"), Some(&json!(700.0)));
    }

    #[tokio::test]
    async fn unpublish_without_delivery_id_writes_nothing() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let before = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();

        let result = unpublish(&state, &company(), "r1", None).await;
        assert!(matches!(result, Err(AppError::Precondition(_))));

        let after = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unpublish_hides_delivery_and_comments_both_sides() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        unpublish(&state, &company(), "r1", Some(&confirmed.delivery_id))
            .await
            .unwrap();

        let (_, delivery) = load_delivery(state.store.as_ref(), &confirmed.delivery_id)
            .await
            .unwrap();
        assert_eq!(delivery.publication, PublicationState::Unpublished);
        assert!(!delivery.is_open_for_drivers());

        let request = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(request.data["publication"], "unpublished");
        assert_eq!(request.data["comments"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn assignment_moves_request_from_pending_to_active() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        seed(
            &state,
            Collection::Users,
            "drv-1",
            json!({ "displayName": "Carlos", "phone": "300" }),
        )
        .await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        let outcome = assign_driver(&state, &company(), "r1", "drv-1", &confirmed.delivery_id)
            .await
            .unwrap();
        assert_eq!(outcome.driver_name.as_deref(), Some("Carlos"));

        let pending = pending_requests(&state, &company()).await.unwrap();
        assert!(pending.iter().all(|r| r.id != "r1"));
        let active = active_requests(&state, &company()).await.unwrap();
        assert_eq!(active.iter().filter(|r| r.id == "r1").count(), 1);
    }

    #[tokio::test]
    async fn second_driver_cannot_take_an_assigned_delivery() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        assign_driver(&state, &company(), "r1", "drv-1", &confirmed.delivery_id)
            .await
            .unwrap();
        let again = assign_driver(&state, &company(), "r1", "drv-1", &confirmed.delivery_id)
            .await
            .unwrap();
        assert!(!again.changed);

        let other = assign_driver(&state, &company(), "r1", "drv-2", &confirmed.delivery_id).await;
        assert!(matches!(other, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn missing_driver_profile_skips_the_comment() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        let outcome = assign_driver(&state, &company(), "r1", "ghost", &confirmed.delivery_id)
            .await
            .unwrap();
        assert!(outcome.driver_name.is_none());

        let request = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(request.data["comments"].as_array().map(Vec::len), Some(1));
        assert_eq!(request.data["deliveryStatus"], "driverAssigned");
    }

    #[tokio::test]
    async fn denied_request_leaves_both_views() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;

        deny(&state, &company(), "r1").await.unwrap();

        let pending = pending_requests(&state, &company()).await.unwrap();
        let active = active_requests(&state, &company()).await.unwrap();
        assert!(pending.iter().all(|r| r.id != "r1"));
        assert!(active.iter().all(|r| r.id != "r1"));
    }

    #[tokio::test]
    async fn deny_after_assignment_is_rejected() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();
        assign_driver(&state, &company(), "r1", "drv-1", &confirmed.delivery_id)
            .await
            .unwrap();

        let result = deny(&state, &company(), "r1").await;
        assert!(matches!(result, Err(AppError::Precondition(_))));
    }

    #[tokio::test]
    async fn denied_request_stays_closed_to_every_transition() {
        let state = test_state();
        seed_request(&state, "r1", json!({ "totalAmount": 1000 })).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();
        deny(&state, &company(), "r1").await.unwrap();
        let before = load(state.store.as_ref(), Collection::Deliveries, &confirmed.delivery_id)
            .await
            .unwrap();

        let republished = publish(&state, &company(), "r1", None, None).await;
        assert!(matches!(republished, Err(AppError::Precondition(_))));
        let explicit =
            publish(&state, &company(), "r1", Some(&confirmed.delivery_id), None).await;
        assert!(matches!(explicit, Err(AppError::Precondition(_))));
        let reconfirmed = confirm(&state, &company(), "r1").await;
        assert!(matches!(reconfirmed, Err(AppError::Precondition(_))));
        let hidden = unpublish(&state, &company(), "r1", Some(&confirmed.delivery_id)).await;
        assert!(matches!(hidden, Err(AppError::Precondition(_))));
        let assigned =
            assign_driver(&state, &company(), "r1", "drv-1", &confirmed.delivery_id).await;
        assert!(matches!(assigned, Err(AppError::Precondition(_))));

        let after = load(state.store.as_ref(), Collection::Deliveries, &confirmed.delivery_id)
            .await
            .unwrap();
        assert_eq!(before.version, after.version);
        let (_, delivery) = load_delivery(state.store.as_ref(), &confirmed.delivery_id)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Cancelled);
        assert!(!delivery.is_open_for_drivers());

        let request = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(request.data["status"], "denegado");
    }

    #[tokio::test]
    async fn other_companies_cannot_change_a_request() {
        let state = test_state();
        let rival = CompanyIdentity::new("co-2").with_name("Otra");
        seed_request(&state, "r1", json!({})).await;

        let confirmed = confirm(&state, &rival, "r1").await;
        assert!(matches!(confirmed, Err(AppError::Forbidden(_))));
        assert_eq!(delivery_count(&state, "r1").await, 0);
        let published = publish(&state, &rival, "r1", None, None).await;
        assert!(matches!(published, Err(AppError::Forbidden(_))));
        assert_eq!(delivery_count(&state, "r1").await, 0);

        let mine = confirm(&state, &company(), "r1").await.unwrap();
        let delivery_id = mine.delivery_id.as_str();

        let again = confirm(&state, &rival, "r1").await;
        assert!(matches!(again, Err(AppError::Forbidden(_))));
        let hidden = unpublish(&state, &rival, "r1", Some(delivery_id)).await;
        assert!(matches!(hidden, Err(AppError::Forbidden(_))));
        let assigned = assign_driver(&state, &rival, "r1", "drv-1", delivery_id).await;
        assert!(matches!(assigned, Err(AppError::Forbidden(_))));
        let denied = deny(&state, &rival, "r1").await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let (_, delivery) = load_delivery(state.store.as_ref(), delivery_id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::PendingDriver);
        assert!(delivery.is_open_for_drivers());
        assert!(delivery.driver_id.is_none());
    }

    #[tokio::test]
    async fn shared_request_belongs_to_the_first_confirming_company() {
        let state = test_state();
        let rival = CompanyIdentity::new("co-2").with_name("Otra");
        seed_request(&state, "r1", json!({ "selectedCompanies": ["co-1", "co-2"] })).await;

        confirm(&state, &company(), "r1").await.unwrap();

        let denied = deny(&state, &rival, "r1").await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));
        let request = load(state.store.as_ref(), Collection::Requests, "r1").await.unwrap();
        assert_eq!(request.data["status"], "confirmado");
    }

    #[tokio::test]
    async fn unpublish_rejects_a_delivery_of_another_request() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        seed_request(&state, "r2", json!({})).await;
        let other = confirm(&state, &company(), "r2").await.unwrap();

        let result = unpublish(&state, &company(), "r1", Some(&other.delivery_id)).await;
        assert!(matches!(result, Err(AppError::Precondition(_))));
        let (_, delivery) = load_delivery(state.store.as_ref(), &other.delivery_id)
            .await
            .unwrap();
        assert_eq!(delivery.publication, PublicationState::Published);
    }

    #[tokio::test]
    async fn refusals_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), AppError> = with_retries(|| {
            calls += 1;
            async { Err(AppError::Conflict("already taken".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let result: Result<(), AppError> = with_retries(|| {
            calls += 1;
            async { Err(AppError::StaleWrite("version moved".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::StaleWrite(_))));
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn deny_withdraws_a_published_delivery() {
        let state = test_state();
        seed_request(&state, "r1", json!({})).await;
        let confirmed = confirm(&state, &company(), "r1").await.unwrap();

        deny(&state, &company(), "r1").await.unwrap();

        let (_, delivery) = load_delivery(state.store.as_ref(), &confirmed.delivery_id)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Cancelled);
        assert!(!delivery.is_open_for_drivers());
    }
}
