use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::lifecycle::company::{locate_source, with_retries};
use crate::lifecycle::{load_delivery, messages, observe, to_value};
use crate::models::comment::Comment;
use crate::models::delivery::{Bid, Delivery, DeliveryStatus, Pricing};
use crate::models::request::RequestStatus;
use crate::normalize::normalize_request;
use crate::state::AppState;
use crate::store::{Collection, Patch, WriteBatch};

/// Driver details submitted when taking a delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    pub driver_id: String,
    #[serde(default)]
    pub driver_name: String,
    #[serde(default)]
    pub driver_phone: String,
    #[serde(default)]
    pub estimated_delivery_time: Option<String>,
    #[serde(default)]
    pub proposed_fee: Option<f64>,
}

fn require_driver(driver_id: &str) -> Result<(), AppError> {
    if driver_id.trim().is_empty() {
        return Err(AppError::BadRequest("driverId is required".to_string()));
    }
    Ok(())
}

fn require_open(delivery: &Delivery) -> Result<(), AppError> {
    if !delivery.is_open_for_drivers() {
        return Err(AppError::Conflict(format!(
            "delivery {} is no longer available",
            delivery.id
        )));
    }
    Ok(())
}

fn require_holder(delivery: &Delivery, driver_id: &str) -> Result<(), AppError> {
    if delivery.driver_id.as_deref() != Some(driver_id) {
        return Err(AppError::Precondition(format!(
            "delivery {} is not assigned to driver {driver_id}",
            delivery.id
        )));
    }
    Ok(())
}

/// Appends a patch for the delivery's request, wherever it lives. A
/// missing request is logged and skipped; a denied one refuses the batch.
async fn with_request_patch(
    state: &AppState,
    batch: WriteBatch,
    delivery: &Delivery,
    patch: Patch,
) -> Result<WriteBatch, AppError> {
    match locate_source(state.store.as_ref(), &delivery.order_id).await {
        Ok((collection, doc)) => {
            if normalize_request(&doc.id, &doc.data).status == RequestStatus::Denied {
                return Err(AppError::Precondition(format!(
                    "request {} was denied",
                    doc.id
                )));
            }
            Ok(batch.patch_if(collection, &doc.id, doc.version, patch))
        }
        Err(AppError::NotFound(_)) => {
            warn!(
                delivery_id = %delivery.id,
                request_id = %delivery.order_id,
                "delivery references a missing request"
            );
            Ok(batch)
        }
        Err(err) => Err(err),
    }
}

pub async fn register_interest(
    state: &AppState,
    delivery_id: &str,
    driver_id: &str,
) -> Result<Delivery, AppError> {
    observe(state, "register_interest", async {
        require_driver(driver_id)?;
        let _slot = state.in_flight.delivery(delivery_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (doc, delivery) = load_delivery(store, delivery_id).await?;
            require_open(&delivery)?;

            store
                .commit(WriteBatch::new().patch_if(
                    Collection::Deliveries,
                    delivery_id,
                    doc.version,
                    Patch::new()
                        .array_union("interestedDrivers", vec![driver_id.into()])
                        .server_timestamp("updatedAt"),
                ))
                .await?;

            info!(delivery_id, driver_id, "driver interested");
            let (_, updated) = load_delivery(store, delivery_id).await?;
            Ok(updated)
        })
        .await
    })
    .await
}

pub async fn place_bid(
    state: &AppState,
    delivery_id: &str,
    driver_id: &str,
    amount: f64,
) -> Result<Bid, AppError> {
    observe(state, "place_bid", async {
        require_driver(driver_id)?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::BadRequest(
                "bid amount must be a non-negative number".to_string(),
            ));
        }
        let _slot = state.in_flight.delivery(delivery_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (doc, delivery) = load_delivery(store, delivery_id).await?;
            require_open(&delivery)?;
            match &delivery.pricing {
                Pricing::Bidding { min_bid_price, .. } if amount < *min_bid_price => {
                    return Err(AppError::BadRequest(format!(
                        "bid {amount} is below the minimum of {min_bid_price}"
                    )));
                }
                Pricing::Bidding { .. } => {}
                Pricing::Fixed { .. } => {
                    return Err(AppError::Precondition(format!(
                        "delivery {delivery_id} has a fixed price"
                    )));
                }
            }

            let bid = Bid {
                driver_id: driver_id.to_string(),
                amount,
                placed_at: Utc::now(),
            };
            store
                .commit(WriteBatch::new().patch_if(
                    Collection::Deliveries,
                    delivery_id,
                    doc.version,
                    Patch::new()
                        .array_union("pricing.bids", vec![to_value(&bid)?])
                        .array_union("interestedDrivers", vec![driver_id.into()])
                        .server_timestamp("updatedAt"),
                ))
                .await?;

            info!(delivery_id, driver_id, amount, "bid placed");
            Ok(bid)
        })
        .await
    })
    .await
}

/// Driver takes a published delivery. Racing acceptances are decided by
/// the delivery version: exactly one commit lands.
pub async fn accept(
    state: &AppState,
    delivery_id: &str,
    acceptance: &Acceptance,
) -> Result<Delivery, AppError> {
    observe(state, "accept", async {
        require_driver(&acceptance.driver_id)?;
        if acceptance
            .proposed_fee
            .is_some_and(|fee| !fee.is_finite() || fee < 0.0)
        {
            return Err(AppError::BadRequest(
                "proposedFee must be a non-negative number".to_string(),
            ));
        }
        let _slot = state.in_flight.delivery(delivery_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (doc, delivery) = load_delivery(store, delivery_id).await?;
            if delivery.driver_id.as_deref() == Some(acceptance.driver_id.as_str()) {
                return Ok(delivery);
            }
            require_open(&delivery)?;

            let driver_id = acceptance.driver_id.as_str();
            let mut delivery_patch = Patch::new()
                .set("status", DeliveryStatus::DriverAssigned.as_str())
                .set("driverId", driver_id)
                .set("driverName", acceptance.driver_name.clone())
                .set("driverPhone", acceptance.driver_phone.clone())
                .server_timestamp("assignedAt")
                .server_timestamp("updatedAt");
            if let Some(eta) = &acceptance.estimated_delivery_time {
                delivery_patch = delivery_patch.set("estimatedDeliveryTime", eta.clone());
            }
            if let Some(fee) = acceptance.proposed_fee {
                delivery_patch = delivery_patch.set("proposedFee", fee);
            }

            let name = if acceptance.driver_name.is_empty() {
                "Repartidor"
            } else {
                acceptance.driver_name.as_str()
            };
            let comment = Comment::system(messages::driver_assigned(name), driver_id, name);
            let request_patch = Patch::new()
                .set("status", RequestStatus::Confirmed.as_str())
                .set("deliveryStatus", "driverAssigned")
                .set("estadoEmpresa", "en_progreso")
                .set("driverId", driver_id)
                .set("activeForCompany", true)
                .array_union("comments", vec![comment.to_value()])
                .server_timestamp("updatedAt");

            let batch = WriteBatch::new().patch_if(
                Collection::Deliveries,
                delivery_id,
                doc.version,
                delivery_patch,
            );
            let batch = with_request_patch(state, batch, &delivery, request_patch).await?;
            store.commit(batch).await?;

            info!(delivery_id, driver_id, "delivery accepted");
            let (_, updated) = load_delivery(store, delivery_id).await?;
            Ok(updated)
        })
        .await
    })
    .await
}

pub async fn complete(
    state: &AppState,
    delivery_id: &str,
    driver_id: &str,
) -> Result<Delivery, AppError> {
    observe(state, "complete", async {
        require_driver(driver_id)?;
        let _slot = state.in_flight.delivery(delivery_id)?;

        let delivery = with_retries(move || async move {
            let store = state.store.as_ref();
            let (doc, delivery) = load_delivery(store, delivery_id).await?;
            require_holder(&delivery, driver_id)?;
            if delivery.status == DeliveryStatus::Delivered {
                return Ok((delivery, false));
            }

            let comment = Comment::system(messages::DELIVERED, driver_id, "Repartidor");
            let batch = WriteBatch::new().patch_if(
                Collection::Deliveries,
                delivery_id,
                doc.version,
                Patch::new()
                    .set("status", DeliveryStatus::Delivered.as_str())
                    .server_timestamp("deliveredAt")
                    .server_timestamp("updatedAt"),
            );
            let batch = with_request_patch(
                state,
                batch,
                &delivery,
                Patch::new()
                    .set("status", RequestStatus::Delivered.as_str())
                    .set("deliveryStatus", "entregado")
                    .array_union("comments", vec![comment.to_value()])
                    .server_timestamp("updatedAt"),
            )
            .await?;
            store.commit(batch).await?;

            info!(delivery_id, driver_id, "delivery completed");
            let (_, updated) = load_delivery(store, delivery_id).await?;
            Ok((updated, true))
        })
        .await?;

        let (delivery, completed_now) = delivery;
        if completed_now {
            record_driver_stats(state, driver_id, &delivery).await;
        }
        Ok(delivery)
    })
    .await
}

/// Best effort: a driver without a profile document keeps no stats.
async fn record_driver_stats(state: &AppState, driver_id: &str, delivery: &Delivery) {
    let earnings = delivery
        .proposed_fee
        .filter(|fee| *fee > 0.0)
        .or(Some(delivery.delivery_fee).filter(|fee| *fee > 0.0))
        .unwrap_or(0.0);

    match state.store.get(Collection::Users, driver_id).await {
        Ok(Some(_)) => {
            let patch = Patch::new()
                .increment("completedDeliveries", 1.0)
                .increment("totalEarnings", earnings);
            if let Err(err) = state.store.patch(Collection::Users, driver_id, patch).await {
                warn!(driver_id, error = %err, "failed to update driver stats");
            }
        }
        Ok(None) => warn!(driver_id, "driver profile missing, stats not updated"),
        Err(err) => warn!(driver_id, error = %err, "failed to read driver profile"),
    }
}

/// Driver gives the delivery back; it returns to the pool of open
/// deliveries and the request waits for a new driver.
pub async fn cancel_by_driver(
    state: &AppState,
    delivery_id: &str,
    driver_id: &str,
    reason: &str,
) -> Result<Delivery, AppError> {
    observe(state, "cancel_by_driver", async {
        require_driver(driver_id)?;
        let _slot = state.in_flight.delivery(delivery_id)?;

        with_retries(move || async move {
            let store = state.store.as_ref();
            let (doc, delivery) = load_delivery(store, delivery_id).await?;
            require_holder(&delivery, driver_id)?;
            if delivery.status == DeliveryStatus::Delivered {
                return Err(AppError::Precondition(format!(
                    "delivery {delivery_id} was already delivered"
                )));
            }

            let comment = Comment::system(messages::driver_cancelled(reason), driver_id, "Repartidor");
            let batch = WriteBatch::new().patch_if(
                Collection::Deliveries,
                delivery_id,
                doc.version,
                Patch::new()
                    .set("status", DeliveryStatus::PendingDriver.as_str())
                    .delete("driverId")
                    .delete("driverName")
                    .delete("driverPhone")
                    .delete("estimatedDeliveryTime")
                    .delete("proposedFee")
                    .delete("assignedAt")
                    .set("cancelReason", reason)
                    .increment("cancellations", 1.0)
                    .server_timestamp("cancelledAt")
                    .server_timestamp("updatedAt"),
            );
            let batch = with_request_patch(
                state,
                batch,
                &delivery,
                Patch::new()
                    .set("deliveryStatus", "pendingDriver")
                    .set("estadoEmpresa", "en_espera")
                    .delete("driverId")
                    .set("activeForCompany", false)
                    .array_union("comments", vec![comment.to_value()])
                    .server_timestamp("updatedAt"),
            )
            .await?;
            store.commit(batch).await?;

            info!(delivery_id, driver_id, reason, "driver cancelled delivery");
            let (_, updated) = load_delivery(store, delivery_id).await?;
            Ok(updated)
        })
        .await
    })
    .await
}
