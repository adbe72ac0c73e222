//! Order lifecycle: company-side transitions, driver-side transitions and
//! the filtered views both sides read.

pub mod account;
pub mod company;
pub mod driver;
pub mod inflight;
pub mod pricing;
pub mod views;

use std::future::Future;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;
use crate::models::delivery::{Delivery, Pricing};
use crate::normalize::format_amount;
use crate::state::AppState;
use crate::store::{Collection, Document, DocumentStore};

/// Attempts for the optimistic read-validate-commit loops.
pub const MAX_ATTEMPTS: usize = 3;

pub async fn load(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
) -> Result<Document, AppError> {
    store
        .get(collection, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {id} not found", collection.name())))
}

pub async fn load_delivery(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<(Document, Delivery), AppError> {
    let doc = load(store, Collection::Deliveries, id).await?;
    let delivery = Delivery::from_document(&doc)?;
    Ok((doc, delivery))
}

/// Records outcome and latency of one lifecycle operation.
pub async fn observe<T, F>(state: &AppState, operation: &'static str, work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let start = Instant::now();
    let result = work.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(err) => err.kind(),
    };
    state
        .metrics
        .record(operation, outcome, start.elapsed().as_secs_f64());
    if let Err(err) = &result {
        warn!(operation, error = %err, "lifecycle operation failed");
    }
    result
}

pub fn to_value<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::Internal(format!("failed to serialize value: {err}")))
}

pub(crate) mod messages {
    use super::*;

    pub fn confirmed(company: &str) -> String {
        format!(
            "¡Buenas noticias! Su solicitud ha sido aprobada por {company} y el viaje ya ha sido \
             publicado automáticamente. Los repartidores disponibles pueden verlo ahora mismo. \
             Le notificaremos cuando un repartidor acepte el pedido."
        )
    }

    pub fn published(pricing: &Pricing) -> String {
        let detail = match pricing {
            Pricing::Bidding { min_bid_price, .. } => format!(
                "Los repartidores pueden enviar sus ofertas (precio mínimo: ${}).",
                format_amount(*min_bid_price)
            ),
            Pricing::Fixed { fixed_price } => format!(
                "El precio fijado para la entrega es de ${}.",
                format_amount(*fixed_price)
            ),
        };
        format!("El viaje ha sido publicado para todos los repartidores disponibles. {detail}")
    }

    pub fn published_thread(pricing: &Pricing) -> String {
        match pricing {
            Pricing::Bidding { min_bid_price, .. } => format!(
                "Viaje publicado para repartidores disponibles con sistema de pujas (mínimo: ${})",
                format_amount(*min_bid_price)
            ),
            Pricing::Fixed { fixed_price } => format!(
                "Viaje publicado para repartidores disponibles con precio fijo de ${}",
                format_amount(*fixed_price)
            ),
        }
    }

    pub const UNPUBLISHED: &str =
        "El viaje ha sido despublicado y ya no está disponible para los repartidores.";
    pub const UNPUBLISHED_THREAD: &str = "Viaje despublicado por la empresa";
    pub const DENIED: &str = "La empresa ha rechazado la solicitud.";
    pub const DELIVERED: &str = "Su pedido ha sido entregado con éxito.";

    pub fn driver_assigned(driver_name: &str) -> String {
        format!(
            "Se ha asignado un repartidor para su pedido: {driver_name}. Puede seguir el estado \
             de su entrega en tiempo real."
        )
    }

    pub fn driver_cancelled(reason: &str) -> String {
        format!("El repartidor canceló la entrega. Motivo: {reason}. El viaje vuelve a estar disponible.")
    }

    pub fn contact(title: &str) -> String {
        format!("Hola, le escribimos sobre su solicitud \"{title}\".")
    }
}
