use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::request::LineItem;
use crate::store::{Document, Fields, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Pending,
    #[default]
    PendingDriver,
    DriverAssigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::PendingDriver => "pendingDriver",
            DeliveryStatus::DriverAssigned => "driverAssigned",
            DeliveryStatus::InTransit => "inTransit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

/// Whether drivers can see a delivery. One field replaces the family of
/// legacy visibility booleans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationState {
    #[default]
    Draft,
    Published,
    Unpublished,
}

impl PublicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationState::Draft => "draft",
            PublicationState::Published => "published",
            PublicationState::Unpublished => "unpublished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(PublicationState::Draft),
            "published" => Some(PublicationState::Published),
            "unpublished" => Some(PublicationState::Unpublished),
            _ => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, PublicationState::Published)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub driver_id: String,
    pub amount: f64,
    pub placed_at: DateTime<Utc>,
}

/// Exactly one pricing mode is active; switching modes replaces the whole
/// value so no field of the previous mode survives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Pricing {
    #[serde(rename_all = "camelCase")]
    Fixed { fixed_price: f64 },
    #[serde(rename_all = "camelCase")]
    Bidding {
        min_bid_price: f64,
        #[serde(default)]
        bids: Vec<Bid>,
    },
}

impl Pricing {
    pub fn is_bidding(&self) -> bool {
        matches!(self, Pricing::Bidding { .. })
    }

    pub fn lowest_bid(&self) -> Option<&Bid> {
        match self {
            Pricing::Bidding { bids, .. } => bids.iter().min_by(|a, b| a.amount.total_cmp(&b.amount)),
            Pricing::Fixed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub order_id: String,
    pub company_id: String,
    pub company_name: String,
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub total_amount: f64,
    #[serde(default)]
    pub delivery_fee: f64,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub publication: PublicationState,
    pub pricing: Pricing,
    #[serde(default)]
    pub interested_drivers: Vec<String>,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub driver_phone: Option<String>,
    #[serde(default)]
    pub estimated_delivery_time: Option<String>,
    #[serde(default)]
    pub proposed_fee: Option<f64>,
    /// Stored as `null` when unknown, never omitted.
    #[serde(default)]
    pub delivery_coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub delivery_address: String,
    #[serde(default)]
    pub cancellations: u32,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unpublished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut delivery: Delivery = serde_json::from_value(Value::Object(doc.data.clone()))
            .map_err(|err| {
                StoreError::Serialization(format!("delivery {} is malformed: {err}", doc.id))
            })?;
        delivery.id = doc.id.clone();
        Ok(delivery)
    }

    /// Document body for storage; the id lives in the document key.
    pub fn to_fields(&self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => {
                fields.remove("id");
                Ok(fields)
            }
            Ok(_) => Err(StoreError::Serialization(
                "delivery did not serialize to an object".to_string(),
            )),
            Err(err) => Err(StoreError::Serialization(err.to_string())),
        }
    }

    pub fn is_open_for_drivers(&self) -> bool {
        self.status == DeliveryStatus::PendingDriver && self.publication.is_visible()
    }
}
