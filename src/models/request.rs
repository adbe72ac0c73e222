use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::comment::Comment;
use crate::models::delivery::{GeoPoint, Pricing, PublicationState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "confirmado")]
    Confirmed,
    #[serde(rename = "denegado")]
    Denied,
    #[serde(rename = "entregado")]
    Delivered,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pendiente",
            RequestStatus::Confirmed => "confirmado",
            RequestStatus::Denied => "denegado",
            RequestStatus::Delivered => "entregado",
        }
    }
}

/// Delivery progress as seen from the request document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestDeliveryStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "pendingDriver")]
    PendingDriver,
    #[serde(rename = "driverAssigned")]
    DriverAssigned,
    #[serde(rename = "enviado")]
    Shipped,
    #[serde(rename = "en_camino")]
    OnTheWay,
    #[serde(rename = "entregado")]
    Delivered,
}

impl RequestDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestDeliveryStatus::Pending => "pendiente",
            RequestDeliveryStatus::PendingDriver => "pendingDriver",
            RequestDeliveryStatus::DriverAssigned => "driverAssigned",
            RequestDeliveryStatus::Shipped => "enviado",
            RequestDeliveryStatus::OnTheWay => "en_camino",
            RequestDeliveryStatus::Delivered => "entregado",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pendiente" => Some(RequestDeliveryStatus::Pending),
            "pendingDriver" => Some(RequestDeliveryStatus::PendingDriver),
            "driverAssigned" => Some(RequestDeliveryStatus::DriverAssigned),
            "enviado" => Some(RequestDeliveryStatus::Shipped),
            "en_camino" | "inTransit" => Some(RequestDeliveryStatus::OnTheWay),
            "entregado" | "delivered" => Some(RequestDeliveryStatus::Delivered),
            _ => None,
        }
    }
}

/// `estadoEmpresa`: how far the confirming company has progressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompanyState {
    #[serde(rename = "en_espera")]
    Waiting,
    #[serde(rename = "en_progreso")]
    InProgress,
}

impl CompanyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyState::Waiting => "en_espera",
            CompanyState::InProgress => "en_progreso",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "en_espera" => Some(CompanyState::Waiting),
            "en_progreso" => Some(CompanyState::InProgress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Document,
    Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LineItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * self.quantity
    }
}

/// Profile entry of `selectedCompanies`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub nombre_empresa: Option<String>,
    #[serde(default)]
    pub empresa: Option<String>,
}

impl CompanyRef {
    pub fn has_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
            || self.company_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn label(&self) -> Option<&str> {
        [
            &self.company_name,
            &self.name,
            &self.nombre_empresa,
            &self.empresa,
        ]
        .into_iter()
        .filter_map(|value| value.as_deref())
        .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CandidateCompany {
    Id(String),
    Profile(CompanyRef),
}

/// Canonical request record produced by the field normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub title: String,
    pub requester_id: Option<String>,
    pub requester_name: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub urgency: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub delivery_status: Option<RequestDeliveryStatus>,
    pub company_state: Option<CompanyState>,
    pub items: Vec<LineItem>,
    pub delivery_id: Option<String>,
    pub driver_id: Option<String>,
    pub comments: Vec<Comment>,
    pub candidate_companies: Vec<CandidateCompany>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub active_for_company: bool,
    pub publication: PublicationState,
    pub pricing: Option<Pricing>,
    pub total_amount: Option<f64>,
    pub price_label: String,
    pub delivery_fee: f64,
    pub delivery_address: String,
    pub coordinates: Option<GeoPoint>,
    pub source: RequestSource,
}

impl Request {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RequestStatus::Denied | RequestStatus::Delivered)
            || self.delivery_status == Some(RequestDeliveryStatus::Delivered)
    }

    pub fn has_driver(&self) -> bool {
        self.driver_id.is_some()
            || self.delivery_status == Some(RequestDeliveryStatus::DriverAssigned)
    }
}
