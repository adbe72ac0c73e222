//! HTTP client for the relational request backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::models::company::{City, CompanyProfile};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid backend response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendItem {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub cantidad: Option<f64>,
    #[serde(default)]
    pub especificaciones: Option<String>,
    #[serde(default)]
    pub imagen_url: Option<String>,
    #[serde(default)]
    pub precio: Option<f64>,
}

/// Pending request row as served by `/api/solicitudes/pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub id: i64,
    #[serde(default)]
    pub usuario_id: String,
    #[serde(default)]
    pub usuario_nombre: Option<String>,
    #[serde(default)]
    pub usuario_email: Option<String>,
    #[serde(default)]
    pub titulo: Option<String>,
    #[serde(default)]
    pub profesion: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub ubicacion: Option<String>,
    #[serde(default)]
    pub presupuesto: Option<f64>,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub fecha_creacion: Option<String>,
    #[serde(default)]
    pub items: Vec<BackendItem>,
}

#[async_trait]
pub trait RequestBackend: Send + Sync {
    async fn pending_requests(&self, city: Option<&str>) -> Result<Vec<BackendRequest>, BackendError>;

    /// `None` when the backend has no user for this identity.
    async fn company_profile(&self, uid: &str) -> Result<Option<CompanyProfile>, BackendError>;

    async fn cities(&self) -> Result<Vec<City>, BackendError>;

    async fn seed_country_cities(&self) -> Result<(), BackendError>;

    async fn seed_cities_from_users(&self) -> Result<(), BackendError>;

    async fn update_location(
        &self,
        user_id: &str,
        city_id: Option<i64>,
        city_name: Option<&str>,
    ) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Http(format!("failed to build http client: {err}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| BackendError::Http(format!("failed reading error body: {err}")))?;
        let message = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());

        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))
    }

    async fn post_empty(&self, path: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestBackend for HttpBackend {
    async fn pending_requests(&self, city: Option<&str>) -> Result<Vec<BackendRequest>, BackendError> {
        let mut request = self.client.get(self.url("/api/solicitudes/pending"));
        if let Some(city) = city.filter(|c| !c.is_empty()) {
            request = request.query(&[("ciudad", city)]);
        }
        self.get_json(request).await
    }

    async fn company_profile(&self, uid: &str) -> Result<Option<CompanyProfile>, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/api/usuarios/firebase/{uid}")))
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json::<CompanyProfile>()
            .await
            .map(Some)
            .map_err(|err| BackendError::Decode(err.to_string()))
    }

    async fn cities(&self) -> Result<Vec<City>, BackendError> {
        self.get_json(self.client.get(self.url("/api/usuarios/ciudades")))
            .await
    }

    async fn seed_country_cities(&self) -> Result<(), BackendError> {
        self.post_empty("/api/usuarios/ciudades/populate-colombia")
            .await
    }

    async fn seed_cities_from_users(&self) -> Result<(), BackendError> {
        self.post_empty("/api/usuarios/ciudades/populate").await
    }

    async fn update_location(
        &self,
        user_id: &str,
        city_id: Option<i64>,
        city_name: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut body = serde_json::Map::new();
        if let Some(id) = city_id {
            body.insert("ciudadId".to_string(), json!(id));
        }
        if let Some(name) = city_name.filter(|n| !n.is_empty()) {
            body.insert("ciudadNombre".to_string(), json!(name));
        }

        let response = self
            .client
            .put(self.url(&format!("/api/usuarios/{user_id}/ubicacion")))
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}
