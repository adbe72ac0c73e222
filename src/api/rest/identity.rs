use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::company::CompanyIdentity;

pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const COMPANY_NAME_HEADER: &str = "x-company-name";
pub const DISPLAY_NAME_HEADER: &str = "x-company-display-name";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The identity provider sits in front of this service and forwards the
/// authenticated company in headers.
#[async_trait]
impl<S> FromRequestParts<S> for CompanyIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(&parts.headers, COMPANY_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("missing {COMPANY_ID_HEADER} header"))
        })?;

        Ok(CompanyIdentity {
            id,
            display_name: header(&parts.headers, DISPLAY_NAME_HEADER),
            company_name: header(&parts.headers, COMPANY_NAME_HEADER),
        })
    }
}
