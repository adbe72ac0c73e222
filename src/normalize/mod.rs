//! Canonical request and line-item shapes from raw records of either
//! upstream schema. Every field alias lives here; nothing else reads raw
//! alias keys.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::models::comment::Comment;
use crate::models::company::CompanyIdentity;
use crate::models::delivery::{Bid, GeoPoint, Pricing, PublicationState};
use crate::models::request::{
    CandidateCompany, CompanyRef, CompanyState, LineItem, Request, RequestDeliveryStatus,
    RequestSource, RequestStatus,
};
use crate::store::Fields;
use crate::store::backend::{BackendItem, BackendRequest};

pub const PRICE: &[&str] = &["price", "precio", "unitPrice"];
pub const QUANTITY: &[&str] = &["quantity", "cantidad"];
pub const IMAGE: &[&str] = &["image", "imageUrl", "img", "photo", "photoUrl", "imagenUrl"];
pub const NAME: &[&str] = &["name", "nombre"];
pub const DESCRIPTION: &[&str] = &[
    "description",
    "descripcion",
    "specifications",
    "especificaciones",
];
pub const QUOTE_AMOUNT: &[&str] = &["totalAmount", "amount", "total", "budget"];
pub const CONFIRM_TOTAL: &[&str] = &["totalAmount", "amount", "total"];
pub const TITLE: &[&str] = &["title", "requestTitle", "titulo"];
pub const PHONE: &[&str] = &["telefono", "clientPhone", "phone"];
pub const REQUESTER_NAME: &[&str] = &["usuarioNombre", "clientName", "userName"];
pub const REQUESTER_ID: &[&str] = &["userId", "usuarioId", "clientId"];
pub const CATEGORY: &[&str] = &["category", "categoria", "profesion"];
pub const URGENCY: &[&str] = &["urgency", "urgencia"];
pub const CREATED_AT: &[&str] = &["createdAt", "fechaCreacion"];
pub const COORDS: &[&str] = &["deliveryCoordinates", "coordinates"];
pub const ADDRESS: &[&str] = &["deliveryAddress", "address"];

/// Legacy booleans that each meant "drivers can see this".
pub const LEGACY_VISIBILITY: &[&str] = &[
    "isPublished",
    "published",
    "deliveryPublished",
    "visibleToDrivers",
    "availableForDrivers",
    "visibleInFeed",
    "searchable",
];

pub const UNPRICED: &str = "Por determinar";
pub const UNTITLED: &str = "Sin título";

/// Coerces a JSON number or a locale-formatted numeric string.
///
/// Accepts `"10.50"`, `"10,50"`, `"1.234,56"` and `"1,234.56"`; whitespace
/// and currency symbols are ignored. Non-finite results are rejected.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()),
        Value::String(s) => parse_text_number(s),
        _ => None,
    }
}

fn parse_text_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let canonical = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal, grouping) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned
                .chars()
                .filter(|c| *c != grouping)
                .map(|c| if c == decimal { '.' } else { c })
                .collect()
        }
        (None, Some(comma)) => {
            let trailing = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && trailing != 3 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// First alias whose value coerces to a finite number.
pub fn first_number(raw: &Fields, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .filter_map(|key| raw.get(*key))
        .find_map(parse_number)
}

/// First non-empty string among the aliases. Numbers are rendered as text
/// so numeric ids and phone numbers survive.
pub fn first_text(raw: &Fields, aliases: &[&str]) -> Option<String> {
    aliases.iter().filter_map(|key| raw.get(*key)).find_map(|value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn item_price(item: &Fields) -> f64 {
    first_number(item, PRICE).unwrap_or(0.0)
}

fn item_quantity(item: &Fields) -> f64 {
    first_number(item, QUANTITY).unwrap_or(1.0)
}

/// Sum of price × quantity over well-formed entries. Never NaN.
pub fn calculate_total(items: &[Value]) -> f64 {
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| item_price(item) * item_quantity(item))
        .filter(|subtotal| subtotal.is_finite())
        .sum()
}

pub fn line_items_total(items: &[LineItem]) -> f64 {
    items
        .iter()
        .map(LineItem::subtotal)
        .filter(|subtotal| subtotal.is_finite())
        .sum()
}

/// Integral amounts print without decimals; others with at most two,
/// trailing zeros trimmed.
pub fn format_amount(amount: f64) -> String {
    if !amount.is_finite() {
        return "0".to_string();
    }
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        return format!("{}", amount as i64);
    }
    let fixed = format!("{amount:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn get_product_price(item: &Value) -> String {
    item.as_object()
        .and_then(|item| first_number(item, PRICE))
        .map(format_amount)
        .unwrap_or_else(|| "0".to_string())
}

pub fn get_quote_price(quote: &Value) -> String {
    let Some(quote) = quote.as_object() else {
        return UNPRICED.to_string();
    };
    if let Some(amount) = first_number(quote, QUOTE_AMOUNT) {
        return format_amount(amount);
    }
    for key in ["products", "items"] {
        if let Some(list) = non_empty_array(quote, key) {
            return format_amount(calculate_total(list));
        }
    }
    UNPRICED.to_string()
}

fn non_empty_array<'a>(raw: &'a Fields, key: &str) -> Option<&'a Vec<Value>> {
    raw.get(key)
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty())
}

pub fn normalize_item(raw: &Value) -> Option<LineItem> {
    let item = raw.as_object()?;
    Some(LineItem {
        name: first_text(item, NAME).unwrap_or_else(|| "Producto".to_string()),
        quantity: item_quantity(item),
        unit_price: item_price(item),
        image: first_text(item, IMAGE),
        description: first_text(item, DESCRIPTION),
    })
}

/// Raw line-item list of a request document: `products` wins when it has
/// entries, otherwise `items`.
pub fn raw_items(raw: &Fields) -> &[Value] {
    non_empty_array(raw, "products")
        .or_else(|| non_empty_array(raw, "items"))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn parse_status(raw: Option<&str>) -> RequestStatus {
    match raw.unwrap_or_default() {
        "confirmado" | "accepted" | "pendingDriver" | "recibida" | "enviado" | "en_camino" => {
            RequestStatus::Confirmed
        }
        "denegado" | "rejected" => RequestStatus::Denied,
        "entregado" | "delivered" => RequestStatus::Delivered,
        _ => RequestStatus::Pending,
    }
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        // Document-store timestamp objects.
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos.min(999_999_999) as u32)
        }
        _ => None,
    }
}

pub fn parse_point(value: &Value) -> Option<GeoPoint> {
    let map = value.as_object()?;
    let lat = first_number(map, &["lat", "latitude"])?;
    let lng = first_number(map, &["lng", "lon", "longitude"])?;
    Some(GeoPoint { lat, lng })
}

/// Reads `publication`, falling back to the legacy visibility booleans:
/// any true publishes, any explicit false unpublishes, none is a draft.
pub fn derive_publication(raw: &Fields) -> PublicationState {
    if let Some(state) = raw
        .get("publication")
        .and_then(Value::as_str)
        .and_then(PublicationState::parse)
    {
        return state;
    }

    let flags: Vec<bool> = LEGACY_VISIBILITY
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_bool))
        .collect();
    if flags.iter().any(|flag| *flag) {
        PublicationState::Published
    } else if flags.is_empty() {
        PublicationState::Draft
    } else {
        PublicationState::Unpublished
    }
}

/// Reads the tagged `pricing` value, falling back to the legacy flat fields.
pub fn derive_pricing(raw: &Fields) -> Option<Pricing> {
    if let Some(pricing) = raw
        .get("pricing")
        .and_then(|value| serde_json::from_value::<Pricing>(value.clone()).ok())
    {
        return Some(pricing);
    }

    if raw.get("bidEnabled").and_then(Value::as_bool) == Some(true) {
        let bids = raw
            .get("bids")
            .and_then(Value::as_array)
            .map(|bids| {
                bids.iter()
                    .filter_map(|bid| serde_json::from_value::<Bid>(bid.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        return Some(Pricing::Bidding {
            min_bid_price: first_number(raw, &["minBidPrice"]).unwrap_or(0.0),
            bids,
        });
    }

    first_number(raw, &["fixedPrice"]).map(|fixed_price| Pricing::Fixed { fixed_price })
}

fn candidate_companies(raw: &Fields) -> Vec<CandidateCompany> {
    raw.get("selectedCompanies")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| match entry {
                    Value::String(id) if !id.is_empty() => Some(CandidateCompany::Id(id.clone())),
                    Value::Object(_) => serde_json::from_value::<CompanyRef>(entry.clone())
                        .ok()
                        .map(CandidateCompany::Profile),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn comments(raw: &Fields) -> Vec<Comment> {
    raw.get("comments")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| serde_json::from_value::<Comment>(entry.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// First non-zero amount among the confirm-total aliases; zero counts as
/// missing.
pub fn confirm_total(raw: &Fields) -> Option<f64> {
    CONFIRM_TOTAL
        .iter()
        .filter_map(|key| raw.get(*key))
        .filter_map(parse_number)
        .find(|amount| *amount != 0.0)
}

pub fn normalize_request(id: &str, raw: &Fields) -> Request {
    let items = raw_items(raw).iter().filter_map(normalize_item).collect();
    let text = |key: &str| first_text(raw, &[key]);

    Request {
        id: id.to_string(),
        title: first_text(raw, TITLE).unwrap_or_else(|| UNTITLED.to_string()),
        requester_id: first_text(raw, REQUESTER_ID),
        requester_name: first_text(raw, REQUESTER_NAME),
        phone: first_text(raw, PHONE),
        category: first_text(raw, CATEGORY),
        urgency: first_text(raw, URGENCY),
        created_at: CREATED_AT
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(parse_timestamp),
        status: parse_status(raw.get("status").and_then(Value::as_str)),
        delivery_status: raw
            .get("deliveryStatus")
            .and_then(Value::as_str)
            .and_then(RequestDeliveryStatus::parse),
        company_state: raw
            .get("estadoEmpresa")
            .and_then(Value::as_str)
            .and_then(CompanyState::parse),
        items,
        delivery_id: text("deliveryId"),
        driver_id: text("driverId"),
        comments: comments(raw),
        candidate_companies: candidate_companies(raw),
        company_id: text("companyId"),
        company_name: text("companyName"),
        active_for_company: raw
            .get("activeForCompany")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        publication: derive_publication(raw),
        pricing: derive_pricing(raw),
        total_amount: confirm_total(raw),
        price_label: get_quote_price(&Value::Object(raw.clone())),
        delivery_fee: first_number(raw, &["deliveryFee"]).unwrap_or(0.0),
        delivery_address: first_text(raw, ADDRESS).unwrap_or_default(),
        coordinates: COORDS
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(parse_point),
        source: RequestSource::Document,
    }
}

fn backend_item(item: &BackendItem) -> LineItem {
    LineItem {
        name: if item.nombre.is_empty() {
            "Producto".to_string()
        } else {
            item.nombre.clone()
        },
        quantity: item.cantidad.filter(|q| q.is_finite()).unwrap_or(1.0),
        unit_price: item.precio.filter(|p| p.is_finite()).unwrap_or(0.0),
        image: item.imagen_url.clone().filter(|url| !url.is_empty()),
        description: item.especificaciones.clone().filter(|d| !d.is_empty()),
    }
}

/// Maps a relational backend row onto the canonical request, addressed to
/// the given company.
pub fn normalize_backend_request(row: &BackendRequest, company: &CompanyIdentity) -> Request {
    let items: Vec<LineItem> = row.items.iter().map(backend_item).collect();
    let budget = row.presupuesto.filter(|amount| amount.is_finite());
    let price_label = match budget {
        Some(amount) => format_amount(amount),
        None if !items.is_empty() => format_amount(line_items_total(&items)),
        None => UNPRICED.to_string(),
    };
    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

    Request {
        id: row.id.to_string(),
        title: non_empty(&row.titulo).unwrap_or_else(|| UNTITLED.to_string()),
        requester_id: Some(row.usuario_id.clone()).filter(|id| !id.is_empty()),
        requester_name: Some(non_empty(&row.usuario_nombre).unwrap_or_else(|| "Usuario".to_string())),
        phone: None,
        category: non_empty(&row.profesion),
        urgency: None,
        created_at: row
            .fecha_creacion
            .as_ref()
            .and_then(|raw| parse_timestamp(&Value::String(raw.clone()))),
        status: RequestStatus::Pending,
        delivery_status: None,
        company_state: None,
        items,
        delivery_id: None,
        driver_id: None,
        comments: Vec::new(),
        candidate_companies: vec![CandidateCompany::Id(company.id.clone())],
        company_id: None,
        company_name: None,
        active_for_company: false,
        publication: PublicationState::Draft,
        pricing: None,
        total_amount: budget,
        price_label,
        delivery_fee: 0.0,
        delivery_address: non_empty(&row.ubicacion).unwrap_or_default(),
        coordinates: None,
        source: RequestSource::Backend,
    }
}
