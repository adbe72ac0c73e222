use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use delivery_board::api::rest::router;
use delivery_board::lifecycle::pricing::PricingDefaults;
use delivery_board::models::company::{City, CompanyProfile};
use delivery_board::state::AppState;
use delivery_board::store::backend::{BackendError, BackendRequest, RequestBackend};
use delivery_board::store::memory::MemoryStore;
use delivery_board::store::{Collection, DocumentStore};
use serde_json::{json, Value};
use tower::ServiceExt;

struct OfflineBackend;

#[async_trait]
impl RequestBackend for OfflineBackend {
    async fn pending_requests(&self, _city: Option<&str>) -> Result<Vec<BackendRequest>, BackendError> {
        Err(BackendError::Http("backend offline".to_string()))
    }

    async fn company_profile(&self, _uid: &str) -> Result<Option<CompanyProfile>, BackendError> {
        Ok(None)
    }

    async fn cities(&self) -> Result<Vec<City>, BackendError> {
        Err(BackendError::Http("backend offline".to_string()))
    }

    async fn seed_country_cities(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn seed_cities_from_users(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn update_location(
        &self,
        _user_id: &str,
        _city_id: Option<i64>,
        _city_name: Option<&str>,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

fn setup() -> (axum::Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(1024));
    let state = AppState::new(
        store.clone(),
        Arc::new(OfflineBackend),
        PricingDefaults::default(),
    );
    (router(Arc::new(state)), store)
}

async fn seed(store: &MemoryStore, collection: Collection, id: &str, body: Value) {
    let Value::Object(fields) = body else {
        panic!("seed documents must be objects");
    };
    store.put(collection, id, fields).await.unwrap();
}

fn company_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-company-id", "co-1")
        .header("x-company-name", "Acme");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn seed_pending_request(store: &MemoryStore, id: &str) {
    seed(
        store,
        Collection::Requests,
        id,
        json!({
            "title": "Caja de repuestos",
            "status": "pendiente",
            "selectedCompanies": ["co-1"],
            "telefono": "+57 300 123 4567",
            "products": [{ "name": "Filtro", "price": 100000, "quantity": 2 }],
            "totalAmount": 200000,
            "deliveryCoordinates": { "lat": 4.711, "lng": -74.0721 },
            "createdAt": "2024-05-01T10:00:00Z"
        }),
    )
    .await;
}

async fn confirm(app: &axum::Router, request_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(company_request("POST", &format!("/requests/{request_id}/confirm"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["deliveryId"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["trackedCompanies"], 0);
    assert_eq!(body["inFlight"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("operations_in_flight"));
}

#[tokio::test]
async fn company_routes_require_identity() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/requests/pending")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("x-company-id"));
}

#[tokio::test]
async fn confirm_moves_request_out_of_pending() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;

    let response = app
        .clone()
        .oneshot(company_request("GET", "/requests/pending", None))
        .await
        .unwrap();
    let pending = body_json(response).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["priceLabel"], "200000");

    let delivery_id = confirm(&app, "r1").await;
    let again = confirm(&app, "r1").await;
    assert_eq!(again, delivery_id);

    let response = app
        .clone()
        .oneshot(company_request("GET", "/requests/pending", None))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "pendingDriver");
    assert_eq!(delivery["publication"], "published");
    assert_eq!(delivery["pricing"]["mode"], "fixed");
    assert_eq!(delivery["pricing"]["fixedPrice"].as_f64(), Some(20000.0));
}

#[tokio::test]
async fn assigned_request_shows_once_in_active() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;
    seed(
        &store,
        Collection::Users,
        "drv-1",
        json!({ "displayName": "Carlos", "phone": "3001112233" }),
    )
    .await;
    let delivery_id = confirm(&app, "r1").await;

    let response = app
        .clone()
        .oneshot(company_request(
            "POST",
            "/requests/r1/assign",
            Some(json!({ "driverId": "drv-1", "deliveryId": delivery_id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["changed"], true);
    assert_eq!(outcome["driverName"], "Carlos");

    let response = app
        .clone()
        .oneshot(company_request("GET", "/requests/active", None))
        .await
        .unwrap();
    let active = body_json(response).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
    assert_eq!(active[0]["id"], "r1");

    let response = app
        .oneshot(company_request(
            "POST",
            "/requests/r1/assign",
            Some(json!({ "driverId": "drv-2", "deliveryId": delivery_id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unpublish_without_delivery_is_a_precondition_failure() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;

    let response = app
        .oneshot(company_request("POST", "/requests/r1/unpublish", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let doc = store.get(Collection::Requests, "r1").await.unwrap().unwrap();
    assert_eq!(doc.version, 1);
}

#[tokio::test]
async fn publish_with_bidding_then_unpublish() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;

    let response = app
        .clone()
        .oneshot(company_request(
            "POST",
            "/requests/r1/publish",
            Some(json!({ "pricing": { "bidEnabled": true, "minBidPrice": 8000 } })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    let delivery_id = outcome["deliveryId"].as_str().unwrap().to_string();
    assert_eq!(outcome["pricing"]["mode"], "bidding");
    assert!(outcome["pricing"].get("fixedPrice").is_none());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/bids"),
            json!({ "driverId": "drv-1", "amount": 9000 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(company_request(
            "POST",
            "/requests/r1/unpublish",
            Some(json!({ "deliveryId": delivery_id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request("/deliveries/available"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/comments")))
        .await
        .unwrap();
    let comments = body_json(response).await;
    assert_eq!(comments.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn denied_request_leaves_every_view() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;

    let response = app
        .clone()
        .oneshot(company_request("POST", "/requests/r1/deny", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(company_request("GET", "/dashboard", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let dashboard = body_json(response).await;
    assert_eq!(dashboard["summary"], json!({ "pending": 0, "active": 0, "completed": 0 }));
    assert_eq!(dashboard["nearby"], json!([]));

    let response = app
        .oneshot(company_request("POST", "/requests/r1/confirm", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn denied_request_cannot_be_republished_or_taken() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;
    let delivery_id = confirm(&app, "r1").await;

    let response = app
        .clone()
        .oneshot(company_request("POST", "/requests/r1/deny", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(company_request("POST", "/requests/r1/publish", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/accept"),
            json!({ "driverId": "drv-9", "driverName": "Nueve", "driverPhone": "309" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let doc = store.get(Collection::Requests, "r1").await.unwrap().unwrap();
    assert_eq!(doc.data["status"], "denegado");
    let delivery = store
        .get(Collection::Deliveries, &delivery_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.data["status"], "cancelled");
}

#[tokio::test]
async fn another_company_cannot_deny_a_request() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;
    let delivery_id = confirm(&app, "r1").await;

    let foreign = Request::builder()
        .method("POST")
        .uri("/requests/r1/deny")
        .header("x-company-id", "co-2")
        .header("x-company-name", "Otra")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(foreign).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let delivery = store
        .get(Collection::Deliveries, &delivery_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.data["status"], "pendingDriver");
}

#[tokio::test]
async fn only_one_racing_acceptance_succeeds() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;
    let delivery_id = confirm(&app, "r1").await;
    let uri = format!("/deliveries/{delivery_id}/accept");

    let (first, second) = tokio::join!(
        app.clone().oneshot(json_request(
            "POST",
            &uri,
            json!({ "driverId": "drv-1", "driverName": "Uno", "driverPhone": "300" }),
        )),
        app.clone().oneshot(json_request(
            "POST",
            &uri,
            json!({ "driverId": "drv-2", "driverName": "Dos", "driverPhone": "301" }),
        )),
    );
    let statuses = [first.unwrap().status(), second.unwrap().status()];

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );

    let doc = store
        .get(Collection::Requests, "r1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.data["deliveryStatus"], "driverAssigned");
}

#[tokio::test]
async fn available_deliveries_carry_distance() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;
    confirm(&app, "r1").await;

    let response = app
        .clone()
        .oneshot(get_request("/deliveries/available?lat=6.2442&lng=-75.5812"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let available = body_json(response).await;
    let km = available[0]["distanceKm"].as_f64().unwrap();
    assert!((km - 240.0).abs() < 15.0, "unexpected distance {km}");

    let response = app
        .oneshot(get_request("/deliveries/available?lat=6.2442&lng=-75.5812&maxKm=10"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn contact_link_uses_request_phone() {
    let (app, store) = setup();
    seed_pending_request(&store, "r1").await;

    let response = app
        .oneshot(company_request("GET", "/requests/r1/contact", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with("https://wa.me/573001234567?text="));
}

#[tokio::test]
async fn backend_outage_surfaces_as_bad_gateway() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/cities")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn missing_request_is_not_found() {
    let (app, _store) = setup();
    let response = app
        .oneshot(company_request("POST", "/requests/nope/confirm", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
