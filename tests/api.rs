mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{Harness, SECRET};
use session_booking::middleware::{USER_ID_HEADER, USER_ROLE_HEADER};
use session_booking::services::signature::PaymentVerifier;
use session_booking::{router, AppState};

fn app(h: &Harness) -> Router {
    router(AppState::new(h.lifecycle.clone()))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    caller: Option<(Uuid, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = caller {
        builder = builder.header(USER_ID_HEADER, id.to_string()).header(USER_ROLE_HEADER, role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn booking_body(email: &str) -> Value {
    json!({
        "name": "A",
        "email": email,
        "when": "2025-01-01T10:00:00Z",
        "reason": "intro",
    })
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = Harness::new();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn create_returns_201_then_200_for_duplicate() {
    let h = Harness::new();
    let app = app(&h);

    let (status, first) = call(&app, Method::POST, "/bookings", None, Some(booking_body("a@x.com"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["created"], true);
    assert_eq!(first["booking"]["status"], "pending");
    assert_eq!(first["booking"]["meetingId"], Value::Null);

    let (status, second) = call(&app, Method::POST, "/bookings", None, Some(booking_body("a@x.com"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["created"], false);
    assert_eq!(second["booking"]["id"], first["booking"]["id"]);
}

#[tokio::test]
async fn create_with_missing_fields_is_400() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = call(
        &app,
        Method::POST,
        "/bookings",
        None,
        Some(json!({ "name": "A", "email": "a@x.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("when is required"));
}

#[tokio::test]
async fn malformed_body_gets_json_error_envelope() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = call(
        &app,
        Method::POST,
        "/bookings",
        None,
        Some(json!({ "email": "a@x.com", "when": "2025-01-01T10:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("name is required"));

    let mut bad_time = booking_body("a@x.com");
    bad_time["when"] = json!("tomorrow");
    let (status, body) = call(&app, Method::POST, "/bookings", None, Some(bad_time)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let (status, body) = call(
        &app,
        Method::POST,
        "/bookings/verify",
        None,
        Some(json!({ "bookingId": "not-a-uuid", "orderId": "o", "paymentId": "p", "signature": "s" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn invalid_or_conflicting_patch_is_rejected() {
    let h = Harness::new();
    let app = app(&h);
    let counselor = Some((Uuid::new_v4(), "counselor"));

    call(&app, Method::POST, "/bookings", None, Some(booking_body("a@x.com"))).await;
    let (_, other) = call(&app, Method::POST, "/bookings", None, Some(booking_body("b@x.com"))).await;
    let uri = format!("/bookings/{}", other["booking"]["id"].as_str().unwrap());

    let (status, body) = call(&app, Method::PUT, &uri, counselor, Some(json!({ "email": "nope" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("email is malformed"));

    let (status, body) = call(&app, Method::PUT, &uri, counselor, Some(json!({ "email": "a@x.com" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, Method::PUT, &uri, counselor, Some(json!({ "status": "paid" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn create_links_booking_to_caller() {
    let h = Harness::new();
    let app = app(&h);
    let user = Uuid::new_v4();

    let (_, body) = call(
        &app,
        Method::POST,
        "/bookings",
        Some((user, "user")),
        Some(booking_body("a@x.com")),
    )
    .await;
    assert_eq!(body["booking"]["requesterUserId"], user.to_string());
}

#[tokio::test]
async fn initiate_and_verify_over_http() {
    let h = Harness::new();
    let app = app(&h);

    let mut body = booking_body("a@x.com");
    body["amount"] = json!(75000);
    let (status, initiated) = call(&app, Method::POST, "/bookings/initiate", None, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(initiated["booking"]["status"], "payment_pending");
    assert_eq!(initiated["order"]["amount"], 75000);

    let booking_id = initiated["booking"]["id"].as_str().unwrap().to_string();
    let order_id = initiated["order"]["id"].as_str().unwrap().to_string();

    let (status, rejected) = call(
        &app,
        Method::POST,
        "/bookings/verify",
        None,
        Some(json!({
            "bookingId": booking_id,
            "orderId": order_id,
            "paymentId": "pay_1",
            "signature": "deadbeef",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected["success"], false);

    let (status, verified) = call(
        &app,
        Method::POST,
        "/bookings/verify",
        None,
        Some(json!({
            "bookingId": booking_id,
            "orderId": order_id,
            "paymentId": "pay_1",
            "signature": PaymentVerifier::sign(SECRET, &order_id, "pay_1"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["booking"]["status"], "confirmed");
    assert_eq!(verified["booking"]["meetingId"].as_str().unwrap().len(), 12);
}

#[tokio::test]
async fn reading_requires_identity_and_ownership() {
    let h = Harness::new();
    let app = app(&h);
    let owner = Uuid::new_v4();

    let (_, created) = call(
        &app,
        Method::POST,
        "/bookings",
        Some((owner, "user")),
        Some(booking_body("a@x.com")),
    )
    .await;
    let uri = format!("/bookings/{}", created["booking"]["id"].as_str().unwrap());

    let (status, _) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::GET, &uri, Some((Uuid::new_v4(), "user")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, Method::GET, &uri, Some((owner, "user")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking"]["requesterEmail"], "a@x.com");

    let (status, _) = call(&app, Method::GET, &uri, Some((Uuid::new_v4(), "counselor")), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/bookings/{}", Uuid::new_v4()),
        Some((owner, "admin")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_is_scoped_for_regular_users() {
    let h = Harness::new();
    let app = app(&h);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    call(&app, Method::POST, "/bookings", Some((alice, "user")), Some(booking_body("alice@x.com"))).await;
    call(&app, Method::POST, "/bookings", Some((bob, "user")), Some(booking_body("bob@x.com"))).await;

    let (status, mine) = call(&app, Method::GET, "/bookings", Some((alice, "user")), None).await;
    assert_eq!(status, StatusCode::OK);
    let mine = mine["bookings"].as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["requesterEmail"], "alice@x.com");

    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/bookings?userId={}", bob),
        Some((alice, "user")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, all) = call(
        &app,
        Method::GET,
        "/bookings?status=pending&sort=desc&pageSize=500",
        Some((Uuid::new_v4(), "admin")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["bookings"].as_array().unwrap().len(), 2);
    assert_eq!(all["pageSize"], 100);

    let (status, _) = call(&app, Method::GET, "/bookings?status=paid", Some((alice, "admin")), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mutations_require_privileged_role() {
    let h = Harness::new();
    let app = app(&h);
    let owner = Uuid::new_v4();
    let counselor = Uuid::new_v4();

    let (_, created) = call(
        &app,
        Method::POST,
        "/bookings",
        Some((owner, "user")),
        Some(booking_body("a@x.com")),
    )
    .await;
    let uri = format!("/bookings/{}", created["booking"]["id"].as_str().unwrap());

    let (status, _) = call(&app, Method::DELETE, &uri, Some((owner, "user")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, confirmed) = call(
        &app,
        Method::PUT,
        &uri,
        Some((counselor, "counselor")),
        Some(json!({ "status": "confirmed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["booking"]["status"], "confirmed");

    let (status, cancelled) = call(&app, Method::DELETE, &uri, Some((counselor, "counselor")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["booking"]["status"], "cancelled");
    assert_eq!(cancelled["booking"]["meetingId"], confirmed["booking"]["meetingId"]);

    let (status, body) = call(
        &app,
        Method::PUT,
        &uri,
        Some((counselor, "admin")),
        Some(json!({ "status": "confirmed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_identity_header_is_400() {
    let h = Harness::new();
    let app = app(&h);

    let request = Request::builder()
        .uri("/bookings")
        .header(USER_ID_HEADER, "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
