//! Tests for the send handler.

use actix_web::http::StatusCode;
use actix_web::{test as actix_test, web, App};
use serde_json::{json, Value};

use crate::domain::events::EventType;
use crate::domain::test_support::test_context;
use crate::server::routes;

use super::test_utils::{bearer, harness, harness_with_context, TestHarness};

async fn call(
    harness: &TestHarness,
    request: actix_test::TestRequest,
) -> actix_web::dev::ServiceResponse {
    let app = actix_test::init_service(
        App::new()
            .app_data(web::Data::new(harness.state.clone()))
            .configure(routes),
    )
    .await;
    actix_test::call_service(&app, request.to_request()).await
}

fn send_payload() -> Value {
    json!({
        "from": "alice@example.com",
        "to": "bob@x.com",
        "subject": "Hi",
        "html": "<body><p>hi <a href=\"https://a.example\">L</a></p></body>"
    })
}

#[actix_web::test]
async fn happy_send_returns_queued_and_persists_intent() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(send_payload()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["recipients"], json!(1));
    assert_eq!(body["suppressed"], json!(0));
    assert_eq!(body["status"], json!("queued"));
    assert!(body["messageId"]
        .as_str()
        .expect("messageId")
        .ends_with("@example.com>"));

    let rows = harness.events.rows.lock().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_type, EventType::Queued);

    assert_eq!(harness.queue.jobs.lock().expect("jobs").len(), 1);
    assert_eq!(harness.tracking_rows.opens.lock().expect("opens").len(), 1);
    assert_eq!(harness.tracking_rows.links.lock().expect("links").len(), 1);
    assert_eq!(harness.billing.used("u1"), 1);
}

#[actix_web::test]
async fn send_requires_bearer_auth() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .set_json(send_payload()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["error"], json!("unauthorized"));
    assert_eq!(body["message"], json!("Missing Authorization header"));
}

#[actix_web::test]
async fn foreign_from_domain_is_forbidden() {
    let harness = harness();
    let mut payload = send_payload();
    payload["from"] = json!("alice@other.com");
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(payload),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = actix_test::read_body_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("example.com"));
    assert!(harness.events.rows.lock().expect("rows").is_empty());
    assert_eq!(harness.billing.used("u1"), 0);
}

#[actix_web::test]
async fn exhausted_quota_is_too_many_requests() {
    let mut context = test_context();
    {
        let billing = context.billing.as_mut().expect("billing");
        billing.email_limit = 10;
        billing.email_used = 10;
    }
    let harness = harness_with_context(context);

    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(send_payload()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(
        body["message"],
        json!("Monthly email limit reached. Used: 10/10")
    );
    assert!(harness.queue.jobs.lock().expect("jobs").is_empty());
}

#[actix_web::test]
async fn template_send_with_stringified_variables() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(json!({
                "from": "alice@example.com",
                "to": "bob@x.com",
                "templateId": "welcome",
                "variables": "{\"name\":\"Ada\"}"
            })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let jobs = harness.queue.jobs.lock().expect("jobs");
    assert_eq!(jobs[0].job.subject, "Welcome Ada");
}

#[actix_web::test]
async fn recipient_list_fans_out_per_recipient() {
    let harness = harness();
    let mut payload = send_payload();
    payload["to"] = json!(["bob@x.com", "carol@x.com"]);
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(payload),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["recipients"], json!(2));
    assert_eq!(harness.events.rows.lock().expect("rows").len(), 2);
    assert_eq!(harness.billing.used("u1"), 2);
}

#[actix_web::test]
async fn missing_subject_is_a_validation_error() {
    let harness = harness();
    let mut payload = send_payload();
    payload.as_object_mut().expect("object").remove("subject");
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/send")
            .insert_header(bearer())
            .set_json(payload),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["error"], json!("invalid_request"));
}
