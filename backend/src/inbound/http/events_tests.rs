//! Tests for the event API handlers.

use actix_web::http::StatusCode;
use actix_web::{test as actix_test, web, App};
use serde_json::{json, Value};

use crate::domain::events::{EventType, NewEmailEvent};
use crate::server::routes;

use super::test_utils::{bearer, harness, TestHarness};

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

fn seed_event(harness: &TestHarness, message_id: &str, event_type: EventType, recipient: &str) {
    harness.events.push(NewEmailEvent::new(
        "u1",
        message_id,
        event_type,
        recipient,
        "example.com",
    ));
}

#[actix_web::test]
async fn listing_returns_pagination_envelope() {
    let harness = harness();
    seed_event(&harness, "m1", EventType::Queued, "bob@x.com");
    seed_event(&harness, "m1", EventType::Sent, "carol@x.com");

    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events?limit=1")
            .insert_header(bearer()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["data"].as_array().expect("data").len(), 1);
    assert_eq!(body["pagination"]["total"], json!(2));
    assert_eq!(body["pagination"]["totalPages"], json!(2));
}

#[actix_web::test]
async fn listing_filters_by_event_type() {
    let harness = harness();
    seed_event(&harness, "m1", EventType::Queued, "bob@x.com");
    seed_event(&harness, "m2", EventType::Bounced, "carol@x.com");

    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events?eventType=bounced")
            .insert_header(bearer()),
    )
    .await;

    let body: Value = actix_test::read_body_json(response).await;
    let data = body["data"].as_array().expect("data");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["eventType"], json!("bounced"));
}

#[actix_web::test]
async fn unknown_event_type_filter_is_rejected() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events?eventType=exploded")
            .insert_header(bearer()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn stats_compute_two_decimal_rates() {
    let harness = harness();
    seed_event(&harness, "m1", EventType::Sent, "a@x.com");
    seed_event(&harness, "m2", EventType::Sent, "b@x.com");
    seed_event(&harness, "m1", EventType::Delivered, "a@x.com");
    seed_event(&harness, "m1", EventType::Opened, "a@x.com");

    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events/stats")
            .insert_header(bearer()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["sent"], json!(2));
    assert_eq!(body["delivered"], json!(1));
    assert_eq!(body["deliveryRate"], json!("50.00"));
    assert_eq!(body["openRate"], json!("100.00"));
    assert_eq!(body["bounceRate"], json!("0.00"));
}

#[actix_web::test]
async fn message_events_group_by_recipient() {
    let harness = harness();
    seed_event(&harness, "m1", EventType::Queued, "bob@x.com");
    seed_event(&harness, "m1", EventType::Opened, "bob@x.com");
    seed_event(&harness, "m1", EventType::Queued, "carol@x.com");

    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events/m1")
            .insert_header(bearer()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["messageId"], json!("m1"));
    let recipients = body["recipients"].as_object().expect("recipients");
    assert_eq!(recipients["bob@x.com"].as_array().expect("bob").len(), 2);
    assert_eq!(recipients["carol@x.com"].as_array().expect("carol").len(), 1);
}

#[actix_web::test]
async fn unknown_message_is_not_found() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::get()
            .uri("/api/v1/events/nope")
            .insert_header(bearer()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn ingested_complaint_suppresses_the_recipient() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/events")
            .insert_header(bearer())
            .set_json(json!({
                "eventType": "complained",
                "recipientEmail": "angry@x.com"
            })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert!(body["eventId"].as_str().is_some());

    let blocked = harness
        .suppressions
        .check("u1", &["angry@x.com".to_owned()], None)
        .await
        .expect("check");
    assert_eq!(blocked, vec!["angry@x.com".to_owned()]);
}

#[actix_web::test]
async fn soft_bounces_promote_after_three_reports() {
    let harness = harness();
    for _ in 0..3 {
        let response = call(
            &harness,
            actix_test::TestRequest::post()
                .uri("/api/v1/events")
                .insert_header(bearer())
                .set_json(json!({
                    "eventType": "bounced",
                    "recipientEmail": "c@x.com",
                    "metadata": { "bounceType": "soft_bounce" }
                })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let blocked = harness
        .suppressions
        .check("u1", &["c@x.com".to_owned()], None)
        .await
        .expect("check");
    assert_eq!(blocked, vec!["c@x.com".to_owned()]);

    // A fourth report must not error or un-promote.
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/events")
            .insert_header(bearer())
            .set_json(json!({
                "eventType": "bounced",
                "recipientEmail": "c@x.com",
                "metadata": { "bounceType": "soft_bounce" }
            })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[actix_web::test]
async fn hard_bounce_suppresses_immediately() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/events")
            .insert_header(bearer())
            .set_json(json!({
                "eventType": "bounced",
                "recipientEmail": "gone@x.com",
                "metadata": { "bounceType": "permanent" }
            })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let blocked = harness
        .suppressions
        .check("u1", &["gone@x.com".to_owned()], None)
        .await
        .expect("check");
    assert_eq!(blocked, vec!["gone@x.com".to_owned()]);
}

#[actix_web::test]
async fn unknown_external_event_type_is_rejected() {
    let harness = harness();
    let response = call(
        &harness,
        actix_test::TestRequest::post()
            .uri("/api/v1/events")
            .insert_header(bearer())
            .set_json(json!({
                "eventType": "exploded",
                "recipientEmail": "x@x.com"
            })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
