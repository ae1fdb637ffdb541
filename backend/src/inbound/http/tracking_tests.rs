//! Tests for tracking ingress handlers.

use actix_web::http::StatusCode;
use actix_web::{test as actix_test, web, App};
use chrono::Utc;
use serde_json::{json, Value};

use crate::domain::events::EventType;
use crate::domain::ids::TRANSPARENT_GIF;
use crate::domain::tracking::{NewTrackingLink, NewTrackingOpen};
use crate::server::routes;

use super::test_utils::{harness, TestHarness};

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

fn seed_open(harness: &TestHarness, id: &str) {
    harness.tracking_rows.seed_open(NewTrackingOpen {
        id: id.into(),
        user_id: "u1".into(),
        message_id: "<m1@example.com>".into(),
        recipient_email: "bob@x.com".into(),
        sending_domain: "example.com".into(),
        created_at: Utc::now(),
    });
}

fn seed_link(harness: &TestHarness, id: &str, url: &str) {
    harness.tracking_rows.seed_link(NewTrackingLink {
        id: id.into(),
        user_id: "u1".into(),
        message_id: "<m1@example.com>".into(),
        recipient_email: "bob@x.com".into(),
        sending_domain: "example.com".into(),
        original_url: url.into(),
        created_at: Utc::now(),
    });
}

#[actix_web::test]
async fn pixel_serves_gif_and_emits_first_touch_event_once() {
    let harness = harness();
    seed_open(&harness, "open1");

    for hit in 1..=2 {
        let response = call(
            &harness,
            actix_test::TestRequest::get()
                .uri("/t/o/open1")
                .insert_header(("user-agent", "Mail/1.0"))
                .insert_header(("x-forwarded-for", "10.0.0.9, 172.16.0.1")),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK, "hit {hit}");
        assert_eq!(
            response.headers().get("content-type").expect("ct"),
            "image/gif"
        );
        assert_eq!(
            response.headers().get("cache-control").expect("cc"),
            "no-store, no-cache, must-revalidate"
        );
        let body = actix_test::read_body(response).await;
        assert_eq!(body.as_ref(), TRANSPARENT_GIF.as_slice());
    }

    let rows = harness.events.rows.lock().expect("rows");
    let opened: Vec<_> = rows
        .iter()
        .filter(|r| r.event_type == EventType::Opened)
        .collect();
    assert_eq!(opened.len(), 1, "first touch only");
    assert_eq!(opened[0].ip_address.as_deref(), Some("10.0.0.9"));
    assert_eq!(opened[0].user_agent.as_deref(), Some("Mail/1.0"));

    let opens = harness.tracking_rows.opens.lock().expect("opens");
    assert_eq!(opens[0].open_count, 2);
    assert!(opens[0].opened_at.is_some());
}

#[actix_web::test]
async fn unknown_pixel_id_still_serves_the_gif() {
    let harness = harness();
    let response = call(&harness, actix_test::TestRequest::get().uri("/t/o/ghost")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = actix_test::read_body(response).await;
    assert_eq!(body.as_ref(), TRANSPARENT_GIF.as_slice());
    assert!(harness.events.rows.lock().expect("rows").is_empty());
}

#[actix_web::test]
async fn click_redirects_to_original_url_and_counts() {
    let harness = harness();
    seed_link(&harness, "click1", "https://a.example/x");

    for _ in 0..2 {
        let response = call(&harness, actix_test::TestRequest::get().uri("/t/c/click1")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").expect("location"),
            "https://a.example/x"
        );
        assert_eq!(
            response.headers().get("cache-control").expect("cc"),
            "no-store, no-cache, must-revalidate"
        );
    }

    let rows = harness.events.rows.lock().expect("rows");
    let clicked: Vec<_> = rows
        .iter()
        .filter(|r| r.event_type == EventType::Clicked)
        .collect();
    assert_eq!(clicked.len(), 1, "first touch only");
    assert_eq!(
        clicked[0].metadata.as_ref().expect("metadata")["originalUrl"],
        json!("https://a.example/x")
    );

    let links = harness.tracking_rows.links.lock().expect("links");
    assert_eq!(links[0].click_count, 2);
}

#[actix_web::test]
async fn unknown_click_id_is_a_json_not_found() {
    let harness = harness();
    let response = call(&harness, actix_test::TestRequest::get().uri("/t/c/ghost")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["error"], json!("not_found"));
}

#[actix_web::test]
async fn tracking_endpoints_need_no_auth() {
    let harness = harness();
    seed_open(&harness, "open1");
    let response = call(&harness, actix_test::TestRequest::get().uri("/t/o/open1")).await;
    assert_eq!(response.status(), StatusCode::OK);
}
