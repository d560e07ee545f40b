mod common;

use actix_web::{App, http::StatusCode, http::header, test, web};
use common::StubGateway;
use serde_json::{Value, json};
use skillswap_ledger::store::MemoryStore;
use skillswap_ledger::{AppState, configure};
use std::sync::Arc;

fn state() -> web::Data<AppState> {
    web::Data::new(AppState::new(
        common::config(),
        Arc::new(MemoryStore::new()),
        Arc::new(StubGateway::default()),
    ))
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure)).await
    };
}

macro_rules! signup {
    ($app:expr, $name:expr) => {{
        let email = format!("{}@example.com", $name);
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "name": $name, "email": email, "password": "correct-horse" }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": email, "password": "correct-horse" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&$app, req).await;
        body["token"].as_str().unwrap().to_string()
    }};
}

macro_rules! create_item {
    ($app:expr, $token:expr, $body:expr) => {{
        let req = test::TestRequest::post()
            .uri("/items")
            .insert_header(bearer(&$token))
            .set_json($body)
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let item: Value = test::read_body_json(resp).await;
        item["id"].as_str().unwrap().to_string()
    }};
}

#[actix_web::test]
async fn health_check() {
    let state = state();
    let app = app!(state);
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn wallet_requires_token() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/wallet").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/wallet")
        .insert_header(bearer("not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "unauthorized");
}

#[actix_web::test]
async fn registration_grants_signup_tokens() {
    let state = state();
    let app = app!(state);
    let token = signup!(app, "ada");

    let req = test::TestRequest::get()
        .uri("/wallet")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["balance"], 100);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
    assert_eq!(body["history"][0]["reason"], "signup bonus");
    assert_eq!(body["history"][0]["direction"], "earned");
}

#[actix_web::test]
async fn duplicate_registration_conflicts() {
    let state = state();
    let app = app!(state);
    let _ = signup!(app, "grace");

    let req = test::TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({
            "name": "grace",
            "email": "grace@example.com",
            "password": "another-password",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn watching_a_lecture_pays_the_owner() {
    let state = state();
    let app = app!(state);
    let owner = signup!(app, "owner");
    let viewer = signup!(app, "viewer");
    let lecture = create_item!(
        app,
        owner,
        json!({ "kind": "lecture", "title": "Ownership", "price_tokens": 20 })
    );

    // warm the cache so the watch has to invalidate it
    let req = test::TestRequest::get()
        .uri("/wallet")
        .insert_header(bearer(&viewer))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/lectures/{lecture}/watch"))
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["tokensDeducted"], 20);
    assert_eq!(body["viewerBalance"], 80);
    assert_eq!(body["ownerBalance"], 120);

    let req = test::TestRequest::get()
        .uri("/wallet")
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], 80);
    assert_eq!(body["history"][0]["direction"], "spent");
    assert_eq!(body["history"][0]["reason"], "Watched lecture: Ownership");

    let req = test::TestRequest::post()
        .uri(&format!("/lectures/{lecture}/watch"))
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["tokensDeducted"], 0);
    assert_eq!(body["viewerBalance"], 80);

    let req = test::TestRequest::get()
        .uri("/progress")
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["progress"].as_array().unwrap().len(), 1);
    assert_eq!(body["progress"][0]["is_completed"], true);
}

#[actix_web::test]
async fn insufficient_funds_is_reported() {
    let state = state();
    let app = app!(state);
    let owner = signup!(app, "seller");
    let viewer = signup!(app, "buyer");
    let video = create_item!(
        app,
        owner,
        json!({
            "kind": "video",
            "title": "Async deep dive",
            "price_tokens": 500,
            "visibility": "premium",
        })
    );

    let req = test::TestRequest::post()
        .uri(&format!("/videos/{video}/watch"))
        .insert_header(bearer(&viewer))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "insufficient_funds");
    assert_eq!(body["error"]["balance"], 100);
    assert_eq!(body["error"]["required"], 500);

    let req = test::TestRequest::get()
        .uri("/tokens/history")
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn kind_mismatch_is_not_found() {
    let state = state();
    let app = app!(state);
    let owner = signup!(app, "author");
    let viewer = signup!(app, "reader");
    let lecture = create_item!(
        app,
        owner,
        json!({ "kind": "lecture", "title": "Traits", "price_tokens": 10 })
    );

    let req = test::TestRequest::post()
        .uri(&format!("/videos/{lecture}/watch"))
        .insert_header(bearer(&viewer))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn invalid_history_limit_is_rejected() {
    let state = state();
    let app = app!(state);
    let token = signup!(app, "paged");

    let req = test::TestRequest::get()
        .uri("/tokens/history?limit=0")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn subscription_purchase_round_trip() {
    let state = state();
    let app = app!(state);
    let token = signup!(app, "subscriber");

    let req = test::TestRequest::get()
        .uri("/subscription/plans")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plans"].as_array().unwrap().len(), 3);

    let req = test::TestRequest::post()
        .uri("/subscription/orders")
        .insert_header(bearer(&token))
        .set_json(json!({ "plan_id": 1 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let order_id = body["order_id"].as_str().unwrap().to_string();
    assert_eq!(body["amount"], 30_000);

    let signature =
        skillswap_ledger::payments::sign(common::KEY_SECRET, &order_id, "pay_http");
    let req = test::TestRequest::post()
        .uri("/subscription/verify")
        .insert_header(bearer(&token))
        .set_json(json!({
            "order_id": order_id,
            "payment_id": "pay_http",
            "signature": signature,
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["subscription"]["tokens_granted"], 500);
    assert_eq!(body["subscription"]["balance"], 600);

    let req = test::TestRequest::get()
        .uri("/subscription")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["subscription"]["plan_id"], 1);
    assert_eq!(body["subscription"]["plan"]["name"], "Basic");

    let req = test::TestRequest::get()
        .uri("/wallet")
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], 600);
    assert_eq!(body["history"][0]["reason"], "subscription");
}

#[actix_web::test]
async fn partial_progress_still_charges_on_watch() {
    let state = state();
    let app = app!(state);
    let owner = signup!(app, "mentor");
    let viewer = signup!(app, "student");
    let lecture = create_item!(
        app,
        owner,
        json!({ "kind": "lecture", "title": "Lifetimes", "price_tokens": 15 })
    );

    let req = test::TestRequest::put()
        .uri("/progress")
        .insert_header(bearer(&viewer))
        .set_json(json!({ "item_id": lecture, "completion_percentage": 40 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["progress"]["completion_percentage"], 40);
    assert_eq!(body["progress"]["is_completed"], false);

    let req = test::TestRequest::post()
        .uri(&format!("/lectures/{lecture}/watch"))
        .insert_header(bearer(&viewer))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["tokensDeducted"], 15);
    assert_eq!(body["viewerBalance"], 85);

    let req = test::TestRequest::put()
        .uri("/progress")
        .insert_header(bearer(&viewer))
        .set_json(json!({ "item_id": lecture, "completion_percentage": 140 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
