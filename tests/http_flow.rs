use std::{collections::BTreeSet, sync::Arc};

use actix_web::{http::StatusCode, test, web, App};
use chrono::Utc;
use serde_json::{json, Value};
use splitledger::{
    api::{self, AppState},
    auth::{sign, GATEWAY_SIGNATURE_HEADER},
    schemas::{Expense, ExpenseId, Group, GroupId, Money, UserId},
    MemoryStore,
};

const AUTH_SECRET: &str = "auth-secret";
const WEBHOOK_SECRET: &str = "webhook-secret";

fn caller(user: &str) -> (&'static str, String) {
    (
        "Authorization",
        format!("{user}:{}", sign(AUTH_SECRET.as_bytes(), user.as_bytes())),
    )
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_group(Group {
            id: GroupId::from("g1"),
            name: "Trip".to_owned(),
            members: vec![UserId::from("u1"), UserId::from("u2"), UserId::from("u3")],
        })
        .await;
    store
        .put_expense(Expense {
            id: ExpenseId::from("e1"),
            group_id: GroupId::from("g1"),
            description: "Dinner".to_owned(),
            amount: Money::from_minor(300),
            paid_by: UserId::from("u1"),
            shared_with: BTreeSet::from([UserId::from("u2"), UserId::from("u3")]),
            settled_by: BTreeSet::new(),
            created_at: Utc::now(),
        })
        .await;
    store
}

fn card_completion(session: &str) -> Value {
    json!({
        "expenseId": "e1",
        "payerId": "u3",
        "payeeId": "u1",
        "amount": 100,
        "paymentMethod": "card",
        "sessionId": session,
    })
}

fn signed_webhook(event: &Value) -> test::TestRequest {
    let body = serde_json::to_vec(event).unwrap();
    let signature = sign(WEBHOOK_SECRET.as_bytes(), &body);
    test::TestRequest::post()
        .uri("/payments/webhook")
        .insert_header((GATEWAY_SIGNATURE_HEADER, signature))
        .set_payload(body)
}

fn redirect(user: &str, session: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/payments/complete")
        .insert_header(caller(user))
        .set_json(json!({ "sessionId": session }))
}

#[actix_web::test]
async fn settles_an_expense_end_to_end() {
    let store = seeded_store().await;
    let state = web::Data::new(AppState::new(store.clone(), AUTH_SECRET, WEBHOOK_SECRET));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::get()
        .uri("/users/u1/summary")
        .insert_header(caller("u1"))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(summary["owedToMe"], 200);
    assert_eq!(summary["net"], 200);

    // The redirect lands before the gateway has called back.
    let response = test::call_service(&app, redirect("u3", "cs_1").to_request()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let request = signed_webhook(&card_completion("cs_1")).to_request();
    let recorded: Value = test::call_and_read_body_json(&app, request).await;

    // The redirect page is then loaded twice for the same checkout session.
    for _ in 0..2 {
        let request = redirect("u3", "cs_1").to_request();
        let transaction: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(transaction["id"], recorded["id"]);
    }
    assert_eq!(store.transaction_count().await, 1);

    let request = test::TestRequest::post()
        .uri("/expenses/e1/cash-confirmations")
        .insert_header(caller("u2"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let confirmation: Value = test::read_body_json(response).await;
    assert_eq!(confirmation["amount"], 100);
    let token = confirmation["token"].as_str().unwrap().to_owned();

    let request = test::TestRequest::post()
        .uri(&format!("/cash-confirmations/{token}/settle"))
        .insert_header(caller("u2"))
        .to_request();
    let transaction: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(transaction["paymentMethod"], "cash");
    assert_eq!(transaction["payerId"], "u2");

    let request = test::TestRequest::get()
        .uri("/expenses/e1/settlement")
        .insert_header(caller("u1"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(status["fullySettled"], true);

    let request = test::TestRequest::get()
        .uri("/users/u1/summary")
        .insert_header(caller("u1"))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(summary["net"], 0);

    let request = test::TestRequest::get()
        .uri("/groups/g1/balance")
        .insert_header(caller("u2"))
        .to_request();
    let balances: Value = test::call_and_read_body_json(&app, request).await;
    assert!(balances
        .as_array()
        .unwrap()
        .iter()
        .all(|member| member["net"] == 0));
}

#[actix_web::test]
async fn rejects_unauthenticated_and_foreign_settlements() {
    let store = seeded_store().await;
    let state = web::Data::new(AppState::new(store.clone(), AUTH_SECRET, WEBHOOK_SECRET));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::get().uri("/users/u1/summary").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = test::TestRequest::post()
        .uri("/payments/complete")
        .insert_header(caller("u3"))
        .set_json(json!({ "expenseId": "e1", "paymentMethod": "card" }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = test::TestRequest::get()
        .uri("/groups/nope/balance")
        .insert_header(caller("u1"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"], "group nope not found");

    assert_eq!(store.transaction_count().await, 0);

    let request = signed_webhook(&card_completion("cs_1")).to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = test::call_service(&app, redirect("u2", "cs_1").to_request()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn redirect_with_an_invented_session_records_nothing() {
    let store = seeded_store().await;
    let state = web::Data::new(AppState::new(store.clone(), AUTH_SECRET, WEBHOOK_SECRET));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    // A client posting a full payment body to the redirect gets no write out of it.
    let request = test::TestRequest::post()
        .uri("/payments/complete")
        .insert_header(caller("u3"))
        .set_json(card_completion("cs_invented"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(store.transaction_count().await, 0);

    let request = test::TestRequest::get()
        .uri("/expenses/e1/settlement")
        .insert_header(caller("u1"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(status["settled"], json!([]));

    let mut short = card_completion("cs_short");
    short["amount"] = json!(1);
    let response = test::call_service(&app, signed_webhook(&short).to_request()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.transaction_count().await, 0);
}

#[actix_web::test]
async fn webhook_requires_signature_and_deduplicates() {
    let store = seeded_store().await;
    let state = web::Data::new(AppState::new(store.clone(), AUTH_SECRET, WEBHOOK_SECRET));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;
    let body = serde_json::to_vec(&card_completion("cs_hook")).unwrap();

    let request = test::TestRequest::post()
        .uri("/payments/webhook")
        .insert_header((GATEWAY_SIGNATURE_HEADER, "00"))
        .set_payload(body.clone())
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = sign(WEBHOOK_SECRET.as_bytes(), &body);
    for _ in 0..3 {
        let request = test::TestRequest::post()
            .uri("/payments/webhook")
            .insert_header((GATEWAY_SIGNATURE_HEADER, signature.clone()))
            .set_payload(body.clone())
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(store.transaction_count().await, 1);

    let request = test::TestRequest::get()
        .uri("/expenses/e1/settlement")
        .insert_header(caller("u1"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(status["settled"], json!(["u3"]));
    assert_eq!(status["pending"], json!(["u2"]));
}
