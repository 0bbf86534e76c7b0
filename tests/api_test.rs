mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{setup, setup_with_participants, ALICE, BOB};
use upi_switch::create_app;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_reports_store() {
    let ts = setup(&[]).await;
    let app = create_app(ts.switch.state.clone());

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["status"], "healthy");
}

#[tokio::test]
async fn test_onboarding_and_payment_flow() {
    let ts = setup(&[]).await;
    let app = create_app(ts.switch.state.clone());

    for (code, name) in [("HDFC", "HDFC Bank"), ("ICICI", "ICICI Bank")] {
        let (status, body) = send(
            &app,
            "POST",
            "/banks",
            Some(json!({ "bank_code": code, "name": name, "endpoint": "https://bank.test/upi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "ACTIVE");
    }

    let (status, _) = send(
        &app,
        "POST",
        "/vpas",
        Some(json!({ "vpa": ALICE, "bank_code": "HDFC", "account_number": "HDFC0001", "holder_name": "Alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        &app,
        "POST",
        "/vpas",
        Some(json!({ "vpa": BOB, "bank_code": "ICICI", "account_number": "ICIC0002", "holder_name": "Bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, resolved) = send(&app, "GET", "/vpas/alice@hdfc/resolve", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["exists"], true);
    assert_eq!(resolved["bank_code"], "HDFC");

    let (status, result) = send(
        &app,
        "POST",
        "/transactions",
        Some(json!({
            "transaction_id": "API-TXN-1",
            "payer_vpa": ALICE,
            "payee_vpa": BOB,
            "amount": 10000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "SUCCESS");
    let rrn = result["rrn"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, "GET", "/transactions/API-TXN-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["rrn"], rrn.as_str());

    let (status, by_rrn) = send(&app, "GET", &format!("/rrn/{}", rrn), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_rrn["transaction_id"], "API-TXN-1");

    let (status, listed) = send(&app, "GET", "/vpas/bob@icici/transactions?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, history) = send(&app, "GET", "/transactions/API-TXN-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["state_changes"].as_array().unwrap().len(), 2);

    let (status, audit) = send(&app, "GET", "/audit/transaction/API-TXN-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!audit.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_vpa_resolves_as_absent() {
    let ts = setup_with_participants(&[]).await;
    let app = create_app(ts.switch.state.clone());

    let (status, body) = send(&app, "GET", "/vpas/nobody@nowhere/resolve", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["is_active"], false);
}

#[tokio::test]
async fn test_error_codes_on_the_wire() {
    let ts = setup_with_participants(&[]).await;
    let app = create_app(ts.switch.state.clone());

    let (status, body) = send(
        &app,
        "POST",
        "/transactions",
        Some(json!({ "transaction_id": "API-GHOST", "payer_vpa": ALICE, "payee_vpa": "ghost@bank9", "amount": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "VPA_NOT_FOUND");

    let (status, body) = send(
        &app,
        "POST",
        "/transactions",
        Some(json!({ "transaction_id": "API-EXTRA", "payer_vpa": ALICE, "payee_vpa": BOB, "amount": 100, "tip": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let (status, body) = send(&app, "GET", "/transactions/NOPE", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(
        &app,
        "POST",
        "/banks",
        Some(json!({ "bank_code": "HDFC", "name": "Again", "endpoint": "https://bank.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_bank_status_and_heartbeat_routes() {
    let ts = setup_with_participants(&[]).await;
    let app = create_app(ts.switch.state.clone());

    let (status, body) = send(
        &app,
        "POST",
        "/banks/ICICI/heartbeat",
        Some(json!({ "success_rate": 0.5, "response_time_ms": 120.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["success_rate"].as_f64().unwrap() < 1.0);

    let (status, body) = send(
        &app,
        "PUT",
        "/banks/HDFC/status",
        Some(json!({ "status": "MAINTENANCE" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "MAINTENANCE");

    let (status, body) = send(&app, "GET", "/banks/HDFC", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eligible"], false);

    let (status, body) = send(&app, "GET", "/banks?status=ACTIVE", None).await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["bank_code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["ICICI"]);
}

#[tokio::test]
async fn test_settlement_routes() {
    let ts = setup_with_participants(&[]).await;
    ts.switch
        .state
        .engine
        .process(common::payment("API-SETTLE", 2_000))
        .await
        .unwrap();
    let app = create_app(ts.switch.state.clone());
    let today = chrono::Utc::now().date_naive().to_string();

    let (status, body) = send(&app, "POST", "/settlements", Some(json!({ "settlement_date": today }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "COMPLETED");
    let batch_id = body["batch_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/settlements?date={}", today), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "GET", &format!("/settlements/{}/report", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reconciliation"]["balanced"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/settlements/{}/report?format=csv", batch_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
}
