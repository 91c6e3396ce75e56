//! Integration tests for the order backend client against a mock HTTP
//! backend.

use voicedesk::backend::{
    ItemCondition, OrderClient, OrderStatus, ReturnKind, ReturnReason, ReturnRequest,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": "token-1",
        "expires_in": 86400
    }))
}

fn one_order_envelope() -> serde_json::Value {
    serde_json::json!({
        "result": "success",
        "count": "1",
        "data": [{
            "orderId": "R-42",
            "customerName": "山田太郎",
            "customerEmail": "taro@example.com",
            "customerPhone": "05012345678",
            "status": "40",
            "orderDate": "2024-03-01",
            "deliveryMethod": "ヤマト宅急便",
            "trackingNumber": "1234-5678-9012",
            "items": [{"name": "美容クリーム", "qty": "1", "price": "3200"}],
            "totalAmount": "3200",
            "storeId": "rakuten-main"
        }]
    })
}

#[tokio::test]
async fn search_acquires_a_token_and_maps_the_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(token_ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .and(body_string_contains("customerPhone-like=05012345678"))
        .respond_with(ResponseTemplate::new(200).set_body_json(one_order_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let orders = client
        .search_orders(Some("05012345678"), None, 5)
        .await
        .unwrap();

    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.order_id, "R-42");
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.carrier.as_deref(), Some("ヤマト運輸"));
    assert_eq!(order.tracking_number.as_deref(), Some("1234-5678-9012"));
    assert_eq!(order.total_amount, 3200);
}

#[tokio::test]
async fn the_token_is_reused_across_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(one_order_envelope()))
        .expect(2)
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    client.search_orders(Some("0501"), None, 5).await.unwrap();
    client.search_orders(Some("0501"), None, 5).await.unwrap();
}

#[tokio::test]
async fn a_rejected_token_triggers_one_refresh_and_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .expect(2)
        .mount(&server)
        .await;
    // First search is refused with 401, the retry succeeds.
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(one_order_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let orders = client.search_orders(Some("0501"), None, 5).await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn identification_degrades_when_the_backend_is_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let ident = client.search_by_phone("+815012345678").await;
    assert!(!ident.found);
    assert!(ident.error);
}

#[tokio::test]
async fn identification_of_an_unknown_caller_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": "success",
            "count": "0",
            "data": []
        })))
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let ident = client.search_by_phone("+819099990000").await;
    assert!(!ident.found);
    assert!(!ident.error);
    assert!(ident.orders.is_empty());
}

#[tokio::test]
async fn identification_normalizes_the_dialed_number() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .mount(&server)
        .await;
    // The international prefix must be collapsed before it reaches the
    // backend.
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .and(body_string_contains("customerPhone-like=05012345678"))
        .respond_with(ResponseTemplate::new(200).set_body_json(one_order_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let ident = client.search_by_phone("+815012345678").await;
    assert!(ident.found);
    assert_eq!(ident.customer_name.as_deref(), Some("山田太郎"));
    assert_eq!(ident.orders.len(), 1);
}

#[tokio::test]
async fn register_return_appends_a_note_and_returns_a_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/update"))
        .and(body_string_contains("orderId=R-42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"result": "success"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let receipt = client
        .register_return(&ReturnRequest {
            order_id: "R-42".to_string(),
            reason: ReturnReason::Defective,
            condition: ItemCondition::Unopened,
            kind: ReturnKind::Refund,
            description: Some("蓋が割れていた".to_string()),
        })
        .await
        .unwrap();

    assert!(receipt.return_id.starts_with("RTN-"));
    assert!(receipt.message.contains(&receipt.return_id));
}

#[tokio::test]
async fn a_schema_drift_yields_an_empty_result_not_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_ok())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>surprise</html>"))
        .mount(&server)
        .await;

    let client = OrderClient::new(server.uri(), "cid", "secret", "refresh");
    let orders = client.search_orders(Some("0501"), None, 5).await.unwrap();
    assert!(orders.is_empty());
}
