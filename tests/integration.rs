//! # Integration Tests
//!
//! These tests drive the full HTTP surface in-process: the router from
//! `create_app` is wired to the in-memory stores, the payment gateway adapter
//! without credentials (local mock) and a counting message channel, then
//! exercised with `tower::ServiceExt::oneshot`. No database or network
//! services are needed.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use storefront_fulfillment::config::{GatewayConfig, StoreConfig};
    use storefront_fulfillment::engine::notifications::{MessageChannel, NotificationError};
    use storefront_fulfillment::engine::shipping::ShippingRates;
    use storefront_fulfillment::engine::HttpPaymentGateway;
    use storefront_fulfillment::models::{NotificationTemplate, ProductVariant};
    use storefront_fulfillment::store::{InMemoryAuditLog, InMemoryOrderStore, InMemoryTemplateStore};
    use storefront_fulfillment::{create_app, AppState, Collaborators};

    #[derive(Default)]
    struct CountingChannel {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl CountingChannel {
        async fn count(&self) -> usize {
            self.sent.lock().await.len()
        }

        async fn last(&self) -> Option<(String, String)> {
            self.sent.lock().await.last().cloned()
        }
    }

    #[async_trait]
    impl MessageChannel for CountingChannel {
        async fn send(&self, target: &str, message: &str) -> Result<(), NotificationError> {
            self.sent
                .lock()
                .await
                .push((target.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct TestApp {
        router: Router,
        orders: InMemoryOrderStore,
        audit: InMemoryAuditLog,
        channel: Arc<CountingChannel>,
    }

    fn variant(id: &str, product_id: &str, price: i64, stock: i32) -> ProductVariant {
        ProductVariant {
            id: id.to_string(),
            product_id: product_id.to_string(),
            name: format!("Variant {id}"),
            price,
            weight_grams: 400,
            length_cm: Some(30),
            width_cm: Some(20),
            height_cm: Some(5),
            stock,
        }
    }

    async fn spawn_app(gateway: GatewayConfig) -> TestApp {
        let orders = InMemoryOrderStore::with_variants(vec![
            variant("v-batik-m", "p-batik", 500_000, 20),
            variant("v-batik-l", "p-batik", 500_000, 0),
            variant("v-songket", "p-songket", 1_200_000, 3),
        ]);
        let templates = InMemoryTemplateStore::new();
        templates
            .upsert(NotificationTemplate {
                name: "order_shipped".to_string(),
                body: "{{store_name}}: pesanan {{order_number}} dikirim, resi {{tracking_number}}"
                    .to_string(),
                is_active: true,
            })
            .await;
        let audit = InMemoryAuditLog::new();
        let channel = Arc::new(CountingChannel::default());

        let store = StoreConfig {
            store_name: "Toko Kain".to_string(),
            base_url: "https://shop.example.com".to_string(),
            ..StoreConfig::default()
        };
        let state = AppState::new(
            Collaborators {
                orders: Arc::new(orders.clone()),
                templates: Arc::new(templates),
                audit: Arc::new(audit.clone()),
                gateway: Arc::new(HttpPaymentGateway::new(gateway).unwrap()),
                channel: channel.clone(),
            },
            store,
            ShippingRates::default(),
        );

        TestApp {
            router: create_app(state),
            orders,
            audit,
            channel,
        }
    }

    async fn mock_app() -> TestApp {
        spawn_app(GatewayConfig::default()).await
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    /// 2 x 500,000 + 1 x 1,200,000 to Cikarang (40 km, mid zone).
    fn cart() -> Value {
        json!({
            "customer": {
                "name": "Rina Wulandari",
                "email": "rina@example.com",
                "phone": "081311112222"
            },
            "shipping_address": {
                "recipient": "Rina",
                "street": "Jl. Industri Selatan 5",
                "city": "Cikarang",
                "province": "Jawa Barat",
                "postal_code": "17530"
            },
            "items": [
                {"variant_id": "v-batik-m", "quantity": 2},
                {"variant_or_product_id": "v-songket", "quantity": 1}
            ],
            "shipping_cost": 25000,
            "payment_method": "any"
        })
    }

    async fn place(app: &TestApp, body: Value) -> Value {
        let (status, body) = send(&app.router, Method::POST, "/orders", Some(body), &[]).await;
        assert_eq!(status, StatusCode::CREATED, "body: {body}");
        body
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    #[tokio::test]
    async fn test_health() {
        let app = mock_app().await;
        let (status, body) = send(&app.router, Method::GET, "/health", None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_order() {
        let app = mock_app().await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/orders",
            Some(cart()),
            &[("x-user-id", "user-42")],
        )
        .await;

        assert_eq!(status, StatusCode::CREATED, "body: {body}");
        let order = &body["data"]["order"];
        let number = order["order_number"].as_str().unwrap();
        assert!(number.starts_with("ORD-"));
        assert_eq!(order["user_id"], "user-42");
        assert_eq!(order["subtotal"], 2_200_000);
        assert_eq!(order["shipping_cost"], 25_000);
        assert_eq!(order["total"], 2_225_000);
        assert_eq!(order["status"], "PENDING");
        assert_eq!(order["payment_status"], "PENDING");
        assert_eq!(order["items"].as_array().unwrap().len(), 2);

        let payment = &body["data"]["payment"];
        assert_eq!(
            payment["payment_url"],
            format!("https://shop.example.com/orders/track/{number}")
        );
        assert_eq!(payment["fee"], 0);
        assert!(payment["expires_at"].is_string());
        assert!(body["data"]["payment_error"].is_null());

        assert_eq!(app.orders.order_count().await, 1);
        assert_eq!(app.channel.count().await, 1);
    }

    #[tokio::test]
    async fn test_create_order_with_product_id_recovers_variant() {
        let app = mock_app().await;
        let mut body = cart();
        body["items"] = json!([{"variant_or_product_id": "p-batik", "quantity": 1}]);

        let created = place(&app, body).await;
        assert_eq!(created["data"]["order"]["items"][0]["variant_id"], "v-batik-m");
    }

    #[tokio::test]
    async fn test_create_order_validation_errors() {
        let app = mock_app().await;
        let mut body = cart();
        body["customer"]["email"] = json!("");
        body["items"][1]["quantity"] = json!(0);

        let (status, body) = send(&app.router, Method::POST, "/orders", Some(body), &[]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        let fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"customer.email"));
        assert!(fields.contains(&"items[1].quantity"));
        assert_eq!(app.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_malformed_json() {
        let app = mock_app().await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/orders",
            Some(json!({"customer": "nobody"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_order_unknown_item() {
        let app = mock_app().await;
        let mut body = cart();
        body["items"][0]["variant_id"] = json!("does-not-exist");

        let (status, body) = send(&app.router, Method::POST, "/orders", Some(body), &[]).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "ITEM_NOT_FOUND");
        assert!(body["message"].as_str().unwrap().contains("does-not-exist"));
        assert_eq!(app.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_outside_delivery_region() {
        let app = mock_app().await;
        let mut body = cart();
        body["shipping_address"]["province"] = json!("Sumatera Utara");
        body["shipping_address"]["city"] = json!("Medan");

        let (status, body) = send(&app.router, Method::POST, "/orders", Some(body), &[]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "shipping_address.province");
    }

    #[tokio::test]
    async fn test_gateway_outage_keeps_order_and_allows_retry() {
        // A port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app = spawn_app(GatewayConfig {
            base_url: format!("http://{addr}"),
            project_slug: Some("toko-kain".to_string()),
            api_key: Some("test-key".to_string()),
            sandbox: false,
            timeout: std::time::Duration::from_secs(2),
        })
        .await;

        let mut body = cart();
        body["payment_method"] = json!("bni_va");
        let created = place(&app, body).await;
        assert!(created["data"]["payment"].is_null());
        assert!(created["data"]["payment_error"].is_string());
        assert_eq!(created["data"]["order"]["status"], "PENDING");

        let number = created["data"]["order"]["order_number"].as_str().unwrap();
        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/orders/{number}/payment"),
            Some(json!({"payment_method": "bni_va"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PAYMENT_GATEWAY_ERROR");
        assert_eq!(app.orders.order_count().await, 1);
    }

    // ========================================================================
    // Lookup and payments
    // ========================================================================

    #[tokio::test]
    async fn test_get_order_and_not_found() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, body) =
            send(&app.router, Method::GET, &format!("/orders/{number}"), None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["order_number"], number);

        let (status, body) =
            send(&app.router, Method::GET, "/orders/ORD-19990101-00000000", None, &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_payment_retry_and_status_with_mock_gateway() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/orders/{number}/payment"),
            Some(json!({"payment_method": "qris"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["data"]["order"]["payment"]["payment_method"], "qris");

        let (status, body) = send(
            &app.router,
            Method::GET,
            &format!("/orders/{number}/payment"),
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment_status"], "PENDING");
        assert_eq!(body["data"]["order_status"], "PENDING");
    }

    #[tokio::test]
    async fn test_simulate_payment_hidden_outside_sandbox() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, _) = send(
            &app.router,
            Method::POST,
            &format!("/orders/{number}/simulate-payment"),
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_simulate_payment_in_sandbox() {
        let app = spawn_app(GatewayConfig {
            sandbox: true,
            ..GatewayConfig::default()
        })
        .await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/orders/{number}/simulate-payment"),
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["data"]["status"], "PAID");
        assert_eq!(body["data"]["payment_status"], "PAID");

        let entries = app.audit.entries().await;
        assert_eq!(entries.last().unwrap().actor, "sandbox");
    }

    // ========================================================================
    // Shipping quotes
    // ========================================================================

    #[tokio::test]
    async fn test_shipping_quote_mid_zone() {
        let app = mock_app().await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/shipping/quote",
            Some(json!({"province": "Jawa Barat", "city": "Cikarang", "subtotal": 2200000})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_serviceable"], true);
        assert_eq!(body["data"]["cost"], 25_000);
        assert_eq!(body["data"]["distance_km"], 40.0);
    }

    #[tokio::test]
    async fn test_shipping_quote_free_near_zone_at_threshold() {
        let app = mock_app().await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/shipping/quote",
            Some(json!({"province": "DKI Jakarta", "city": "Jakarta Pusat", "subtotal": 2500000})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cost"], 0);
        assert_eq!(body["data"]["tier"]["kind"], "free");
    }

    #[tokio::test]
    async fn test_shipping_quote_not_serviceable() {
        let app = mock_app().await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/shipping/quote",
            Some(json!({"province": "Bali", "city": "Denpasar", "subtotal": 100000})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_serviceable"], false);
        assert_eq!(body["data"]["cost"], 0);
    }

    // ========================================================================
    // Admin status changes
    // ========================================================================

    #[tokio::test]
    async fn test_ship_issues_tracking_and_notifies() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, body) = send(
            &app.router,
            Method::PATCH,
            &format!("/admin/orders/{number}/status"),
            Some(json!({"status": "SHIPPED"})),
            &[("x-actor-id", "ops-3"), ("x-forwarded-for", "198.51.100.4")],
        )
        .await;

        assert_eq!(status, StatusCode::OK, "body: {body}");
        let tracking = body["data"]["tracking_number"].as_str().unwrap();
        assert!(tracking.starts_with("TRK"));
        assert_eq!(tracking.len(), 19);

        let (target, message) = app.channel.last().await.unwrap();
        assert_eq!(target, "081311112222");
        assert_eq!(
            message,
            format!("Toko Kain: pesanan {number} dikirim, resi {tracking}")
        );

        let audit = app.audit.entries().await;
        let entry = audit.last().unwrap();
        assert_eq!(entry.actor, "ops-3");
        assert_eq!(entry.old_value["status"], "PENDING");
        assert_eq!(entry.new_value["status"], "SHIPPED");
        assert_eq!(entry.request_meta["ip_address"], "198.51.100.4");

        let (status, body) = send(
            &app.router,
            Method::GET,
            &format!("/orders/lookup/{tracking}"),
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["order_number"], number);
    }

    #[tokio::test]
    async fn test_caller_tracking_number_kept() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();

        let (status, body) = send(
            &app.router,
            Method::PATCH,
            &format!("/admin/orders/{number}/status"),
            Some(json!({"status": "shipped", "tracking_number": "JNE0011223344"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tracking_number"], "JNE0011223344");
    }

    #[tokio::test]
    async fn test_repeated_status_does_not_notify_twice() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();
        let uri = format!("/admin/orders/{number}/status");

        let (status, _) =
            send(&app.router, Method::PATCH, &uri, Some(json!({"status": "PROCESSING"})), &[]).await;
        assert_eq!(status, StatusCode::OK);
        let after_first = app.channel.count().await;

        let (status, body) =
            send(&app.router, Method::PATCH, &uri, Some(json!({"status": "PROCESSING"})), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "PROCESSING");
        assert_eq!(app.channel.count().await, after_first);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_conflicts() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();
        let uri = format!("/admin/orders/{number}/status");

        let (status, body) =
            send(&app.router, Method::PATCH, &uri, Some(json!({"status": "TELEPORTED"})), &[]).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");

        for step in ["SHIPPED", "DELIVERED"] {
            let (status, _) =
                send(&app.router, Method::PATCH, &uri, Some(json!({"status": step})), &[]).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) =
            send(&app.router, Method::PATCH, &uri, Some(json!({"status": "PENDING"})), &[]).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_status_update_unknown_order() {
        let app = mock_app().await;
        let (status, _) = send(
            &app.router,
            Method::PATCH,
            "/admin/orders/ORD-19990101-00000000/status",
            Some(json!({"status": "PAID"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_delete() {
        let app = mock_app().await;
        let created = place(&app, cart()).await;
        let number = created["data"]["order"]["order_number"].as_str().unwrap();
        let uri = format!("/admin/orders/{number}");

        let (status, _) = send(&app.router, Method::DELETE, &uri, None, &[]).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(app.orders.order_count().await, 0);
        assert_eq!(app.audit.entries().await.last().unwrap().action, "ORDER_DELETED");

        let (status, _) = send(&app.router, Method::DELETE, &uri, None, &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
