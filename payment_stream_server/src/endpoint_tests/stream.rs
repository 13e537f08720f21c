use std::time::Duration;

use actix_web::{
    http::{header, StatusCode},
    test,
    test::TestRequest,
    App,
};
use payment_stream_engine::{test_utils::wait_until, OrderLookupError};

use super::{
    helpers::{callback, pipeline, signed_webhook_request, sse_messages, test_config},
    mocks::MockOrderLookup,
};
use crate::{data_objects::JsonResponse, server::configure_routes};

#[actix_web::test]
async fn health() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let body = test::call_and_read_body(&app, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn stream_sets_event_stream_headers_and_greets() {
    let config = test_config(Duration::from_millis(200));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_9/stream").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(headers.get("X-Accel-Buffering").unwrap(), "no");
    assert_eq!(pipeline.registry.active_connection_count(), 1);

    // Nothing happens to the order, so the stream runs until it times out
    let body = test::read_body(resp).await;
    let messages = sse_messages(&body);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["type"], "connected");
    assert_eq!(messages[0]["paymentOrderId"], "ord_9");
    assert_eq!(messages[1]["type"], "timeout");
    assert_eq!(messages[1]["paymentOrderId"], "ord_9");
    assert_eq!(pipeline.registry.active_connection_count(), 0);
}

#[actix_web::test]
async fn idle_streams_carry_keep_alive_comments() {
    let mut config = test_config(Duration::from_millis(2500));
    config.stream.heartbeat = Duration::from_secs(1);
    let pipeline = pipeline(&config);
    assert_eq!(pipeline.session.heartbeat(), Duration::from_secs(1));
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_8/stream").to_request()).await;
    let body = test::read_body(resp).await;
    let text = String::from_utf8_lossy(&body);
    assert_eq!(text.matches(": keep-alive\n\n").count(), 2);
    let types = sse_messages(&body).iter().map(|m| m["type"].as_str().unwrap().to_string()).collect::<Vec<_>>();
    assert_eq!(types, vec!["connected", "timeout"]);
}

#[actix_web::test]
async fn successful_payment_ends_the_stream() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let stream = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_1/stream").to_request()).await;
    let watcher =
        test::call_service(&app, TestRequest::get().uri("/payment/status/ord_1/stream").to_request()).await;
    assert_eq!(pipeline.registry.active_connection_count(), 2);

    let pending: JsonResponse =
        test::call_and_read_body_json(&app, signed_webhook_request(callback("ord_1", "01")).to_request()).await;
    assert!(pending.success);
    let done: JsonResponse =
        test::call_and_read_body_json(&app, signed_webhook_request(callback("ord_1", "00")).to_request()).await;
    assert!(done.success);
    assert_eq!(pipeline.registry.active_connection_count(), 0);
    assert!(!pipeline.registry.has_bucket(&"ord_1".into()));

    for resp in [stream, watcher] {
        let messages = sse_messages(&test::read_body(resp).await);
        let types = messages.iter().map(|m| m["type"].as_str().unwrap()).collect::<Vec<_>>();
        assert_eq!(types, vec!["connected", "status", "status"]);
        assert_eq!(messages[1]["status"], "PENDING");
        assert_eq!(messages[2]["status"], "SUCCESS");
        assert_eq!(messages[2]["paymentOrderId"], "ord_1");
        assert_eq!(messages[2]["message"], "Provider says 00");
        assert!(messages[2]["timestamp"].is_string());
    }
}

#[actix_web::test]
async fn updates_only_reach_their_own_order() {
    let config = test_config(Duration::from_millis(300));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let other = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_2/stream").to_request()).await;
    let ack: JsonResponse =
        test::call_and_read_body_json(&app, signed_webhook_request(callback("ord_1", "24")).to_request()).await;
    assert!(ack.success);
    assert_eq!(pipeline.registry.active_connection_count(), 1);
    let types = sse_messages(&test::read_body(other).await)
        .into_iter()
        .map(|m| m["type"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(types, vec!["connected", "timeout"]);
}

#[actix_web::test]
async fn client_disconnect_is_cleaned_up() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_4/stream").to_request()).await;
    assert_eq!(pipeline.registry.active_connection_count(), 1);
    drop(resp);
    assert!(wait_until(|| pipeline.registry.active_connection_count() == 0).await);
    assert_eq!(pipeline.registry.bucket_count(), 0);
}

#[actix_web::test]
async fn unknown_orders_are_refused_when_checks_are_on() {
    let mut config = test_config(Duration::from_secs(60));
    config.stream.reject_unknown_orders = true;
    let pipeline = pipeline(&config);
    let mut orders = MockOrderLookup::new();
    orders.expect_order_exists().times(1).returning(|id| Ok(id.as_str() == "ord_known"));
    let app = test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, orders))).await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_nope/stream").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = test::read_body(resp).await;
    assert_eq!(body, r#"{"error":"The data was not found. Payment order #ord_nope does not exist"}"#);
    assert_eq!(pipeline.registry.active_connection_count(), 0);
}

#[actix_web::test]
async fn order_store_failure_is_a_server_error() {
    let mut config = test_config(Duration::from_secs(60));
    config.stream.reject_unknown_orders = true;
    let pipeline = pipeline(&config);
    let mut orders = MockOrderLookup::new();
    orders.expect_order_exists().returning(|_| Err(OrderLookupError::Unavailable("connection refused".into())));
    let app = test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, orders))).await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_1/stream").to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(pipeline.registry.active_connection_count(), 0);
}

#[actix_web::test]
async fn known_orders_stream_when_checks_are_on() {
    let mut config = test_config(Duration::from_millis(100));
    config.stream.reject_unknown_orders = true;
    let pipeline = pipeline(&config);
    let mut orders = MockOrderLookup::new();
    orders.expect_order_exists().returning(|_| Ok(true));
    let app = test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, orders))).await;
    let resp = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_known/stream").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(sse_messages(&test::read_body(resp).await)[0]["type"], "connected");
}
