use std::time::Duration;

use actix_web::{http::StatusCode, test, test::TestRequest, App};

use super::{
    helpers::{callback, pipeline, sign, signed_webhook_request, sse_messages, test_config},
    mocks::MockOrderLookup,
};
use crate::{
    config::{ServerConfig, DEFAULT_CHECKSUM_HEADER},
    data_objects::JsonResponse,
    server::{configure_routes, Pipeline},
};

#[actix_web::test]
async fn invalid_checksum_is_acknowledged_but_not_published() {
    let config = test_config(Duration::from_millis(300));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let stream = test::call_service(&app, TestRequest::get().uri("/payment/status/ord_2/stream").to_request()).await;

    let payload = callback("ord_2", "00");
    let req = TestRequest::post()
        .uri("/webhook/payment-status")
        .insert_header((DEFAULT_CHECKSUM_HEADER, "0".repeat(64)))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ack: JsonResponse = test::read_body_json(resp).await;
    assert!(!ack.success);
    assert_eq!(ack.message, "The checksum does not match the payload.");

    // The viewer is unaffected and still open
    assert_eq!(pipeline.registry.active_connection_count(), 1);
    let types = sse_messages(&test::read_body(stream).await)
        .into_iter()
        .map(|m| m["type"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(types, vec!["connected", "timeout"]);
}

#[actix_web::test]
async fn missing_checksum_is_rejected() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let req = TestRequest::post().uri("/webhook/payment-status").set_payload(callback("ord_1", "00")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ack: JsonResponse = test::read_body_json(resp).await;
    assert_eq!(ack, JsonResponse::failure("No checksum was provided."));
}

#[actix_web::test]
async fn checksum_may_be_passed_as_a_query_parameter() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let payload = callback("ord_1", "09");
    let uri = format!("/webhook/payment-status?checksum={}", sign(&payload));
    let req = TestRequest::post().uri(&uri).set_payload(payload).to_request();
    let ack: JsonResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ack, JsonResponse::success("Status update accepted."));
}

#[actix_web::test]
async fn signed_garbage_is_acknowledged_as_a_failure() {
    let config = test_config(Duration::from_secs(60));
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let ack: JsonResponse =
        test::call_and_read_body_json(&app, signed_webhook_request(b"[1,2,3]".to_vec()).to_request()).await;
    assert!(!ack.success);
    assert!(ack.message.starts_with("The payload could not be read."));
}

#[actix_web::test]
async fn custom_checksum_header() {
    let mut config = test_config(Duration::from_secs(60));
    config.webhook.checksum_header = "X-Signature".into();
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let payload = callback("ord_1", "00");
    let req = TestRequest::post()
        .uri("/webhook/payment-status")
        .insert_header(("X-Signature", sign(&payload)))
        .set_payload(payload)
        .to_request();
    let ack: JsonResponse = test::call_and_read_body_json(&app, req).await;
    assert!(ack.success);
}

#[actix_web::test]
async fn whitelist_blocks_other_peers() {
    let mut config = test_config(Duration::from_secs(60));
    config.webhook.whitelist = Some(vec!["10.1.1.1".parse().unwrap()]);
    let pipeline = pipeline(&config);
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;

    let req = signed_webhook_request(callback("ord_1", "00")).peer_addr("10.9.9.9:5000".parse().unwrap()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = test::read_body(resp).await;
    assert_eq!(body, r#"{"error":"Requests from 10.9.9.9 are not allowed on this route."}"#);

    let req = signed_webhook_request(callback("ord_1", "00")).peer_addr("10.1.1.1:5000".parse().unwrap()).to_request();
    let ack: JsonResponse = test::call_and_read_body_json(&app, req).await;
    assert!(ack.success);
}

#[actix_web::test]
async fn webhook_is_not_mounted_without_a_secret() {
    let config = ServerConfig::default();
    let pipeline = pipeline(&config);
    assert!(pipeline.ingester.is_none());
    let app =
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &pipeline, &config, MockOrderLookup::new())))
            .await;
    let resp = test::call_service(&app, signed_webhook_request(callback("ord_1", "00")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn malformed_provider_key_fails_start_up() {
    let mut config = test_config(Duration::from_secs(60));
    config.webhook.provider_public_key = Some("definitely not a key".into());
    let result = Pipeline::new(&config, Default::default());
    assert!(result.is_err());
}
