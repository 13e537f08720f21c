use std::time::Duration;

use actix_web::test::TestRequest;
use payment_stream_engine::{integrity::compute_checksum, ActivityLogger};
use pss_common::Secret;
use serde_json::Value;

use crate::{
    config::{ServerConfig, DEFAULT_CHECKSUM_HEADER},
    server::Pipeline,
};

pub const SECRET: &str = "endpoint-test-secret";

pub fn test_config(lifetime: Duration) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.webhook.secret = Some(Secret::new(SECRET.to_string()));
    config.stream.lifetime = lifetime;
    config.stream.write_timeout = Duration::from_millis(500);
    config
}

pub fn pipeline(config: &ServerConfig) -> Pipeline {
    let _ = env_logger::try_init();
    Pipeline::new(config, ActivityLogger::default()).expect("Pipeline could not be built")
}

pub fn callback(order: &str, code: &str) -> Vec<u8> {
    format!(r#"{{"paymentOrderId":"{order}","responseCode":"{code}","message":"Provider says {code}"}}"#).into_bytes()
}

pub fn sign(payload: &[u8]) -> String {
    compute_checksum(payload, SECRET.as_bytes())
}

pub fn signed_webhook_request(payload: Vec<u8>) -> TestRequest {
    TestRequest::post()
        .uri("/webhook/payment-status")
        .insert_header((DEFAULT_CHECKSUM_HEADER, sign(&payload)))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(payload)
}

/// Splits an event-stream body into the JSON payload of each `data:` frame.
pub fn sse_messages(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).expect("Frame is not valid JSON"))
        .collect()
}
