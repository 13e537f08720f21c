use actix_web::{post, web, HttpRequest, HttpResponse};
use log::*;
use payment_stream_engine::WebhookIngester;

use crate::{
    config::WebhookConfig,
    data_objects::{ChecksumQuery, JsonResponse},
};

/// Receives payment status callbacks from the payment provider.
///
/// The raw body is checked against the checksum in the configured header (or the `checksum` query parameter) before
/// anything is published. The provider always gets a 200 response; the `success` flag says whether the update was
/// accepted.
#[post("/payment-status")]
pub async fn payment_status_webhook(
    req: HttpRequest,
    body: web::Bytes,
    ingester: web::Data<WebhookIngester>,
    settings: web::Data<WebhookConfig>,
) -> HttpResponse {
    trace!("🪝️ Received webhook request: {}", req.uri());
    let header_checksum =
        req.headers().get(settings.checksum_header.as_str()).and_then(|v| v.to_str().ok()).map(str::to_string);
    let checksum = header_checksum.or_else(|| {
        web::Query::<ChecksumQuery>::from_query(req.query_string()).ok().and_then(|q| q.into_inner().checksum)
    });
    let outcome = ingester.ingest(&body, checksum.as_deref()).await;
    // Webhook responses must always be in 200 range, otherwise the provider will retry
    let result = match (&outcome.event, &outcome.rejection) {
        (Some(event), _) => {
            debug!("🪝️ {event} reached {} subscriber(s)", outcome.subscribers);
            JsonResponse::success("Status update accepted.")
        },
        (None, Some(reason)) => JsonResponse::failure(reason),
        (None, None) => JsonResponse::failure("Status update was not processed."),
    };
    HttpResponse::Ok().json(result)
}
