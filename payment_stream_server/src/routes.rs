//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Status streams are long-lived, so the stream handler only sets the
//! stream up and hands the response body over to the framework; the actual waiting happens in the stream session task.
use actix_web::{get, http::header, web, HttpResponse, Responder};
use futures::stream;
use log::*;
use payment_stream_engine::{OrderLookup, PaymentOrderId, SseSink, StreamSession};

use crate::{config::StreamConfig, errors::ServerError};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Streams  ----------------------------------------------------
route!(payment_status_stream => Get "/payment/status/{payment_order_id}/stream" impl OrderLookup);
/// Route handler for the live payment status stream.
///
/// Opens a server-sent event stream for the given payment order. The first event is always
/// `{"type":"connected","paymentOrderId":"…"}`. Every status update for the order follows as
/// `{"type":"status",…}`. The stream ends after a terminal status (SUCCESS, FAILED, CANCELLED) or, failing that,
/// after the configured stream lifetime, in which case a final `{"type":"timeout",…}` event is sent.
///
/// The endpoint is public. If unknown-order rejection is switched on, ids that the order store doesn't recognise get a
/// 404 instead of a stream.
pub async fn payment_status_stream<L: OrderLookup>(
    path: web::Path<PaymentOrderId>,
    session: web::Data<StreamSession<SseSink>>,
    settings: web::Data<StreamConfig>,
    orders: web::Data<L>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    if order_id.is_empty() {
        return Err(ServerError::InvalidRequestPath("A payment order id is required".into()));
    }
    debug!("💻️ GET status stream for {order_id}");
    if settings.reject_unknown_orders {
        let exists = orders.as_ref().order_exists(&order_id).await.map_err(|e| {
            warn!("💻️ Could not look up payment order {order_id}. {e}");
            ServerError::from(e)
        })?;
        if !exists {
            debug!("💻️ Refusing to stream unknown payment order {order_id}");
            return Err(ServerError::NoRecordFound(format!("Payment order {order_id} does not exist")));
        }
    }
    let (sink, receiver) = SseSink::new(settings.buffer_size);
    // The session task owns the rest of the lifecycle. Nothing here needs to wait on it.
    let _lifecycle = session.open(order_id, sink).await;
    let body = stream::unfold(receiver, |mut rx| async move {
        rx.next_frame().await.map(|frame| (Ok::<_, actix_web::Error>(frame), rx))
    });
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}
