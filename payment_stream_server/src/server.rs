use std::{future::ready, net::IpAddr, time::Duration};

use actix_web::{
    body::BoxBody,
    dev::{Server, Service, ServiceFactory, ServiceRequest, ServiceResponse},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    Error,
    HttpServer,
    Scope,
};
use futures::future::Either;
use log::*;
use payment_stream_engine::{
    ActivityLogger,
    AllowAllOrders,
    ConnectionRegistry,
    EventBus,
    IntegrityVerifier,
    OrderLookup,
    SseSink,
    StatusEvent,
    StreamSession,
    WebhookIngester,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    helpers::get_remote_ip,
    registry_monitor::start_registry_monitor,
    routes::{health, PaymentStatusStreamRoute},
    webhook_routes::payment_status_webhook,
};

/// The shared, long-lived pieces of the status pipeline. One instance is created at start-up and shared by every
/// worker.
#[derive(Clone)]
pub struct Pipeline {
    pub bus: EventBus<StatusEvent>,
    pub registry: ConnectionRegistry<SseSink>,
    pub session: StreamSession<SseSink>,
    /// `None` when no webhook secret is configured.
    pub ingester: Option<WebhookIngester>,
}

impl Pipeline {
    pub fn new(config: &ServerConfig, logger: ActivityLogger) -> Result<Self, ServerError> {
        let bus = EventBus::new();
        let registry = ConnectionRegistry::new(config.stream.write_timeout, logger.clone());
        registry.attach(&bus);
        let session =
            StreamSession::new(registry.clone(), config.stream.lifetime).with_heartbeat(config.stream.heartbeat);
        let ingester = match &config.webhook.secret {
            Some(secret) => {
                let mut verifier = IntegrityVerifier::new(secret.clone());
                if let Some(key) = &config.webhook.provider_public_key {
                    verifier = verifier.with_provider_key(key)?;
                    info!("🔐️ Provider public key loaded");
                }
                Some(WebhookIngester::new(verifier, bus.clone(), logger))
            },
            None => {
                if config.webhook.provider_public_key.is_some() {
                    warn!("🔐️ A provider public key is configured, but there is no webhook secret to pair it with.");
                }
                None
            },
        };
        Ok(Self { bus, registry, session, ingester })
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let pipeline = Pipeline::new(&config, ActivityLogger::default())?;
    let _monitor = start_registry_monitor(pipeline.registry.clone(), config.registry_report_interval);
    let srv = create_server_instance(config, pipeline, AllowAllOrders)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance<L>(config: ServerConfig, pipeline: Pipeline, orders: L) -> Result<Server, ServerError>
where L: OrderLookup + Clone + Send + 'static {
    let lifetime = config.stream.lifetime;
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("pss::access_log"))
            .configure(|cfg| configure_routes(cfg, &pipeline, &config, orders.clone()))
    })
    // Streams stay open for their whole lifetime, so idle connections must be allowed to outlive them
    .keep_alive(KeepAlive::Timeout(lifetime + Duration::from_secs(60)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Registers the shared state and every route. The webhook scope is only mounted when the pipeline has an ingester.
pub fn configure_routes<L>(cfg: &mut web::ServiceConfig, pipeline: &Pipeline, config: &ServerConfig, orders: L)
where L: OrderLookup + 'static {
    cfg.app_data(web::Data::new(pipeline.session.clone()))
        .app_data(web::Data::new(config.stream.clone()))
        .app_data(web::Data::new(orders))
        .service(health)
        .service(PaymentStatusStreamRoute::<L>::new());
    match &pipeline.ingester {
        Some(ingester) => {
            let scope =
                webhook_scope(config.webhook.whitelist.clone(), config.use_x_forwarded_for, config.use_forwarded);
            cfg.app_data(web::Data::new(ingester.clone()))
                .app_data(web::Data::new(config.webhook.clone()))
                .service(scope);
        },
        None => warn!("🪝️ No webhook secret is configured. Payment status callbacks will not be accepted."),
    }
}

/// The `/webhook` scope. If a whitelist is given, callers from any other address get a 403.
pub fn webhook_scope(
    whitelist: Option<Vec<IpAddr>>,
    use_x_forwarded_for: bool,
    use_forwarded: bool,
) -> Scope<
    impl ServiceFactory<ServiceRequest, Config = (), Response = ServiceResponse<BoxBody>, Error = Error, InitError = ()>,
> {
    web::scope("/webhook")
        .wrap_fn(move |req, srv| {
            let peer_ip = get_remote_ip(req.request(), use_x_forwarded_for, use_forwarded);
            let whitelisted = match (peer_ip, &whitelist) {
                (Some(ip), Some(whitelist)) => {
                    info!("🪝️ Payment status webhook from {ip}");
                    whitelist.contains(&ip)
                },
                (_, None) => true,
                (None, Some(_)) => {
                    warn!("🪝️ No IP address found in webhook remote peer request, denying access.");
                    false
                },
            };
            if whitelisted {
                Either::Left(srv.call(req))
            } else {
                let peer = peer_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "an unknown peer".into());
                Either::Right(ready(Ok(req.error_response(ServerError::ForbiddenPeer(peer)))))
            }
        })
        .service(payment_status_webhook)
}
