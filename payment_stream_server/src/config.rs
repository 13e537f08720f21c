use std::{env, net::IpAddr, time::Duration};

use log::*;
use payment_stream_engine::{
    registry::DEFAULT_WRITE_TIMEOUT,
    stream_session::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_STREAM_LIFETIME},
};
use pss_common::{parse_boolean_flag, parse_env_number, Secret};

const DEFAULT_PSS_HOST: &str = "127.0.0.1";
const DEFAULT_PSS_PORT: u16 = 8370;
pub const DEFAULT_CHECKSUM_HEADER: &str = "X-Payment-Checksum";
const DEFAULT_STREAM_BUFFER: usize = 16;
const DEFAULT_REGISTRY_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    pub webhook: WebhookConfig,
    pub stream: StreamConfig,
    /// How often the registry monitor logs the number of open streams.
    pub registry_report_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// The HMAC secret shared with the payment provider. The webhook route is not mounted without it.
    pub secret: Option<Secret<String>>,
    pub checksum_header: String,
    /// If supplied, webhook calls are only accepted from these addresses.
    /// To explicitly disable the whitelist, set this to "false", "none", or "0".
    pub whitelist: Option<Vec<IpAddr>>,
    /// The provider's RSA public key, PEM or bare base64.
    pub provider_public_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub lifetime: Duration,
    /// How often a keep-alive comment is written to each open stream. This is how clients that hung up on an idle
    /// stream are found.
    pub heartbeat: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
    /// Answer 404 for payment orders the order store doesn't know about.
    pub reject_unknown_orders: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PSS_HOST.to_string(),
            port: DEFAULT_PSS_PORT,
            use_x_forwarded_for: false,
            use_forwarded: false,
            webhook: WebhookConfig::default(),
            stream: StreamConfig::default(),
            registry_report_interval: DEFAULT_REGISTRY_REPORT_INTERVAL,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            checksum_header: DEFAULT_CHECKSUM_HEADER.to_string(),
            whitelist: None,
            provider_public_key: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_STREAM_LIFETIME,
            heartbeat: DEFAULT_HEARTBEAT_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            buffer_size: DEFAULT_STREAM_BUFFER,
            reject_unknown_orders: false,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PSS_HOST").ok().unwrap_or_else(|| DEFAULT_PSS_HOST.into());
        let port = parse_env_number("PSS_PORT", env::var("PSS_PORT").ok(), DEFAULT_PSS_PORT);
        let use_x_forwarded_for = parse_boolean_flag(env::var("PSS_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("PSS_USE_FORWARDED").ok(), false);
        let registry_report_interval = Duration::from_secs(parse_env_number(
            "PSS_REGISTRY_REPORT_INTERVAL",
            env::var("PSS_REGISTRY_REPORT_INTERVAL").ok(),
            DEFAULT_REGISTRY_REPORT_INTERVAL.as_secs(),
        ));
        Self {
            host,
            port,
            use_x_forwarded_for,
            use_forwarded,
            webhook: WebhookConfig::from_env_or_defaults(),
            stream: StreamConfig::from_env_or_defaults(),
            registry_report_interval,
        }
    }
}

impl WebhookConfig {
    pub fn from_env_or_defaults() -> Self {
        let secret = env::var("PSS_WEBHOOK_SECRET").ok().filter(|s| !s.trim().is_empty()).map(Secret::new);
        if secret.is_none() {
            error!(
                "🪛️ PSS_WEBHOOK_SECRET is not set. The payment status webhook will be disabled until you set it to the \
                 checksum secret shared with your payment provider."
            );
        }
        let checksum_header = env::var("PSS_WEBHOOK_CHECKSUM_HEADER").ok().unwrap_or_else(|| {
            info!("🪛️ PSS_WEBHOOK_CHECKSUM_HEADER is not set. Using {DEFAULT_CHECKSUM_HEADER}.");
            DEFAULT_CHECKSUM_HEADER.to_string()
        });
        let whitelist = env::var("PSS_WEBHOOK_IP_WHITELIST").ok().and_then(|s| parse_whitelist(&s));
        match &whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The webhook IP whitelist was configured, but is empty. The server will run, but won't \
                     accept any payment status callbacks."
                );
            },
            None => {
                info!("🪛️ No webhook IP whitelist is set. Only checksum validation will be used.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Webhook IP whitelist: {addrs}");
            },
        }
        let provider_public_key = env::var("PSS_PROVIDER_PUBLIC_KEY").ok().filter(|s| !s.trim().is_empty());
        if provider_public_key.is_none() {
            debug!("🪛️ PSS_PROVIDER_PUBLIC_KEY is not set. Outbound payload encryption is unavailable.");
        }
        Self { secret, checksum_header, whitelist, provider_public_key }
    }
}

fn parse_whitelist(s: &str) -> Option<Vec<IpAddr>> {
    if ["none", "false", "0"].contains(&s.trim().to_lowercase().as_str()) {
        info!(
            "🪛️ Webhook IP whitelist is disabled. If this is not what you want, set PSS_WEBHOOK_IP_WHITELIST to a \
             comma-separated list of IP addresses to enable it."
        );
        return None;
    }
    let ip_addrs = s
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.parse::<IpAddr>().map_err(|e| warn!("🪛️ Ignoring invalid IP address ({s}) in PSS_WEBHOOK_IP_WHITELIST: {e}")).ok()
        })
        .collect();
    Some(ip_addrs)
}

impl StreamConfig {
    pub fn from_env_or_defaults() -> Self {
        let lifetime = Duration::from_secs(parse_env_number(
            "PSS_STREAM_TIMEOUT",
            env::var("PSS_STREAM_TIMEOUT").ok(),
            DEFAULT_STREAM_LIFETIME.as_secs(),
        ));
        let heartbeat = match parse_env_number(
            "PSS_STREAM_HEARTBEAT",
            env::var("PSS_STREAM_HEARTBEAT").ok(),
            DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        ) {
            0 => {
                warn!(
                    "🪛️ PSS_STREAM_HEARTBEAT must be at least one second. Using {}s.",
                    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
                );
                DEFAULT_HEARTBEAT_INTERVAL
            },
            secs => Duration::from_secs(secs),
        };
        let write_timeout = Duration::from_millis(parse_env_number(
            "PSS_STREAM_WRITE_TIMEOUT_MS",
            env::var("PSS_STREAM_WRITE_TIMEOUT_MS").ok(),
            DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
        ));
        let buffer_size =
            parse_env_number("PSS_STREAM_BUFFER", env::var("PSS_STREAM_BUFFER").ok(), DEFAULT_STREAM_BUFFER).max(1);
        let reject_unknown_orders = parse_boolean_flag(env::var("PSS_REJECT_UNKNOWN_ORDERS").ok(), false);
        info!(
            "🪛️ Streams live for up to {}s with a heartbeat every {}s. Writes time out after {}ms.",
            lifetime.as_secs(),
            heartbeat.as_secs(),
            write_timeout.as_millis()
        );
        Self { lifetime, heartbeat, write_timeout, buffer_size, reject_unknown_orders }
    }
}
