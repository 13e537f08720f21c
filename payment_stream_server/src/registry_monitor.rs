use std::time::Duration;

use log::*;
use payment_stream_engine::{ConnectionRegistry, OutputHandle};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub active_connections: usize,
    pub watched_orders: usize,
}

impl RegistrySnapshot {
    pub fn take<H: OutputHandle>(registry: &ConnectionRegistry<H>) -> Self {
        Self { active_connections: registry.active_connection_count(), watched_orders: registry.bucket_count() }
    }
}

/// Starts the registry monitor. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_registry_monitor<H: OutputHandle>(registry: ConnectionRegistry<H>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval.max(Duration::from_secs(1)));
        info!("🕰️ Registry monitor started");
        let mut last = None;
        loop {
            timer.tick().await;
            let snapshot = RegistrySnapshot::take(&registry);
            let level = if last == Some(snapshot) { Level::Debug } else { Level::Info };
            log!(
                level,
                "🕰️ {} open stream(s) across {} payment order(s)",
                snapshot.active_connections,
                snapshot.watched_orders
            );
            last = Some(snapshot);
        }
    })
}
