//! Helpers for exercising the engine without a real transport. Enabled for the crate's own tests and, for downstream
//! crates, via the `test_utils` feature.
mod memory_audit;
mod recording_handle;

use std::time::Duration;

pub use memory_audit::{AuditRecord, MemoryAuditSink};
pub use recording_handle::{RecordingHandle, WriteBehaviour};

pub fn init_test_logging() {
    let _ = env_logger::try_init();
}

/// Polls `condition` every few milliseconds for up to two seconds. Returns whether it became true.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
