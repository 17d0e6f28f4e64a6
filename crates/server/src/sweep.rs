//! Background expiry sweep

use peerlink_ledger::LinkLedger;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodically deactivate links whose expiry has passed.
///
/// Redemption already rejects expired links on its own; the sweep keeps the
/// active set honest for listings between accesses.
pub async fn run(links: LinkLedger, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        match links.cleanup_expired() {
            Ok(0) => debug!("Expiry sweep: nothing to do"),
            Ok(n) => info!("Expiry sweep deactivated {} links", n),
            Err(e) => warn!("Expiry sweep failed: {}", e),
        }
    }
}
