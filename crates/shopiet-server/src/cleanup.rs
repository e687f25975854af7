use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use shopiet_chat::ResponseCache;

/// Background task that prunes expired cache slots.
///
/// Invalidation leaves a body-less slot behind to carry its stamp;
/// those and untouched responses are dropped once their TTL passes.
pub async fn run_cache_sweeper(cache: Arc<ResponseCache>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let count = cache.purge_expired();
        if count > 0 {
            debug!("Cache sweep: pruned {} expired entries, {} left", count, cache.len());
        }
    }
}
