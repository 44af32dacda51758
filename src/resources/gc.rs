//! Periodic garbage collection of idle, unreferenced resources.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::cache::ResourceCache;

/// Spawn the GC loop. It sweeps every `gc_interval` until `shutdown` fires.
pub fn spawn_gc(cache: ResourceCache, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        gc_loop(&cache, shutdown).await;
    })
}

async fn gc_loop(cache: &ResourceCache, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(cache.config().gc_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so the first sweep
    // happens one full interval after start.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("resource gc: shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                cache.collect_garbage();
            }
        }
    }
}
