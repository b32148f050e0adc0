//! Fixed-interval snapshot synchronization.
//!
//! One synchronizer per mounted view. Entering the active state performs an
//! immediate fetch, then refetches on the interval; missed ticks are skipped
//! so at most one fetch is in flight. Snapshots carry a monotonically
//! increasing sequence number and are applied only when newer than the last
//! applied one. Stopping the synchronizer (explicitly or by drop) cancels the
//! loop and abandons any in-flight fetch — its result never reaches the view.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::pending;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use paydesk_core::error::StoreError;

use crate::bus::StoreEvent;

/// Sequence bookkeeping, observable so tests can assert that cancellation
/// really prevented a snapshot from landing.
#[derive(Debug, Default)]
pub struct SyncState {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl SyncState {
    /// Sequence number of the last snapshot applied to the view; 0 before
    /// the first one lands.
    pub fn applied_seq(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn issued_seq(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

pub struct PollingSynchronizer {
    shutdown: broadcast::Sender<()>,
    state: Arc<SyncState>,
    handle: JoinHandle<()>,
}

impl PollingSynchronizer {
    /// Start polling. `fetch` produces the current snapshot, `on_snapshot`
    /// republishes it to the view.
    pub fn spawn<T, Fut, Fetch, Apply>(interval: Duration, fetch: Fetch, on_snapshot: Apply) -> Self
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        Fetch: Fn() -> Fut + Send + 'static,
        Apply: FnMut(T) + Send + 'static,
    {
        Self::spawn_inner(interval, fetch, on_snapshot, None, |_| true)
    }

    /// Like [`spawn`](Self::spawn), but also refetches immediately when a bus
    /// event passes `relevant` — another view's mutation shows up without
    /// waiting for the next tick.
    pub fn spawn_with_nudge<T, Fut, Fetch, Apply, Filter>(
        interval: Duration,
        fetch: Fetch,
        on_snapshot: Apply,
        nudge: broadcast::Receiver<StoreEvent>,
        relevant: Filter,
    ) -> Self
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        Fetch: Fn() -> Fut + Send + 'static,
        Apply: FnMut(T) + Send + 'static,
        Filter: Fn(&StoreEvent) -> bool + Send + Sync + 'static,
    {
        Self::spawn_inner(interval, fetch, on_snapshot, Some(nudge), relevant)
    }

    fn spawn_inner<T, Fut, Fetch, Apply, Filter>(
        interval: Duration,
        fetch: Fetch,
        mut on_snapshot: Apply,
        mut nudge: Option<broadcast::Receiver<StoreEvent>>,
        relevant: Filter,
    ) -> Self
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        Fetch: Fn() -> Fut + Send + 'static,
        Apply: FnMut(T) + Send + 'static,
        Filter: Fn(&StoreEvent) -> bool + Send + Sync + 'static,
    {
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let state = Arc::new(SyncState::default());
        let task_state = state.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                // The first tick completes immediately: mount implies fetch.
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = next_relevant_event(&mut nudge, &relevant) => {}
                    _ = shutdown_rx.recv() => break,
                }

                let seq = task_state.issued.fetch_add(1, Ordering::SeqCst) + 1;

                let result = tokio::select! {
                    r = fetch() => r,
                    // Cancellation mid-flight: drop the future, never apply.
                    _ = shutdown_rx.recv() => break,
                };

                match result {
                    Ok(snapshot) => {
                        // Apply only if no newer snapshot has landed.
                        if task_state.applied.fetch_max(seq, Ordering::SeqCst) < seq {
                            on_snapshot(snapshot);
                        }
                    }
                    // The loop keeps ticking either way; the next fetch
                    // retries unconditionally.
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, seq, "poll fetch failed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, seq, "poll fetch rejected");
                    }
                }
            }
        });

        Self {
            shutdown,
            state,
            handle,
        }
    }

    /// Leave the active state. Idempotent; any in-flight fetch is abandoned.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn state(&self) -> Arc<SyncState> {
        self.state.clone()
    }
}

impl Drop for PollingSynchronizer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Resolve on the next event passing the filter; never resolves without a
/// receiver or once the bus closed.
async fn next_relevant_event<F>(
    nudge: &mut Option<broadcast::Receiver<StoreEvent>>,
    relevant: &F,
) -> StoreEvent
where
    F: Fn(&StoreEvent) -> bool,
{
    match nudge {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(event) if relevant(&event) => return event,
                Ok(_) => continue,
                // Lagged: missed events are recovered by the next tick anyway.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => pending().await,
            }
        },
        None => pending().await,
    }
}
