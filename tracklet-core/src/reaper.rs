//! Background reclamation of idle sessions.
//!
//! A supervised periodic task tied to process lifetime: it sweeps the store on
//! a fixed interval through the same close path as explicit closes, and stops
//! on a watch-channel signal. Sessions actively processing are never reaped
//! mid-run.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::SessionStore;

/// Periodic sweeper over a [`SessionStore`].
pub struct Reaper {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl Reaper {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs the sweep loop in a background task until the shutdown channel
    /// signals. Returns the task handle for supervision.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "reaper starting");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // Skip the immediate first tick

            let mut total_reaped = 0_usize;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!(total_reaped, "reaper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = self.store.sweep_expired();
                        if reaped.is_empty() {
                            debug!("sweep found no expired sessions");
                        } else {
                            total_reaped += reaped.len();
                            info!(count = reaped.len(), sessions = ?reaped, "reaped idle sessions");
                        }
                    }
                }
            }

            info!(total_reaped, "reaper stopped");
        })
    }
}
