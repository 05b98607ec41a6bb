//! Background Sweeper
//!
//! Periodically purges expired nonces, rate-limit state, refresh tokens and
//! revocation entries. Each tick removes at most `batch` entries per store.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::security::gate::Gate;

/// Entries removed by one sweep, per store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub nonces: usize,
    pub rate_limits: usize,
    pub credentials: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.nonces + self.rate_limits + self.credentials
    }
}

/// Run one capped sweep over every store
pub fn sweep_once(gate: &Gate, batch: usize) -> SweepReport {
    SweepReport {
        nonces: gate.signatures().purge_nonces(batch),
        rate_limits: gate.limiter().sweep(batch),
        credentials: gate.auth().sweep(batch),
    }
}

/// Spawn the sweep loop. It exits when `shutdown` changes to `true` or its sender drops.
pub fn spawn(
    gate: Arc<Gate>,
    interval: Duration,
    batch: usize,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), batch, "Security sweeper starting");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sweep_once(&gate, batch);
                    if report.total() > 0 {
                        debug!(?report, "Swept expired security state");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Security sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }
    })
}
