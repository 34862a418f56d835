use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use ulid::Ulid;

use crate::effects::Effect;
use crate::engine::Engine;
use crate::model::Ms;

/// What one reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue bookings moved to checked-out through a normal checkout.
    pub promoted: Vec<Ulid>,
    /// Overdue bookings whose checkout failed and were forced to checked-out.
    pub degraded: Vec<Ulid>,
    /// Invoice numbers assigned to earlier checkouts that lacked one.
    pub backfilled: Vec<(Ulid, String)>,
    /// Side effects returned by the checkouts, left for the dispatcher.
    pub effects: Vec<Effect>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.degraded.is_empty() && self.backfilled.is_empty()
    }
}

/// Check out every booking past its departure time, then backfill missing
/// invoice numbers. Each booking is handled on its own: one failure never
/// stops the pass.
pub async fn sweep_once(engine: &Engine, now: Ms) -> SweepReport {
    let mut report = SweepReport::default();

    for id in engine.collect_overdue(now).await {
        match engine.check_out(id, now).await {
            Ok(t) if t.changed => {
                report.promoted.push(id);
                report.effects.extend(t.effects);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("sweep checkout of {id} failed: {e}");
                match engine.force_check_out(id, now).await {
                    Ok(_) => report.degraded.push(id),
                    Err(e) => tracing::error!("sweep could not close {id}: {e}"),
                }
            }
        }
    }

    for id in engine.collect_missing_invoices().await {
        match engine.backfill_invoice(id, now).await {
            Ok(Some(number)) => report.backfilled.push((id, number)),
            Ok(None) => {}
            Err(e) => tracing::debug!("invoice backfill for {id} deferred: {e}"),
        }
    }

    metrics::counter!(crate::observability::SWEEP_PROMOTED_TOTAL).increment(report.promoted.len() as u64);
    metrics::counter!(crate::observability::SWEEP_DEGRADED_TOTAL).increment(report.degraded.len() as u64);
    report
}

/// Background task running [`sweep_once`] on a fixed interval.
pub async fn run_sweep(engine: Arc<Engine>, every: Duration, effects: mpsc::Sender<Vec<Effect>>) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let mut report = sweep_once(&engine, crate::engine::now_ms()).await;
        if !report.effects.is_empty() && effects.send(std::mem::take(&mut report.effects)).await.is_err() {
            tracing::warn!("effect dispatcher gone; dropping sweep effects");
        }
        if !report.is_empty() {
            info!(
                "sweep: {} checked out, {} degraded, {} invoices backfilled",
                report.promoted.len(),
                report.degraded.len(),
                report.backfilled.len()
            );
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
