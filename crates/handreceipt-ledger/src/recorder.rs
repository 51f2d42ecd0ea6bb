//! Forwarding committed events from the outbox to the ledger.
//!
//! Ledger failures never touch domain state. An entry stays in the outbox
//! until the ledger acknowledged it, and entries are forwarded strictly in
//! commit order: a failure stops the batch so nothing overtakes it.

use std::sync::Arc;
use std::time::Duration;

use handreceipt_core::{CustodyStore, LedgerEvent, OutboxEntry, TransitionNotifier};
use tokio::sync::{Notify, broadcast};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::client::{LedgerClient, LedgerEventId};
use crate::error::LedgerError;

/// Default number of outbox entries read per pass.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default delay between retries while entries remain undelivered.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub batch_size: usize,
    pub retry_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Result of forwarding a sequence of entries.
#[derive(Debug, Default)]
pub struct RecordOutcome {
    /// `(outbox sequence, ledger id)` for each appended entry, in order.
    pub delivered: Vec<(u64, LedgerEventId)>,
    /// The entry that stopped forwarding, if any.
    pub failed: Option<(u64, LedgerError)>,
}

/// Summary of one [`AuditLedgerRecorder::flush`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Outbox sequence of the entry that failed, if the flush stopped early.
    pub failed_at: Option<u64>,
}

pub struct AuditLedgerRecorder<S: CustodyStore, L: LedgerClient> {
    store: Arc<S>,
    ledger: Arc<L>,
    config: RecorderConfig,
    wake: Arc<Notify>,
}

impl<S: CustodyStore, L: LedgerClient> AuditLedgerRecorder<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, config: RecorderConfig) -> Self {
        Self {
            store,
            ledger,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// A notifier that wakes the background loop after each commit.
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            wake: self.wake.clone(),
        }
    }

    /// Appends `entries` in order, keyed by their outbox sequence, stopping
    /// at the first failure. Performs no validation of the events.
    pub async fn record(&self, entries: &[OutboxEntry]) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        for entry in entries {
            match self.ledger.append(entry.sequence, &entry.event).await {
                Ok(id) => outcome.delivered.push((entry.sequence, id)),
                Err(e) => {
                    outcome.failed = Some((entry.sequence, e));
                    break;
                }
            }
        }
        outcome
    }

    /// Drains the outbox until it is empty or an append fails.
    ///
    /// Delivered entries are acknowledged; a failed entry gets its attempt
    /// count and last error recorded and stays at the head of the outbox.
    pub async fn flush(&self) -> Result<FlushReport, LedgerError> {
        let mut report = FlushReport::default();
        loop {
            let batch = self.store.read(|tx| tx.outbox(self.config.batch_size))?;
            if batch.is_empty() {
                break;
            }

            let outcome = self.record(&batch).await;
            self.store.transact(|tx| {
                for (sequence, _) in &outcome.delivered {
                    tx.ack_event(*sequence)?;
                }
                Ok(())
            })?;
            report.delivered += outcome.delivered.len();

            if let Some((sequence, error)) = outcome.failed {
                let attempts = batch
                    .iter()
                    .find(|e| e.sequence == sequence)
                    .map_or(1, |e| e.attempts + 1);
                let message = error.to_string();
                self.store
                    .transact(|tx| tx.record_attempt(sequence, &message))?;
                warn!(
                    sequence,
                    attempts,
                    error = %message,
                    "ledger append failed; entry kept for retry"
                );
                report.failed_at = Some(sequence);
                break;
            }

            if batch.len() < self.config.batch_size {
                break;
            }
        }

        if report.delivered > 0 {
            debug!(delivered = report.delivered, "outbox flushed");
        }
        Ok(report)
    }

    /// Flushes on every wake-up and retry tick until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.retry_interval.as_millis() as u64,
            "Ledger recorder started"
        );

        let mut interval = tokio::time::interval(self.config.retry_interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Ledger recorder shutting down");
                    break;
                }
                _ = self.wake.notified() => self.flush_logged().await,
                _ = interval.tick() => self.flush_logged().await,
            }
        }
    }

    /// Spawn [`run`](Self::run) as a background task
    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Spawn the loop with its own shutdown channel.
    pub fn start(self: Arc<Self>) -> RecorderTask {
        let (shutdown, receiver) = broadcast::channel(1);
        RecorderTask::new(shutdown, self.spawn(receiver))
    }

    async fn flush_logged(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "outbox flush failed");
        }
    }
}

/// A running recorder loop.
pub struct RecorderTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl RecorderTask {
    pub fn new(shutdown: broadcast::Sender<()>, handle: JoinHandle<()>) -> Self {
        Self { shutdown, handle }
    }

    /// Signals shutdown and waits for the loop to return.
    pub async fn stop(self) -> Result<(), JoinError> {
        if self.shutdown.send(()).is_err() {
            debug!("ledger recorder already stopped");
        }
        self.handle.await
    }
}

/// Wakes the recorder when the engine commits events.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    wake: Arc<Notify>,
}

impl TransitionNotifier for RecorderHandle {
    fn notify(&self, _events: &[LedgerEvent]) {
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use handreceipt_core::{
        CredentialKey, CustodyEngine, EngineConfig, InMemoryCustodyStore, NewProperty, UserId,
    };

    fn setup(
        batch_size: usize,
    ) -> (
        CustodyEngine<InMemoryCustodyStore>,
        AuditLedgerRecorder<InMemoryCustodyStore, InMemoryLedger>,
    ) {
        let store = Arc::new(InMemoryCustodyStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let recorder = AuditLedgerRecorder::new(
            store.clone(),
            ledger,
            RecorderConfig {
                batch_size,
                ..Default::default()
            },
        );
        let engine = CustodyEngine::new(store, CredentialKey::derive(b"k"), EngineConfig::default());
        (engine, recorder)
    }

    fn register(engine: &CustodyEngine<InMemoryCustodyStore>, serial: &str) {
        engine
            .register_property(NewProperty::new(serial, "M4", "rifle", UserId(1)), UserId(1), 0)
            .unwrap();
    }

    fn outbox(engine: &CustodyEngine<InMemoryCustodyStore>) -> Vec<OutboxEntry> {
        engine.store().read(|tx| tx.outbox(usize::MAX)).unwrap()
    }

    #[tokio::test]
    async fn test_flush_drains_across_batches() {
        let (engine, recorder) = setup(2);
        for serial in ["A-1", "A-2", "A-3", "A-4", "A-5"] {
            register(&engine, serial);
        }

        let report = recorder.flush().await.unwrap();
        assert_eq!(report.delivered, 5);
        assert_eq!(report.failed_at, None);
        assert!(outbox(&engine).is_empty());
        assert_eq!(recorder.ledger().len(), 5);
    }

    #[tokio::test]
    async fn test_failure_stops_in_order() {
        let (engine, recorder) = setup(10);
        for serial in ["A-1", "A-2", "A-3"] {
            register(&engine, serial);
        }
        let second = outbox(&engine)[1].sequence;
        recorder.ledger().reject_key(second);

        let report = recorder.flush().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed_at, Some(second));

        let pending = outbox(&engine);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sequence, second);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());
        assert_eq!(pending[1].attempts, 0);

        recorder.ledger().clear_rejections();
        let report = recorder.flush().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert!(outbox(&engine).is_empty());
        recorder.ledger().verify_chain().unwrap();
    }

    #[tokio::test]
    async fn test_outage_never_touches_domain_state() {
        let (engine, recorder) = setup(10);
        register(&engine, "A-1");
        recorder.ledger().set_available(false);

        recorder.flush().await.unwrap();
        recorder.flush().await.unwrap();
        assert_eq!(outbox(&engine)[0].attempts, 2);
        assert_eq!(engine.property_by_serial("A-1").unwrap().holder, UserId(1));
        assert!(recorder.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_handle_wakes_run_loop() {
        let (engine, recorder) = setup(10);
        let recorder = Arc::new(recorder);
        let engine = engine.with_notifier(Arc::new(recorder.handle()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = recorder.clone().spawn(shutdown_rx);

        register(&engine, "A-1");
        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.ledger().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(outbox(&engine).is_empty());
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (engine, recorder) = setup(10);
        register(&engine, "A-1");
        let recorder = Arc::new(recorder);

        let task = recorder.clone().start();
        tokio::time::timeout(Duration::from_secs(2), task.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_loop_exited() {
        let (_engine, recorder) = setup(10);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = Arc::new(recorder).spawn(shutdown_rx);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while shutdown_tx.receiver_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Nobody is listening any more; stopping still joins cleanly.
        RecorderTask::new(shutdown_tx, handle).stop().await.unwrap();
    }
}
