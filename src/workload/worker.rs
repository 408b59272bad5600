use crate::database::{Session, Store};
use crate::generator::PayloadGen;
use crate::workload::runner::TransactionRunner;
use crate::workload::{InitMode, WorkloadSpec};
use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, info_span};

pub struct WorkerReport {
    pub id: u64,
    pub rows: u64,
    pub batches: u64,
    pub conflicts: u64,
    /// Per-batch latency in microseconds, retries included.
    pub batch_hist_micro_sec: Histogram<u64>,
}

/// Drives its share of batches through one session that it owns exclusively.
pub struct Worker<'env> {
    id: u64,
    store: &'env dyn Store,
    table: &'env str,
    spec: &'env WorkloadSpec,
    payload: PayloadGen,
    session: Option<Box<dyn Session + 'env>>,
}

impl<'env> Worker<'env> {
    /// In eager mode the session is opened here, before any timing starts.
    pub fn new(
        id: u64,
        store: &'env dyn Store,
        table: &'env str,
        spec: &'env WorkloadSpec,
        payload: PayloadGen,
    ) -> Result<Self> {
        let session = match spec.init_mode {
            InitMode::Eager => Some(
                store
                    .open_session(table)
                    .with_context(|| format!("worker {id}: open session"))?,
            ),
            InitMode::Lazy => None,
        };
        Ok(Worker {
            id,
            store,
            table,
            spec,
            payload,
            session,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs every iteration, then closes the session. Stops early once `halt`
    /// is raised; raises it itself on failure. The session is released on
    /// every path.
    pub fn run(mut self, halt: &AtomicBool) -> Result<WorkerReport> {
        let _span = info_span!("worker", id = self.id).entered();
        let result = self.drive(halt);
        if result.is_err() {
            halt.store(true, Ordering::Release);
        }
        result
    }

    fn drive(&mut self, halt: &AtomicBool) -> Result<WorkerReport> {
        let id = self.id;
        let mut session = match self.session.take() {
            Some(s) => s,
            None => self
                .store
                .open_session(self.table)
                .with_context(|| format!("worker {id}: open session"))?,
        };

        let mut report = WorkerReport {
            id,
            rows: 0,
            batches: 0,
            conflicts: 0,
            batch_hist_micro_sec: Histogram::new_with_bounds(1, 10_000_000, 3)?,
        };
        let mut runner = TransactionRunner::new(self.spec, self.payload.clone());
        let iterations = self.spec.iterations();
        info!(iterations, "started");

        for i in 0..iterations {
            if halt.load(Ordering::Acquire) {
                info!(completed = i, "halted by another worker");
                break;
            }
            let start = Instant::now();
            let outcome = runner
                .run_batch(session.as_mut(), id, i)
                .with_context(|| format!("worker {id}"))?;
            report
                .batch_hist_micro_sec
                .saturating_record(start.elapsed().as_micros() as u64);
            report.rows += self.spec.rows_per_txn;
            report.batches += 1;
            report.conflicts += outcome.conflicts;
            debug!(iteration = i, conflicts = outcome.conflicts, "batch committed");
        }

        session
            .close()
            .with_context(|| format!("worker {id}: close session"))?;
        info!(rows = report.rows, conflicts = report.conflicts, "finished");
        Ok(report)
    }
}
