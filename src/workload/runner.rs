use crate::database::{Insert, Session};
use crate::generator::PayloadGen;
use crate::workload::{KeyPartitioner, WorkloadSpec};
use anyhow::{Context, Result, bail};
use tracing::{debug, trace};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Attempts rolled back on a write conflict before the batch committed.
    pub conflicts: u64,
}

enum Attempt {
    Committed,
    Conflict { key: i64 },
}

/// Runs one batch of `rows_per_txn` inserts as a single transaction.
pub struct TransactionRunner<'a> {
    spec: &'a WorkloadSpec,
    keys: KeyPartitioner,
    payload: PayloadGen,
    buf: Vec<u8>,
}

impl<'a> TransactionRunner<'a> {
    pub fn new(spec: &'a WorkloadSpec, payload: PayloadGen) -> Self {
        TransactionRunner {
            spec,
            keys: spec.partitioner(),
            payload,
            buf: Vec::new(),
        }
    }

    /// Inserts the batch for (`thread_id`, `iteration`). A conflict rolls the
    /// whole transaction back and redoes it from offset 0 with the same keys,
    /// as often as the retry policy allows. Any other failure is returned.
    pub fn run_batch(
        &mut self,
        session: &mut dyn Session,
        thread_id: u64,
        iteration: u64,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        loop {
            match self.attempt(session, thread_id, iteration)? {
                Attempt::Committed => return Ok(outcome),
                Attempt::Conflict { key } => {
                    outcome.conflicts += 1;
                    if !self.spec.retry.allows_retry(outcome.conflicts) {
                        bail!(
                            "thread {thread_id} iteration {iteration}: \
                             gave up after {} conflicts (last on key {key})",
                            outcome.conflicts
                        );
                    }
                    debug!(
                        thread_id,
                        iteration,
                        key,
                        conflicts = outcome.conflicts,
                        "write conflict, redoing batch"
                    );
                }
            }
        }
    }

    fn attempt(
        &mut self,
        session: &mut dyn Session,
        thread_id: u64,
        iteration: u64,
    ) -> Result<Attempt> {
        let mut txn = session.begin().context("begin transaction")?;
        for offset in 0..self.spec.rows_per_txn {
            let key = self.keys.key(thread_id, iteration, offset);
            self.payload.row(key).encode_into(&mut self.buf);
            trace!(key, "insert");
            let inserted = txn
                .insert(key, &self.buf)
                .with_context(|| format!("insert key {key}"))?;
            if inserted == Insert::Conflict {
                txn.abort().context("abort transaction")?;
                return Ok(Attempt::Conflict { key });
            }
        }
        if self.spec.two_phase {
            // The first key of a batch is unique across the run.
            let id = self.keys.key(thread_id, iteration, 0) as u64;
            txn.prepare(id).context("prepare transaction")?;
        }
        txn.commit().context("commit transaction")?;
        Ok(Attempt::Committed)
    }
}
