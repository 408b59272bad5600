pub mod runner;
pub mod worker;

use anyhow::{Result, ensure};
use clap::ValueEnum;
use std::fmt::{Display, Formatter};
use thousands::Separable;

/// When a worker opens its store session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum InitMode {
    /// At construction, before the clock starts.
    Eager,
    /// On the first call to run, inside the timed region.
    Lazy,
}

/// What to do after a batch hits a write conflict.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Redo the batch until it commits.
    Unbounded,
    /// Redo the batch at most this many times, then fail the run.
    Bounded(u64),
}

impl RetryPolicy {
    /// `conflicts` counts the conflicts seen so far in this batch, including the latest.
    pub fn allows_retry(&self, conflicts: u64) -> bool {
        match *self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Bounded(max) => conflicts <= max,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkloadSpec {
    pub total_rows: u64,
    pub rows_per_txn: u64,
    pub thread_count: u64,
    pub init_mode: InitMode,
    /// Prepare every transaction before committing it.
    pub two_phase: bool,
    pub retry: RetryPolicy,
}

impl WorkloadSpec {
    pub fn new(
        total_rows: u64,
        rows_per_txn: u64,
        thread_count: u64,
        init_mode: InitMode,
    ) -> Result<Self> {
        ensure!(total_rows > 0, "total_rows must be positive");
        ensure!(rows_per_txn > 0, "rows_per_txn must be positive");
        ensure!(thread_count > 0, "thread_count must be positive");
        ensure!(
            total_rows <= i64::MAX as u64,
            "total_rows must fit a signed 64-bit key"
        );
        let spec = WorkloadSpec {
            total_rows,
            rows_per_txn,
            thread_count,
            init_mode,
            two_phase: false,
            retry: RetryPolicy::Unbounded,
        };
        ensure!(
            spec.iterations() > 0,
            "{total_rows} rows do not fill one batch of {rows_per_txn} \
             for each of {thread_count} threads"
        );
        Ok(spec)
    }

    /// Batches each worker commits. Rows that do not fill a whole round of
    /// batches across all workers are dropped.
    pub fn iterations(&self) -> u64 {
        self.total_rows / self.rows_per_txn / self.thread_count
    }

    /// Rows actually inserted by a full run.
    pub fn effective_rows(&self) -> u64 {
        self.iterations() * self.rows_per_txn * self.thread_count
    }

    pub fn dropped_rows(&self) -> u64 {
        self.total_rows - self.effective_rows()
    }

    pub fn partitioner(&self) -> KeyPartitioner {
        KeyPartitioner {
            thread_count: self.thread_count,
            rows_per_txn: self.rows_per_txn,
        }
    }
}

impl Display for WorkloadSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total rows: {} | rows/txn: {} | threads: {} | init: {:?} | iterations/thread: {} | two-phase: {} | retry: {:?}",
            self.total_rows.separate_with_underscores(),
            self.rows_per_txn.separate_with_underscores(),
            self.thread_count,
            self.init_mode,
            self.iterations().separate_with_underscores(),
            self.two_phase,
            self.retry,
        )?;
        if self.dropped_rows() > 0 {
            write!(f, " | dropped: {}", self.dropped_rows().separate_with_underscores())?;
        }
        Ok(())
    }
}

/// Maps (thread, iteration, offset) to a primary key. Each round of
/// iterations covers one contiguous block of `thread_count * rows_per_txn`
/// keys, split into one slice per thread, so keys never collide and need no
/// coordination between threads.
#[derive(Copy, Clone, Debug)]
pub struct KeyPartitioner {
    thread_count: u64,
    rows_per_txn: u64,
}

impl KeyPartitioner {
    pub fn key(&self, thread_id: u64, iteration: u64, offset: u64) -> i64 {
        debug_assert!(thread_id < self.thread_count && offset < self.rows_per_txn);
        let round = iteration * self.thread_count * self.rows_per_txn;
        (round + thread_id * self.rows_per_txn + offset) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec(total: u64, per_txn: u64, threads: u64) -> WorkloadSpec {
        WorkloadSpec::new(total, per_txn, threads, InitMode::Eager).unwrap()
    }

    #[test]
    fn iterations_truncate() {
        let s = spec(1000, 100, 4);
        assert_eq!(s.iterations(), 2);
        assert_eq!(s.effective_rows(), 800);
        assert_eq!(s.dropped_rows(), 200);

        let s = spec(400, 50, 2);
        assert_eq!(s.iterations(), 4);
        assert_eq!(s.effective_rows(), 400);
        assert_eq!(s.dropped_rows(), 0);
    }

    #[test]
    fn zero_parameters_are_rejected() {
        assert!(WorkloadSpec::new(0, 1, 1, InitMode::Eager).is_err());
        assert!(WorkloadSpec::new(1, 0, 1, InitMode::Eager).is_err());
        assert!(WorkloadSpec::new(1, 1, 0, InitMode::Lazy).is_err());
        assert!(WorkloadSpec::new(u64::MAX, 1, 1, InitMode::Lazy).is_err());
    }

    #[test]
    fn more_threads_than_batches_is_rejected() {
        let err = WorkloadSpec::new(1, 1, 200_000, InitMode::Lazy).unwrap_err();
        assert!(err.to_string().contains("do not fill one batch"), "{err}");
        assert!(WorkloadSpec::new(10, 100, 1, InitMode::Eager).is_err());
        assert!(WorkloadSpec::new(399, 50, 8, InitMode::Eager).is_err());
        assert_eq!(spec(400, 50, 8).iterations(), 1);
    }

    #[test]
    fn keys_are_unique() {
        let shapes = [(400, 50, 2), (1000, 100, 4), (1000, 7, 3), (64, 1, 8), (97, 97, 1)];
        for (total, per_txn, threads) in shapes {
            let s = spec(total, per_txn, threads);
            let p = s.partitioner();
            let mut seen = HashSet::new();
            for t in 0..threads {
                for i in 0..s.iterations() {
                    for j in 0..per_txn {
                        assert!(seen.insert(p.key(t, i, j)), "duplicate key for ({t}, {i}, {j})");
                    }
                }
            }
            assert_eq!(seen.len() as u64, s.effective_rows());
            // dense: exactly 0..effective_rows
            assert!(seen.iter().all(|&k| k >= 0 && (k as u64) < s.effective_rows()));
        }
    }

    #[test]
    fn keys_are_deterministic() {
        let p = spec(1_000_000, 128, 16).partitioner();
        for (t, i, j) in [(0, 0, 0), (15, 487, 127), (3, 9, 64)] {
            assert_eq!(p.key(t, i, j), p.key(t, i, j));
        }
    }

    #[test]
    fn keys_interleave_threads_per_round() {
        let p = spec(400, 50, 2).partitioner();
        let batch = |t, i| (0..50).map(|j| p.key(t, i, j)).collect::<Vec<_>>();
        assert_eq!(batch(0, 0), (0..50).collect::<Vec<_>>());
        assert_eq!(batch(1, 0), (50..100).collect::<Vec<_>>());
        assert_eq!(batch(0, 1), (100..150).collect::<Vec<_>>());
        assert_eq!(batch(1, 3), (350..400).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_retry_stops() {
        assert!(RetryPolicy::Unbounded.allows_retry(u64::MAX));
        assert!(RetryPolicy::Bounded(2).allows_retry(1));
        assert!(RetryPolicy::Bounded(2).allows_retry(2));
        assert!(!RetryPolicy::Bounded(2).allows_retry(3));
        assert!(!RetryPolicy::Bounded(0).allows_retry(1));
    }
}
