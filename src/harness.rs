use crate::database::{self, Store, StoreKind};
use crate::generator::PayloadGen;
use crate::workload::WorkloadSpec;
use crate::workload::worker::{Worker, WorkerReport};
use anyhow::{Context, Result, anyhow, bail};
use hdrhistogram::Histogram;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thousands::Separable;
use tracing::info;

#[derive(Debug)]
pub struct RunResult {
    pub store: &'static str,
    pub threads: u64,
    pub elapsed: Duration,
    pub rows: u64,
    pub batches: u64,
    pub conflicts: u64,
    pub batch_hist_micro_sec: Histogram<u64>,
}

impl RunResult {
    pub fn throughput(&self) -> f64 {
        if self.rows == 0 || self.elapsed.is_zero() {
            0.0
        } else {
            self.rows as f64 / self.elapsed.as_secs_f64()
        }
    }
}

impl Display for RunResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let percentile = |q: f64| -> String {
            if self.batch_hist_micro_sec.is_empty() {
                "-".into()
            } else {
                self.batch_hist_micro_sec.value_at_quantile(q).separate_with_underscores()
            }
        };

        writeln!(f, "=== RUN ({}, {} threads) ===", self.store, self.threads)?;
        writeln!(
            f,
            "rows: {} | batches: {} | conflicts: {}",
            self.rows.separate_with_underscores(),
            self.batches.separate_with_underscores(),
            self.conflicts.separate_with_underscores(),
        )?;
        writeln!(
            f,
            "elapsed: {:.6} s | throughput: {} rows/s",
            self.elapsed.as_secs_f64(),
            (self.throughput() as u64).separate_with_underscores()
        )?;
        writeln!(f, "=== BATCH LATENCY ===")?;
        write!(
            f,
            "p50: {} µs | p95: {} µs | p99: {} µs | p99.9: {} µs",
            percentile(0.50),
            percentile(0.95),
            percentile(0.99),
            percentile(0.999)
        )
    }
}

pub struct Harness {
    pub spec: WorkloadSpec,
    pub store: StoreKind,
    pub table: String,
    /// Count stored rows after the run and compare them with the rows reported.
    pub verify: bool,
}

impl Harness {
    /// Opens the environment, runs the workers, and closes the environment
    /// again. Environment setup and teardown are outside the timed region.
    pub fn run(&self) -> Result<RunResult> {
        let store = database::open(self.store).context("open store environment")?;
        info!(store = store.name(), "environment opened");
        let result = self.run_on(store.as_ref());
        let closed = store.close().context("close store environment");
        let result = result?;
        closed?;
        Ok(result)
    }

    pub fn run_on(&self, store: &dyn Store) -> Result<RunResult> {
        let created_at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros() as i64;
        let payload = PayloadGen::new(created_at)?;

        let workers = (0..self.spec.thread_count)
            .map(|id| Worker::new(id, store, &self.table, &self.spec, payload.clone()))
            .collect::<Result<Vec<_>>>()?;

        let halt = AtomicBool::new(false);
        let (reports, elapsed) = thread::scope(|s| -> Result<_> {
            let halt = &halt;
            let start_time = Instant::now();
            let mut handles = Vec::with_capacity(workers.len());
            for w in workers {
                let id = w.id();
                let spawned = thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(s, move || w.run(halt));
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        // Workers already running stop at their next batch.
                        halt.store(true, Ordering::Release);
                        return Err(anyhow!(e).context(format!("spawn worker {id}")));
                    }
                }
            }
            let reports: Vec<Result<WorkerReport>> = handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("worker panicked"))))
                .collect();
            Ok((reports, start_time.elapsed()))
        })?;

        let mut result = RunResult {
            store: store.name(),
            threads: self.spec.thread_count,
            elapsed,
            rows: 0,
            batches: 0,
            conflicts: 0,
            batch_hist_micro_sec: Histogram::new_with_bounds(1, 10_000_000, 3)?,
        };
        for report in reports {
            let report = report?;
            result.rows += report.rows;
            result.batches += report.batches;
            result.conflicts += report.conflicts;
            result
                .batch_hist_micro_sec
                .add(&report.batch_hist_micro_sec)
                .map_err(|e| anyhow!("merge latency of worker {}: {e:?}", report.id))?;
        }
        info!(rows = result.rows, elapsed = ?result.elapsed, "run complete");

        if self.verify {
            let stored = store.row_count(&self.table).context("count stored rows")?;
            if stored != result.rows {
                bail!("store holds {stored} rows, workers reported {}", result.rows);
            }
        }
        Ok(result)
    }
}
