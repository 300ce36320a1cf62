//! Stats & reporting: per-client latency histograms and outcome
//! counters, merged into a stage-level report at `stats.freq`.
//!
//! Uses `hdrhistogram` for latency distributions, the way a benchmark
//! driver typically does; Finch keys its histograms by `(trx, stmt_index)`
//! rather than by operation kind, since a stage may run several distinct
//! trx files concurrently.

use std::collections::HashMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::compiler::StatementFlags;

/// One statement execution's outcome, as recorded by the client loop.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Ok,
    /// Error surfaced but the stage continues (`ECONTINUE`/`ESILENT`).
    Recovered,
    /// Error that aborted the stage.
    Aborted,
}

#[derive(Default)]
struct Bucket {
    histogram: Option<Histogram<u64>>,
    ok: u64,
    recovered: u64,
    aborted: u64,
}

impl Bucket {
    fn record(&mut self, elapsed: Duration, outcome: Outcome) {
        let hist = self
            .histogram
            .get_or_insert_with(|| Histogram::new_with_bounds(1, 60_000_000, 3).expect("valid histogram bounds"));
        let _ = hist.record(elapsed.as_micros() as u64);
        match outcome {
            Outcome::Ok => self.ok += 1,
            Outcome::Recovered => self.recovered += 1,
            Outcome::Aborted => self.aborted += 1,
        }
    }
}

/// A single client's local stats, flushed into the stage-level
/// [`StatsSink`] at `stats.freq`.
#[derive(Default)]
pub struct ClientStats {
    buckets: HashMap<(String, usize), Bucket>,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, trx: &str, stmt_index: usize, _flags: StatementFlags, elapsed: Duration, outcome: Outcome) {
        self.buckets.entry((trx.to_string(), stmt_index)).or_default().record(elapsed, outcome);
    }
}

/// Merged per-statement report row.
#[derive(Debug, Clone)]
pub struct Report {
    pub trx: String,
    pub stmt_index: usize,
    pub count: u64,
    pub ok: u64,
    pub recovered: u64,
    pub aborted: u64,
    pub p50_micros: u64,
    pub p99_micros: u64,
    pub max_micros: u64,
}

/// Stage-wide merge point every client's [`ClientStats`] flushes into.
pub struct StatsSink {
    merged: Mutex<HashMap<(String, usize), Bucket>>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self {
            merged: Mutex::new(HashMap::new()),
        }
    }

    pub fn merge(&self, client: ClientStats) {
        let mut merged = self.merged.lock();
        for (key, bucket) in client.buckets {
            let entry = merged.entry(key).or_default();
            entry.ok += bucket.ok;
            entry.recovered += bucket.recovered;
            entry.aborted += bucket.aborted;
            if let Some(h) = bucket.histogram {
                match &mut entry.histogram {
                    Some(existing) => existing.add(&h).expect("compatible histogram bounds"),
                    None => entry.histogram = Some(h),
                }
            }
        }
    }

    pub fn report(&self) -> Vec<Report> {
        let merged = self.merged.lock();
        merged
            .iter()
            .map(|((trx, idx), bucket)| {
                let (p50, p99, max) = match &bucket.histogram {
                    Some(h) => (h.value_at_quantile(0.5), h.value_at_quantile(0.99), h.max()),
                    None => (0, 0, 0),
                };
                Report {
                    trx: trx.clone(),
                    stmt_index: *idx,
                    count: bucket.ok + bucket.recovered + bucket.aborted,
                    ok: bucket.ok,
                    recovered: bucket.recovered,
                    aborted: bucket.aborted,
                    p50_micros: p50,
                    p99_micros: p99,
                    max_micros: max,
                }
            })
            .collect()
    }
}

impl Default for StatsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_counts_and_histograms_across_clients() {
        let sink = StatsSink::new();

        let mut c1 = ClientStats::new();
        c1.record("read", 0, StatementFlags::RESULT_SET, Duration::from_millis(5), Outcome::Ok);
        let mut c2 = ClientStats::new();
        c2.record("read", 0, StatementFlags::RESULT_SET, Duration::from_millis(10), Outcome::Recovered);

        sink.merge(c1);
        sink.merge(c2);

        let report = sink.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].count, 2);
        assert_eq!(report[0].ok, 1);
        assert_eq!(report[0].recovered, 1);
    }

    #[test]
    fn distinct_trx_statements_get_distinct_buckets() {
        let sink = StatsSink::new();
        let mut c = ClientStats::new();
        c.record("a", 0, StatementFlags::WRITE, Duration::from_millis(1), Outcome::Ok);
        c.record("b", 0, StatementFlags::WRITE, Duration::from_millis(1), Outcome::Ok);
        sink.merge(c);
        assert_eq!(sink.report().len(), 2);
    }
}
