//! `auto-inc` — a process-shared atomic counter. Every `ScopedGenerator`
//! copy derived from the same compiled `@d` key shares the same
//! underlying atomic: `Copy()` otherwise yields independent state, but
//! `auto-inc` is deliberately exempt so it stays atomic and process-wide.
//!
//! Based on a plain atomic counter generator; the only change is
//! that `copy()` clones the `Arc` around the atomic instead of
//! constructing a fresh one, since sharing across copies is the point
//! here rather than an accident to avoid.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

#[derive(Debug)]
pub struct AutoIncGenerator {
    step: i64,
    counter: Arc<AtomicI64>,
}

impl AutoIncGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let start: i64 = param_parse(params, "start", 0)?;
        let step: i64 = param_parse(params, "step", 1)?;
        Ok(Self {
            step,
            counter: Arc::new(AtomicI64::new(start)),
        })
    }
}

impl Generator for AutoIncGenerator {
    fn name(&self) -> &'static str {
        "auto-inc"
    }

    fn format(&self) -> Format {
        Format::new("%d")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        let prev = self.counter.fetch_add(self.step, Ordering::Relaxed);
        vec![Value::Int(prev + self.step)]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(Self {
            step: self.step,
            counter: self.counter.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn copies_share_the_same_counter() {
        let g = AutoIncGenerator::from_params(&Params::new()).unwrap();
        let copy = g.copy();
        let Value::Int(a) = g.values(&RunCount::new())[0] else { panic!() };
        let Value::Int(b) = copy.values(&RunCount::new())[0] else { panic!() };
        assert_eq!(b, a + 1);
    }

    #[test]
    fn concurrent_increments_produce_no_gaps_or_duplicates() {
        let g = Arc::new(AutoIncGenerator::from_params(&Params::new()).unwrap());
        let threads = 8;
        let reps = 200;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let g = g.clone();
                thread::spawn(move || {
                    (0..reps)
                        .map(|_| {
                            let Value::Int(v) = g.values(&RunCount::new())[0] else { panic!() };
                            v
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = vec![];
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len(), "no duplicates");
        assert_eq!(unique.len(), threads * reps);

        let mut sorted = all;
        sorted.sort_unstable();
        for w in sorted.windows(2) {
            assert_eq!(w[1] - w[0], 1, "no gaps");
        }
    }
}
