//! `int-gaps` — maps an internal sequential `1..=input_max` counter
//! linearly onto `[min, max]`, producing a sparse, evenly spaced subset of
//! the range rather than every value in it (hence "gaps"): useful for
//! simulating a table whose primary key space has holes.
//!
//! Combines the atomic-counter pattern used for the internal
//! sequence with the wraparound arithmetic of a sequential-chunk
//! generator.

use std::sync::atomic::{AtomicI64, Ordering};

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

const DEFAULT_MIN: i64 = 1;
const DEFAULT_MAX: i64 = 100_000;
const DEFAULT_P: i64 = 20;

#[derive(Debug)]
pub struct IntGapsGenerator {
    min: i64,
    max: i64,
    input_max: i64,
    counter: AtomicI64,
}

impl IntGapsGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let min = param_parse(params, "min", DEFAULT_MIN)?;
        let max = param_parse(params, "max", DEFAULT_MAX)?;
        let p = param_parse(params, "p", DEFAULT_P)?;
        if !(1..=100).contains(&p) {
            return Err(FinchError::config(format!("int-gaps: p ({p}) must be in [1, 100]")));
        }
        if min > max {
            return Err(FinchError::config(format!("int-gaps: min ({min}) must be <= max ({max})")));
        }

        let size = max - min + 1;
        let input_max = ((size * p) / 100).max(1);

        Ok(Self {
            min,
            max,
            input_max,
            counter: AtomicI64::new(1),
        })
    }

    fn next_input(&self) -> i64 {
        loop {
            let cur = self.counter.fetch_add(1, Ordering::Relaxed);
            if cur <= self.input_max {
                return cur;
            }
            // Wrapped past input_max: reset and retry. A competing thread
            // may also be resetting; either outcome is a valid input in
            // 1..=input_max, so no further coordination is required.
            self.counter.store(1, Ordering::Relaxed);
        }
    }

    fn sample(&self) -> i64 {
        let input = self.next_input();
        if self.input_max <= 1 {
            return self.min;
        }
        let step = (self.max - self.min) as f64 / (self.input_max - 1) as f64;
        let v = self.min as f64 + (input - 1) as f64 * step;
        (v.round() as i64).clamp(self.min, self.max)
    }
}

impl Generator for IntGapsGenerator {
    fn name(&self) -> &'static str {
        "int-gaps"
    }

    fn format(&self) -> Format {
        Format::new("%d")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        vec![Value::Int(self.sample())]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(Self {
            min: self.min,
            max: self.max,
            input_max: self.input_max,
            counter: AtomicI64::new(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn produces_roughly_size_over_slope_distinct_values() {
        let mut params = Params::new();
        params.insert("min".into(), "1".into());
        params.insert("max".into(), "1000".into());
        params.insert("p".into(), "20".into());
        let g = IntGapsGenerator::from_params(&params).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..g.input_max * 2 {
            let Value::Int(v) = g.values(&RunCount::new())[0] else { panic!() };
            assert!((1..=1000).contains(&v));
            seen.insert(v);
        }
        assert_eq!(seen.len() as i64, g.input_max);
    }
}
