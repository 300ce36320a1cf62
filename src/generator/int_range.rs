//! `int-range` — a two-value `(lower, upper)` generator: `lower` is
//! uniformly random in `[min, max)`, `upper` is `lower + size - 1` clamped
//! to `max`. Uses the same uniform draw as the `int` generator,
//! extended to arity-2 output since a single `Value` can't express a
//! range.

use rand::{thread_rng, Rng};

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

const DEFAULT_MIN: i64 = 1;
const DEFAULT_MAX: i64 = 100_000;
const DEFAULT_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct IntRangeGenerator {
    min: i64,
    max: i64,
    size: i64,
}

impl IntRangeGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let min = param_parse(params, "min", DEFAULT_MIN)?;
        let max = param_parse(params, "max", DEFAULT_MAX)?;
        let size = param_parse(params, "size", DEFAULT_SIZE)?;
        if min > max {
            return Err(FinchError::config(format!("int-range: min ({min}) must be <= max ({max})")));
        }
        if size > max - min {
            return Err(FinchError::config(format!(
                "int-range: size ({size}) must be <= max - min ({})",
                max - min
            )));
        }
        Ok(Self { min, max, size })
    }
}

impl Generator for IntRangeGenerator {
    fn name(&self) -> &'static str {
        "int-range"
    }

    fn format(&self) -> Format {
        Format::new("%d, %d")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        let lower = self.min + thread_rng().gen_range(0..(self.max - self.min).max(1));
        let upper = (lower + self.size - 1).min(self.max);
        vec![Value::Int(lower), Value::Int(upper)]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_and_upper_stay_in_range_and_ordered() {
        let g = IntRangeGenerator::from_params(&Params::new()).unwrap();
        for _ in 0..1000 {
            let vals = g.values(&RunCount::new());
            let (Value::Int(lo), Value::Int(hi)) = (&vals[0], &vals[1]) else {
                panic!()
            };
            assert!(*lo >= DEFAULT_MIN && *lo <= DEFAULT_MAX);
            assert!(*hi >= *lo && *hi <= DEFAULT_MAX);
        }
    }

    #[test]
    fn size_larger_than_range_is_an_error() {
        let mut params = Params::new();
        params.insert("min".into(), "0".into());
        params.insert("max".into(), "10".into());
        params.insert("size".into(), "20".into());
        assert!(IntRangeGenerator::from_params(&params).is_err());
    }
}
