//! `int-range-seq` — deterministic, mutex-synchronized sequential chunks
//! of width `size` across `[begin, end]`, wrapping back to `begin` once
//! `end` is exceeded (the last chunk before a wrap may be short).
//!
//! Derives its wrap-around arithmetic from a sequential-chunk generator
//! pattern, swapping a lock-free atomic stride for a
//! `parking_lot::Mutex` because each call must read-then-write two
//! related fields (current cursor, next cursor) atomically together — a
//! single-field `fetch_add` isn't enough once chunk width varies and a
//! short final chunk must trigger a wrap rather than an overrun.

use parking_lot::Mutex;

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

const DEFAULT_BEGIN: i64 = 1;
const DEFAULT_END: i64 = 100_000;
const DEFAULT_SIZE: i64 = 100;

#[derive(Debug)]
pub struct IntRangeSeqGenerator {
    begin: i64,
    end: i64,
    size: i64,
    cursor: Mutex<i64>,
}

impl IntRangeSeqGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let begin = param_parse(params, "begin", DEFAULT_BEGIN)?;
        let end = param_parse(params, "end", DEFAULT_END)?;
        let size = param_parse(params, "size", DEFAULT_SIZE)?;
        if begin > end {
            return Err(FinchError::config(format!("int-range-seq: begin ({begin}) must be <= end ({end})")));
        }
        if size < 1 {
            return Err(FinchError::config(format!("int-range-seq: size ({size}) must be >= 1")));
        }
        Ok(Self {
            begin,
            end,
            size,
            cursor: Mutex::new(begin),
        })
    }

    fn next_chunk(&self) -> (i64, i64) {
        let mut cursor = self.cursor.lock();
        let lower = *cursor;
        let upper = (lower + self.size - 1).min(self.end);
        *cursor = if upper >= self.end { self.begin } else { upper + 1 };
        (lower, upper)
    }
}

impl Generator for IntRangeSeqGenerator {
    fn name(&self) -> &'static str {
        "int-range-seq"
    }

    fn format(&self) -> Format {
        Format::new("%d, %d")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        let (lower, upper) = self.next_chunk();
        vec![Value::Int(lower), Value::Int(upper)]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(Self {
            begin: self.begin,
            end: self.end,
            size: self.size,
            cursor: Mutex::new(self.begin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_advance_and_wrap() {
        let mut params = Params::new();
        params.insert("begin".into(), "1".into());
        params.insert("end".into(), "10".into());
        params.insert("size".into(), "4".into());
        let g = IntRangeSeqGenerator::from_params(&params).unwrap();

        let chunk = |vals: Vec<Value>| {
            let (Value::Int(a), Value::Int(b)) = (&vals[0], &vals[1]) else {
                panic!()
            };
            (*a, *b)
        };

        assert_eq!(chunk(g.values(&RunCount::new())), (1, 4));
        assert_eq!(chunk(g.values(&RunCount::new())), (5, 8));
        assert_eq!(chunk(g.values(&RunCount::new())), (9, 10)); // short last chunk
        assert_eq!(chunk(g.values(&RunCount::new())), (1, 4)); // wrapped
    }

    #[test]
    fn period_matches_ceil_of_range_over_size() {
        let mut params = Params::new();
        params.insert("begin".into(), "1".into());
        params.insert("end".into(), "10".into());
        params.insert("size".into(), "4".into());
        let g = IntRangeSeqGenerator::from_params(&params).unwrap();

        let mut lowers = vec![];
        for _ in 0..3 {
            let vals = g.values(&RunCount::new());
            let Value::Int(a) = vals[0] else { panic!() };
            lowers.push(a);
        }
        assert_eq!(lowers, vec![1, 5, 9]);
        let Value::Int(wrapped) = g.values(&RunCount::new())[0] else { panic!() };
        assert_eq!(wrapped, 1);
    }
}
