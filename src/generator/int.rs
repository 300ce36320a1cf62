//! `int` — uniform or normal random `i64` in `[min, max]`.
//!
//! Generalizes a per-width uniform-draw generator family to a single
//! `i64` width, extended with a `dist = "normal"` mode.

use rand::{thread_rng, Rng};
use rand_distr::{Distribution, Normal};

use super::{param_parse, param_str, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

const DEFAULT_MIN: i64 = 1;
const DEFAULT_MAX: i64 = 100_000; // ROWS

#[derive(Debug, Clone, Copy)]
enum Dist {
    Uniform,
    Normal { mean: f64, stddev: f64 },
}

#[derive(Debug)]
pub struct IntGenerator {
    min: i64,
    max: i64,
    dist: Dist,
}

impl IntGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let min = param_parse(params, "min", DEFAULT_MIN)?;
        let max = param_parse(params, "max", DEFAULT_MAX)?;
        if min > max {
            return Err(FinchError::config(format!("int: min ({min}) must be <= max ({max})")));
        }

        let dist = match param_str(params, "dist", "uniform") {
            "uniform" => Dist::Uniform,
            "normal" => {
                let mean = param_parse(params, "mean", min as f64 + (max - min) as f64 / 2.0)?;
                let stddev = param_parse(params, "stddev", (max - min) as f64 / 8.0)?;
                Dist::Normal { mean, stddev }
            }
            other => return Err(FinchError::config(format!("int: unknown dist {other:?}"))),
        };

        Ok(Self { min, max, dist })
    }

    fn sample(&self) -> i64 {
        match self.dist {
            Dist::Uniform => thread_rng().gen_range(self.min..=self.max),
            Dist::Normal { mean, stddev } => {
                let normal = Normal::new(mean, stddev.max(f64::EPSILON)).unwrap();
                for _ in 0..2 {
                    let v = normal.sample(&mut thread_rng()).round() as i64;
                    if v >= self.min && v <= self.max {
                        return v;
                    }
                }
                // Two draws landed outside [min, max]: fall back to the
                // mean, clamped into range.
                mean.round().clamp(self.min as f64, self.max as f64) as i64
            }
        }
    }
}

impl Generator for IntGenerator {
    fn name(&self) -> &'static str {
        "int"
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
            dist: self.dist,
        })
    }
}
