//! The no-op generator bound to the reserved key name `"_"`: produces
//! nothing, accepts nothing. Used to explicitly discard a captured column
//! in `save-columns` (`-- save-columns @x, @y, _`).

use super::Generator;
use crate::scope::RunCount;
use crate::value::{Format, Value};

#[derive(Debug, Clone, Copy)]
pub struct NoopGenerator;

impl Generator for NoopGenerator {
    fn name(&self) -> &'static str {
        "_"
    }

    fn format(&self) -> Format {
        Format::new("")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        Vec::new()
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(*self)
    }
}
