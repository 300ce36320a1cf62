//! `xid` — a 12-byte lexicographically sortable unique identifier,
//! rendered as a 20-character base32 string. Delegates to the `xid` crate
//! (a Rust port of the same globally-unique-ID scheme MongoDB's driver
//! popularized) rather than hand-rolling the timestamp+machine+counter
//! encoding.

use super::{Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

#[derive(Debug, Clone, Copy)]
pub struct XidGenerator;

impl XidGenerator {
    pub fn from_params(_params: &Params) -> Result<Self, FinchError> {
        Ok(Self)
    }
}

impl Generator for XidGenerator {
    fn name(&self) -> &'static str {
        "xid"
    }

    fn format(&self) -> Format {
        Format::new("'%s'")
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        vec![Value::Str(xid::new().to_string())]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_twenty_char_base32() {
        let g = XidGenerator;
        let Value::Str(s) = &g.values(&RunCount::new())[0] else { panic!() };
        assert_eq!(s.len(), 20);
    }

    #[test]
    fn successive_calls_are_independent() {
        let g = XidGenerator;
        let Value::Str(a) = &g.values(&RunCount::new())[0] else { panic!() };
        let Value::Str(b) = &g.values(&RunCount::new())[0] else { panic!() };
        assert_ne!(a, b);
    }
}
