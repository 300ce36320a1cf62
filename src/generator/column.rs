//! `column` — captures a column value from a preceding statement's result
//! set via [`Generator::scan`] and replays it as an input to a later
//! statement (e.g. `-- save-columns @x, @y` followed by `INSERT ... VALUES
//! (@x, @y)`).
//!
//! Values are stored as raw bytes precisely to avoid the lossy round trip
//! a string conversion would force — `0x75` and the ASCII character `'u'`
//! must stay distinguishable, which is why [`crate::value::Value`] has a
//! dedicated `Bytes` variant instead of normalizing everything to `Str`.

use parking_lot::RwLock;

use super::{param_parse, Generator, Params};
use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

#[derive(Debug)]
pub struct ColumnGenerator {
    /// `None` means "infer from the captured value's type at render time"
    /// (see `Format`'s `%v` specifier): numeric values render unquoted,
    /// everything else quoted. `Some(_)` is an explicit author override
    /// that applies regardless of what gets captured.
    ///
    /// The inferred case can't be decided here at compile time — `scan`
    /// hasn't run yet when the statement's query text is built, so
    /// `captured` is always `None` then. `%v` defers the decision to
    /// `Format::render`, which runs after every `scan`.
    quote_value: Option<bool>,
    captured: RwLock<Option<Value>>,
}

impl ColumnGenerator {
    pub fn from_params(params: &Params) -> Result<Self, FinchError> {
        let quote_value = match params.get("quote-value") {
            None => None,
            Some(_) => Some(param_parse(params, "quote-value", false)?),
        };
        Ok(Self {
            quote_value,
            captured: RwLock::new(None),
        })
    }
}

impl Generator for ColumnGenerator {
    fn name(&self) -> &'static str {
        "column"
    }

    fn format(&self) -> Format {
        match self.quote_value {
            Some(true) => Format::new("'%s'"),
            Some(false) => Format::new("%d"),
            None => Format::new("%v"),
        }
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        let captured = self.captured.read();
        let value = captured
            .clone()
            .unwrap_or_else(|| panic!("internal invariant violation: column generator read before its first scan"));
        vec![value]
    }

    fn scan(&self, value: Value) {
        *self.captured.write() = Some(value);
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(Self {
            quote_value: self.quote_value,
            captured: RwLock::new(self.captured.read().clone()),
        })
    }
}
