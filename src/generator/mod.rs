//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Generator factory & library (component A).
//!
//! A single behavioral trait plus a factory registry, generalized from the
//! `Generator`/`NumberGenerator`/`Counter`/`AcknowledgedCounter` family
//! above: instead of one macro-generated struct per numeric width (the
//! original targets YCSB's `u8..isize` key/field generators), Finch
//! generators operate on a single untyped [`Value`] because SQL parameters
//! arrive and leave as text/bytes regardless of their underlying width.
//!
//! `ScopedGenerator` (in [`crate::scope`]) and every concrete generator
//! here satisfy the same [`Generator`] trait, so the client loop never
//! special-cases either one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FinchError;
use crate::scope::RunCount;
use crate::value::{Format, Value};

pub mod auto_inc;
pub mod column;
pub mod constant;
pub mod int;
pub mod int_gaps;
pub mod int_range;
pub mod int_range_seq;
pub mod noop;
pub mod str_fill_az;
pub mod xid;

/// The behavioral interface every generator — built-in or user-pluggable —
/// must implement. Object-safe by construction so generators are stored as
/// `Box<dyn Generator>`/`Arc<dyn Generator>` without an enum of variants.
pub trait Generator: Send + Sync + std::fmt::Debug {
    /// Stable generator type name (e.g. `"int-range-seq"`).
    fn name(&self) -> &'static str;

    /// Arity (number of values produced per call) and printf-style
    /// template used to splice those values into unprepared SQL text.
    fn format(&self) -> Format;

    /// Produce the next value(s). Must always return exactly
    /// `self.format().arity` values.
    fn values(&self, rc: &RunCount) -> Vec<Value>;

    /// Accept a value scanned from a previous statement's result set.
    /// Only `column`-style generators care; every other generator keeps
    /// the default no-op.
    fn scan(&self, _value: Value) {}

    /// Deep copy preserving configuration but with independent internal
    /// state (except deliberate process-wide state such as `auto-inc`'s
    /// shared counter, which intentionally stays shared across copies).
    fn copy(&self) -> Box<dyn Generator>;
}

/// Typed constructor parameters passed from the stage YAML's
/// `trx[].data[key].params` map. Generators parse what they need and
/// reject unknown/invalid values eagerly, at compile time, rather than at
/// the first call.
pub type Params = HashMap<String, String>;

pub fn param_str<'a>(params: &'a Params, key: &str, default: &'a str) -> &'a str {
    params.get(key).map(|s| s.as_str()).unwrap_or(default)
}

pub fn param_parse<T: std::str::FromStr>(
    params: &Params,
    key: &str,
    default: T,
) -> Result<T, FinchError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| FinchError::config(format!("invalid value for parameter {key:?}: {raw:?}"))),
    }
}

/// Maps a generator type name to its constructor. Built in generators are
/// registered once in [`Factory::with_builtins`]; nothing prevents a host
/// application from registering additional ones with [`Factory::register`].
pub struct Factory {
    constructors: HashMap<&'static str, Box<dyn Fn(&Params) -> Result<Box<dyn Generator>, FinchError> + Send + Sync>>,
}

impl Factory {
    pub fn with_builtins() -> Self {
        let mut f = Self {
            constructors: HashMap::new(),
        };
        f.register("int", |p| int::IntGenerator::from_params(p).map(|g| Box::new(g) as _));
        f.register("int-gaps", |p| {
            int_gaps::IntGapsGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f.register("int-range", |p| {
            int_range::IntRangeGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f.register("int-range-seq", |p| {
            int_range_seq::IntRangeSeqGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f.register("auto-inc", |p| {
            auto_inc::AutoIncGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f.register("str-fill-az", |p| {
            str_fill_az::StrFillAzGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f.register("xid", |p| xid::XidGenerator::from_params(p).map(|g| Box::new(g) as _));
        f.register("column", |p| {
            column::ColumnGenerator::from_params(p).map(|g| Box::new(g) as _)
        });
        f
    }

    pub fn register<F>(&mut self, name: &'static str, ctor: F)
    where
        F: Fn(&Params) -> Result<Box<dyn Generator>, FinchError> + Send + Sync + 'static,
    {
        self.constructors.insert(name, Box::new(ctor));
    }

    pub fn build(&self, name: &str, params: &Params) -> Result<Arc<dyn Generator>, FinchError> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| FinchError::config(format!("unknown generator type {name:?}")))?;
        Ok(Arc::from(ctor(params)?))
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::with_builtins()
    }
}
