//! Finch: a MySQL benchmark driver that compiles parameterized `.trx` SQL
//! files into scoped data-generation plans and executes them concurrently
//! against a live server.
//!
//! See `SPEC_FULL.md` for the full component breakdown (A–F); each of the
//! modules below corresponds to one component.

pub mod allocator;
pub mod cli;
pub mod client;
pub mod compiler;
pub mod config;
pub mod control;
pub mod error;
pub mod generator;
pub mod mysql;
pub mod scope;
pub mod stage;
pub mod stats;
pub mod value;

pub use error::{FinchError, Result};
