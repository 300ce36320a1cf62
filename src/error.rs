//! Typed error kinds for Finch.
//!
//! Mirrors the error taxonomy described in the design: config errors and
//! compile errors are caught before any client starts and are always fatal;
//! connection and runtime errors are scoped to a single stage; internal
//! invariant violations are not represented here at all because they are
//! programmer errors, not data-dependent failures, and are raised with
//! `panic!`/`unreachable!` at the point of detection.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type returned by every fallible Finch operation.
#[derive(Debug, Error)]
pub enum FinchError {
    /// Malformed YAML, unknown options, or a reference to an undefined `@d`
    /// key discovered while loading configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A trx file failed to parse: bad modifier, unbalanced `copies`,
    /// unreferenced `save-columns` destination, and the like.
    #[error("compile error in {file}:{line}: {message}")]
    Compile {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// MySQL dial/auth failure.
    #[error("connection error: {0}")]
    Connection(#[from] mysql_async::Error),

    /// A runtime SQL error that the error-handling policy decided must
    /// surface (i.e. classified `Eabort`).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Any other I/O failure (reading a trx/stage file, HTTP transport).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FinchError {
    pub fn config(msg: impl Into<String>) -> Self {
        FinchError::Config(msg.into())
    }

    pub fn compile(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        FinchError::Compile {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T, E = FinchError> = std::result::Result<T, E>;
