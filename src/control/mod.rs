//! The distributed control plane: the `--server`/`--client` HTTP surface
//! that lets Finch fan a stage's clients out across remote compute nodes.
//!
//! This is a deliberately simple control plane with its own wire format,
//! not a reconstruction of any particular upstream system's schema. It
//! exists so `--server` and `--client` are not dead flags.
//!
//! Uses the common `axum` (server) + `reqwest` (client) pairing for
//! small control-plane HTTP surfaces.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

/// One remote client node's identity, carried as the `?name=` query
/// parameter on every request.
pub type ClientName = String;

/// `/boot` request body: a remote node announcing itself before it is
/// handed a stage to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootRequest {
    pub name: ClientName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootResponse {
    pub accepted: bool,
}

/// `/run` request body: the compiled stage plan a remote node must
/// execute. The stage YAML text and its trx file contents travel
/// verbatim so the remote node can run its own `compile`/`allocate`
/// pass locally — shipping the raw inputs is simpler and more robust
/// across version skew than shipping the compiled `Set`/`Plan` types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub name: ClientName,
    pub stage_yaml: String,
    pub trx_files: std::collections::HashMap<String, String>,
    pub params: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub accepted: bool,
}

/// `/stats` request body: one batch of a remote node's merged
/// [`crate::stats::Report`] rows, POSTed at the node's own `stats.freq`
/// cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsBatch {
    pub name: ClientName,
    pub reports: Vec<ReportDto>,
}

/// Wire form of [`crate::stats::Report`] (kept separate so the stats
/// module itself never depends on `serde`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDto {
    pub trx: String,
    pub stmt_index: usize,
    pub count: u64,
    pub ok: u64,
    pub recovered: u64,
    pub aborted: u64,
    pub p50_micros: u64,
    pub p99_micros: u64,
    pub max_micros: u64,
}

impl From<&crate::stats::Report> for ReportDto {
    fn from(r: &crate::stats::Report) -> Self {
        Self {
            trx: r.trx.clone(),
            stmt_index: r.stmt_index,
            count: r.count,
            ok: r.ok,
            recovered: r.recovered,
            aborted: r.aborted,
            p50_micros: r.p50_micros,
            p99_micros: r.p99_micros,
            max_micros: r.max_micros,
        }
    }
}

/// `/error` request body: a remote node reporting a fatal stage error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub name: ClientName,
    pub message: String,
}

/// `/stop` carries no body; it is a bare POST that tells every remote
/// node to cancel its current stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StopRequest {}
