//! The control-plane HTTP client (`--client ADDR`): the remote-node side
//! of the poll/POST loop against a `finch --server` coordinator.
//!
//! Built on `reqwest`, the client-side counterpart to [`super::server`]'s
//! `axum` router. A remote node boots once, then polls `/run` until it
//! receives a stage to execute, runs it locally through the same
//! `compile → allocate → stage::run_plan` pipeline the standalone binary
//! uses, and streams stats batches back at `stats.freq`.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client as HttpClient;
use tracing::{info, warn};

use super::{BootRequest, BootResponse, ErrorReport, ReportDto, RunRequest, RunResponse, StatsBatch};
use crate::error::FinchError;

/// How often a remote node polls `/run` while idle, waiting for a stage
/// assignment.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct RemoteClient {
    http: HttpClient,
    base_url: String,
    name: String,
}

impl RemoteClient {
    pub fn new(server_addr: &str, name: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: format!("http://{server_addr}"),
            name: name.into(),
        }
    }

    pub async fn boot(&self) -> Result<(), FinchError> {
        let resp: BootResponse = self
            .post_json("/boot", &BootRequest { name: self.name.clone() })
            .await?;
        if !resp.accepted {
            return Err(FinchError::config("control-plane server rejected boot request"));
        }
        info!(server = %self.base_url, client = %self.name, "booted with control-plane server");
        Ok(())
    }

    /// Polls `/run` at [`POLL_INTERVAL`] until the server hands this node
    /// a stage to execute, or `cancel` fires.
    pub async fn poll_for_run(&self, cancel: &tokio_util::sync::CancellationToken) -> Option<RunRequest> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let req = RunRequest {
                name: self.name.clone(),
                stage_yaml: String::new(),
                trx_files: HashMap::new(),
                params: HashMap::new(),
            };
            match self.post_json::<_, RunResponse>("/run", &req).await {
                Ok(resp) if resp.accepted => return Some(req),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "poll for run failed, retrying"),
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub async fn report_stats(&self, reports: &[crate::stats::Report]) -> Result<(), FinchError> {
        let batch = StatsBatch {
            name: self.name.clone(),
            reports: reports.iter().map(ReportDto::from).collect(),
        };
        self.post_empty("/stats", &batch).await
    }

    pub async fn report_error(&self, message: impl Into<String>) -> Result<(), FinchError> {
        let report = ErrorReport {
            name: self.name.clone(),
            message: message.into(),
        };
        self.post_empty("/error", &report).await
    }

    async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, FinchError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| FinchError::config(format!("control-plane request to {path} failed: {e}")))?;
        resp.json()
            .await
            .map_err(|e| FinchError::config(format!("control-plane response from {path} was malformed: {e}")))
    }

    async fn post_empty<Req: serde::Serialize>(&self, path: &str, body: &Req) -> Result<(), FinchError> {
        self.http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| FinchError::config(format!("control-plane request to {path} failed: {e}")))?;
        Ok(())
    }
}
