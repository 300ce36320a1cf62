//! Stage YAML deserialization and its translation into the types
//! the compiler, allocator and stats sink actually consume.
//!
//! A `serde`-derived struct with a `default::` module supplying every
//! optional field's default, deserialized directly from the stage YAML
//! via `serde_yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::allocator::{ClientGroupSpec, ExecGroupSpec, WorkloadSpec};
use crate::compiler::{DataCfg, TrxSpec};
use crate::error::FinchError;
use crate::generator::Params;

/// The closed set of valid stage names. `disable` lets a stage file keep
/// an entry around without running it.
pub const STAGE_NAMES: &[&str] = &["setup", "warmup", "benchmark", "cleanup"];

#[derive(Debug, Deserialize)]
pub struct StageFile {
    #[serde(default)]
    pub mysql: MysqlConfig,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub stats: StatsConfig,
    pub stage: StageConfig,
    #[serde(default)]
    pub trx: Vec<TrxConfig>,
}

impl StageFile {
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, FinchError> {
        serde_yaml::from_str(text).map_err(|e| FinchError::config(format!("{}: {e}", path.display())))
    }

    /// Loads every `trx[].file`, relative to this stage file's directory,
    /// as the compiler's `compile()` expects.
    pub fn load_trx_contents(&self, stage_file_dir: &Path) -> Result<HashMap<PathBuf, String>, FinchError> {
        let mut out = HashMap::with_capacity(self.trx.len());
        for trx in &self.trx {
            let path = stage_file_dir.join(&trx.file);
            let text = std::fs::read_to_string(&path)?;
            out.insert(trx.file.clone(), text);
        }
        Ok(out)
    }

    pub fn trx_specs(&self) -> Vec<TrxSpec> {
        self.trx
            .iter()
            .map(|t| TrxSpec {
                file: t.file.clone(),
                name: t.name.clone(),
                data: t
                    .data
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            DataCfg {
                                generator: v.generator.clone(),
                                scope: v.scope.clone(),
                                params: v.params.clone(),
                            },
                        )
                    })
                    .collect(),
            })
            .collect()
    }

    /// Groups `stage.workload[]` entries into exec-groups, in the order
    /// each exec-group index first appears (see `DESIGN.md` for why
    /// first-appearance order was chosen over a numeric sort).
    pub fn workload(&self) -> WorkloadSpec {
        let mut order: Vec<u32> = Vec::new();
        let mut groups: HashMap<u32, Vec<ClientGroupSpec>> = HashMap::new();

        for entry in &self.stage.workload {
            groups.entry(entry.exec_group).or_insert_with(|| {
                order.push(entry.exec_group);
                Vec::new()
            });
            groups.get_mut(&entry.exec_group).unwrap().push(ClientGroupSpec {
                trx_names: entry.trx.clone(),
                clients: entry.clients,
                qps: entry.qps.and_then(std::num::NonZeroU32::new),
                tps: entry.tps.and_then(std::num::NonZeroU32::new),
            });
        }

        WorkloadSpec {
            exec_groups: order
                .into_iter()
                .map(|idx| ExecGroupSpec {
                    client_groups: groups.remove(&idx).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct MysqlConfig {
    pub dsn: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "password-file")]
    pub password_file: Option<String>,
    pub socket: Option<String>,
    pub db: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(rename = "disable-auto-tls", default)]
    pub disable_auto_tls: bool,
    #[serde(rename = "my-cnf")]
    pub my_cnf: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TlsConfig {
    pub ca: Option<String>,
    #[serde(default)]
    pub skip_domain_validation: bool,
}

impl MysqlConfig {
    /// Resolves to an `mysql_async::Opts`, favoring an explicit `dsn` over
    /// discrete fields when both are given.
    pub fn resolve(&self, cli_dsn: Option<&str>) -> Result<mysql_async::Opts, FinchError> {
        if let Some(dsn) = cli_dsn.or(self.dsn.as_deref()) {
            return mysql_async::Opts::from_url(dsn).map_err(|e| FinchError::config(format!("invalid DSN: {e}")));
        }

        let password = match &self.password_file {
            Some(path) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            None => self.password.clone(),
        };

        let mut builder = mysql_async::OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone().unwrap_or_else(|| "127.0.0.1".to_string()))
            .tcp_port(self.port.unwrap_or(3306))
            .user(self.username.clone())
            .pass(password)
            .db_name(self.db.clone());

        if let Some(socket) = &self.socket {
            builder = builder.socket(Some(socket.clone()));
        }
        if self.disable_auto_tls {
            builder = builder.ssl_opts(None);
        }

        Ok(builder.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default::stats_freq", with = "humantime_serde_field")]
    pub freq: Duration,
    #[serde(default)]
    pub report: Vec<String>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            freq: default::stats_freq(),
            report: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub disable: bool,
    pub qps: Option<u32>,
    pub tps: Option<u32>,
    #[serde(default, with = "humantime_serde_opt")]
    pub runtime: Option<Duration>,
    #[serde(default, with = "humantime_serde_opt")]
    pub warmup: Option<Duration>,
    pub iter: Option<u64>,
    #[serde(default)]
    pub workload: Vec<WorkloadEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WorkloadEntry {
    #[serde(rename = "exec-group", default = "default::exec_group")]
    pub exec_group: u32,
    pub trx: Vec<String>,
    pub clients: u32,
    pub qps: Option<u32>,
    pub tps: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TrxConfig {
    pub name: String,
    pub file: PathBuf,
    #[serde(default)]
    pub data: HashMap<String, DataConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DataConfig {
    pub generator: String,
    pub scope: Option<String>,
    #[serde(default)]
    pub params: Params,
}

mod default {
    use std::time::Duration;

    pub fn stats_freq() -> Duration {
        Duration::from_secs(1)
    }

    pub fn exec_group() -> u32 {
        1
    }
}

/// `serde(with = ...)` shim translating a humantime string (`"30s"`,
/// `"5m"`) into a `Duration`, matching how the `idle`/`runtime`/`warmup`
/// fields are written in a trx file's modifier lines (see
/// `crate::compiler::modifiers`).
mod humantime_serde_field {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod humantime_serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
stage:
  name: benchmark
  runtime: 30s
  workload:
    - trx: [read]
      clients: 4
      qps: 100
trx:
  - name: read
    file: read.trx
    data:
      id:
        generator: int
        scope: client
"#;

    #[test]
    fn parses_a_minimal_stage_file() {
        let file = StageFile::from_yaml(Path::new("stage.yaml"), SAMPLE).unwrap();
        assert_eq!(file.stage.name, "benchmark");
        assert_eq!(file.stage.runtime, Some(Duration::from_secs(30)));
        assert_eq!(file.trx.len(), 1);
    }

    #[test]
    fn workload_groups_by_exec_group_in_first_seen_order() {
        let file = StageFile::from_yaml(Path::new("stage.yaml"), SAMPLE).unwrap();
        let workload = file.workload();
        assert_eq!(workload.exec_groups.len(), 1);
        assert_eq!(workload.exec_groups[0].client_groups[0].clients, 4);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(StageFile::from_yaml(Path::new("stage.yaml"), "not: [valid").is_err());
    }
}
