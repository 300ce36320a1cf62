//! The workload allocator (component D): maps a compiled [`Set`] onto a
//! concrete hierarchy of exec groups → client groups → clients, pinning
//! every `@d` reference to a specific [`ScopedGenerator`] instance at each
//! client's stage-entry [`RunLevel`].
//!
//! This is the one place generator *identity* is decided — two clients in
//! the same client-group referencing a `client`-scoped key get distinct
//! `ScopedGenerator`s, while a `client-group`-scoped key resolves to the
//! same one.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};

use crate::compiler::{Set, Statement};
use crate::error::FinchError;
use crate::scope::{RunLevel, RunLevelNames, ScopedGenerator};

pub type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// One client-group's worth of workload configuration, as read from the
/// stage YAML's `stage.workload[]` entries.
#[derive(Debug, Clone)]
pub struct ClientGroupSpec {
    pub trx_names: Vec<String>,
    pub clients: u32,
    pub qps: Option<NonZeroU32>,
    /// Transactions-per-second limit shared across every client in this
    /// group (counts `Begin`/`Commit` pairs).
    pub tps: Option<NonZeroU32>,
}

#[derive(Debug, Clone)]
pub struct ExecGroupSpec {
    pub client_groups: Vec<ClientGroupSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkloadSpec {
    pub exec_groups: Vec<ExecGroupSpec>,
}

/// A resolved `@d` occurrence, bound to the concrete generator instance
/// this client must call.
pub struct InputBinding {
    pub generator: Arc<ScopedGenerator>,
    pub forced_call: bool,
    /// Mirrors `compiler::InputRef::is_prev`: when `true`, this slot must
    /// not call `generator` at all — it reuses the value vector the
    /// owning (non-`@PREV`) slot just produced.
    pub is_prev: bool,
    /// Mirrors `compiler::InputRef::value_index`.
    pub value_index: usize,
    /// Mirrors `compiler::InputRef::whole`.
    pub whole: bool,
}

pub struct BoundStatement {
    pub statement: Arc<Statement>,
    pub inputs: Vec<InputBinding>,
}

pub struct ClientPlan {
    pub run_level: RunLevel,
    /// Trx names this client iterates, in the order the client-group's
    /// spec listed them.
    pub trx_order: Vec<String>,
    pub statements: std::collections::HashMap<String, Vec<BoundStatement>>,
    /// Every data key's generator instance bound to this client at
    /// stage-entry, keyed by name — not just the ones a statement's own
    /// `inputs` references. A `save-columns`/`save-insert-id` destination
    /// is never an input of the statement that captures it, so the client
    /// loop looks up its scan target here rather than re-deriving it.
    pub bindings: std::collections::HashMap<String, Arc<ScopedGenerator>>,
    pub rate_limiter: Option<Arc<DirectRateLimiter>>,
    pub tps_limiter: Option<Arc<DirectRateLimiter>>,
}

pub struct ClientGroupPlan {
    pub pool: mysql_async::Pool,
    pub clients: Vec<ClientPlan>,
}

pub struct ExecGroupPlan {
    pub client_groups: Vec<ClientGroupPlan>,
}

pub struct Plan {
    pub exec_groups: Vec<ExecGroupPlan>,
}

pub fn allocate(set: &Set, workload: &WorkloadSpec, stage: &str, opts: mysql_async::Opts) -> Result<Plan, FinchError> {
    let mut exec_group_plans = Vec::with_capacity(workload.exec_groups.len());

    for (exec_group_idx, exec_group) in workload.exec_groups.iter().enumerate() {
        let mut client_group_plans = Vec::with_capacity(exec_group.client_groups.len());

        for (client_group_idx, cg) in exec_group.client_groups.iter().enumerate() {
            let pool = mysql_async::Pool::new(opts.clone());
            let tps_limiter = cg.tps.map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))));
            let mut clients = Vec::with_capacity(cg.clients as usize);

            for client_idx in 0..cg.clients {
                let names = RunLevelNames {
                    stage: stage.to_string(),
                    exec_group: (exec_group_idx + 1) as u32,
                    client_group: (client_group_idx + 1) as u32,
                    client: client_idx + 1,
                    trx: String::new(),
                };
                let mut run_level = RunLevel::new(names);
                run_level.counts.set(crate::scope::ScopeLevel::ExecGroup, (exec_group_idx + 1) as u64);
                run_level.counts.set(crate::scope::ScopeLevel::ClientGroup, (client_group_idx + 1) as u64);
                run_level.counts.set(crate::scope::ScopeLevel::Client, (client_idx + 1) as u64);

                // Bind every declared data key to this client up front, at
                // its stage-entry RunLevel — not just the ones some
                // statement's `inputs` references. A `save-columns`
                // destination is only ever read via its entry here, never
                // via an `InputRef`, so it must be bound regardless.
                let mut bindings = std::collections::HashMap::new();
                bindings.insert("_".to_string(), set.scope.copy("_", &run_level).expect("noop sentinel always resolves"));
                for key in set.scope.keys() {
                    if let Some(g) = set.scope.copy(&key.name, &run_level) {
                        bindings.insert(key.name.clone(), g);
                    }
                }

                let mut statements = std::collections::HashMap::with_capacity(cg.trx_names.len());
                for trx_name in &cg.trx_names {
                    let stmts = set
                        .statements
                        .get(trx_name)
                        .ok_or_else(|| FinchError::config(format!("workload references unknown trx {trx_name:?}")))?;
                    let mut bound = Vec::with_capacity(stmts.len());
                    for stmt in stmts {
                        let mut inputs = Vec::with_capacity(stmt.inputs.len());
                        for input in &stmt.inputs {
                            let generator = bindings.get(&input.key).cloned().ok_or_else(|| {
                                FinchError::config(format!("internal invariant violation: unbound data key {:?}", input.key))
                            })?;
                            inputs.push(InputBinding {
                                generator,
                                forced_call: input.forced_call,
                                is_prev: input.is_prev,
                                value_index: input.value_index,
                                whole: input.whole,
                            });
                        }

                        bound.push(BoundStatement {
                            statement: Arc::new(stmt.clone()),
                            inputs,
                        });
                    }
                    statements.insert(trx_name.clone(), bound);
                }

                let rate_limiter = cg.qps.map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))));

                clients.push(ClientPlan {
                    run_level,
                    trx_order: cg.trx_names.clone(),
                    statements,
                    bindings,
                    rate_limiter,
                    tps_limiter: tps_limiter.clone(),
                });
            }

            client_group_plans.push(ClientGroupPlan { pool, clients });
        }

        exec_group_plans.push(ExecGroupPlan {
            client_groups: client_group_plans,
        });
    }

    Ok(Plan {
        exec_groups: exec_group_plans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, DataCfg, TrxSpec};
    use crate::generator::Params;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn sample_set() -> Set {
        let mut data = HashMap::new();
        data.insert(
            "id".to_string(),
            DataCfg {
                generator: "int".to_string(),
                scope: Some("client".to_string()),
                params: Params::new(),
            },
        );
        let spec = TrxSpec {
            file: PathBuf::from("read.trx"),
            name: "read".to_string(),
            data,
        };
        let mut contents = HashMap::new();
        contents.insert(spec.file.clone(), "SELECT * FROM t WHERE id = @id\n".to_string());
        compile(&[spec], &contents, &HashMap::new()).unwrap()
    }

    fn test_opts() -> mysql_async::Opts {
        mysql_async::Opts::from_url("mysql://root@127.0.0.1:3306/test").unwrap()
    }

    #[test]
    fn client_scoped_key_gets_distinct_instances_per_client() {
        let set = sample_set();
        let workload = WorkloadSpec {
            exec_groups: vec![ExecGroupSpec {
                client_groups: vec![ClientGroupSpec {
                    trx_names: vec!["read".to_string()],
                    clients: 2,
                    qps: None,
                    tps: None,
                }],
            }],
        };

        let plan = allocate(&set, &workload, "benchmark", test_opts()).unwrap();
        let cg = &plan.exec_groups[0].client_groups[0];
        let g0 = &cg.clients[0].statements["read"][0].inputs[0].generator;
        let g1 = &cg.clients[1].statements["read"][0].inputs[0].generator;
        assert!(!Arc::ptr_eq(g0, g1), "client-scoped key must differ across clients");
    }

    #[test]
    fn unknown_trx_name_is_a_config_error() {
        let set = sample_set();
        let workload = WorkloadSpec {
            exec_groups: vec![ExecGroupSpec {
                client_groups: vec![ClientGroupSpec {
                    trx_names: vec!["nope".to_string()],
                    clients: 1,
                    qps: None,
                    tps: None,
                }],
            }],
        };
        assert!(allocate(&set, &workload, "benchmark", test_opts()).is_err());
    }
}
