//! The client execution engine (component E): one cooperative loop per
//! client, driven by an outer cancellation signal, that binds generated
//! values into statements, executes them against a dedicated connection,
//! classifies errors, and records latency into a [`ClientStats`].
//!
//! The outer loop shape (connect once, loop until cancelled, report at
//! the end) generalizes from a fixed read/update/scan/delete mix to
//! Finch's compiled, per-trx statement list, and uses an async SQL
//! driver (`mysql_async`) directly rather than a sync `Db` trait, the
//! way a benchmark driver built around `sqlx` or similar would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mysql_async::prelude::Queryable;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::allocator::ClientPlan;
use crate::compiler::{Statement, StatementFlags};
use crate::mysql::{ErrorPolicy, MySQLErrorHandling};
use crate::scope::{ScopeLevel, ScopedGenerator};
use crate::stats::{ClientStats, Outcome};
use crate::value::{Format, Value};

/// Bounds on how long a client keeps iterating, as configured by the
/// stage's `runtime`/`iter` keys. `None` in both fields means "run until
/// cancelled" (the normal case for a `setup`/`cleanup` stage's clients,
/// which otherwise run a fixed number of statements).
#[derive(Debug, Clone, Copy, Default)]
pub struct StageLimits {
    pub runtime: Option<Duration>,
    pub iterations: Option<u64>,
}

/// Runs one client to completion: opens a connection from `pool`, prepares
/// every `Prepare`-flagged statement (sharing one handle across a
/// `prepare_multi` run of `copies`), then iterates trx in `plan.trx_order`
/// until `cancel` fires or a `StageLimits` bound is hit. Always returns the
/// client's accumulated stats, even when a statement aborts the stage —
/// the stage runner decides whether a returned `Err` fails the whole run.
pub async fn run_client(
    plan: &mut ClientPlan,
    pool: &mysql_async::Pool,
    policy: &ErrorPolicy,
    limits: StageLimits,
    cancel: CancellationToken,
) -> Result<ClientStats, mysql_async::Error> {
    let mut conn = pool.get_conn().await?;
    let mut prepared = prepare_all(plan, &mut conn).await?;
    let mut stats = ClientStats::new();

    let deadline = limits.runtime.map(|d| Instant::now() + d);
    let mut iterations_run = 0u64;

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }
        if deadline.is_some_and(|dl| Instant::now() >= dl) {
            break;
        }
        if limits.iterations.is_some_and(|max| iterations_run >= max) {
            break;
        }

        plan.run_level.counts.increment(ScopeLevel::Iter);
        iterations_run += 1;

        let trx_order = plan.trx_order.clone();
        for trx_name in &trx_order {
            plan.run_level.counts.increment(ScopeLevel::Trx);
            let stmt_count = plan.statements[trx_name].len();

            for stmt_idx in 0..stmt_count {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                plan.run_level.counts.increment(ScopeLevel::Statement);

                let statement = plan.statements[trx_name][stmt_idx].statement.clone();

                if let Some(idle) = statement.idle {
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = cancel.cancelled() => break 'outer,
                    }
                    continue;
                }

                if let Some(limiter) = plan.rate_limiter.clone() {
                    limiter.until_ready().await;
                }
                if statement.flags.contains(StatementFlags::BEGIN) {
                    if let Some(tps) = plan.tps_limiter.clone() {
                        tps.until_ready().await;
                    }
                }

                let client_no = plan.run_level.names.client;
                let values = gather_inputs(&plan.statements[trx_name][stmt_idx].inputs, client_no, &plan.run_level.counts);
                let handle = prepared
                    .get(trx_name)
                    .and_then(|h| h[stmt_idx].as_ref());

                let started = Instant::now();
                let outcome = execute_one(&mut conn, handle, &statement, values, &plan.bindings).await;
                let elapsed = started.elapsed();

                match outcome {
                    Ok(()) => stats.record(trx_name, stmt_idx, statement.flags, elapsed, Outcome::Ok),
                    Err(err) => {
                        let handling = policy.classify(&err);

                        if handling.contains(MySQLErrorHandling::EROLLBACK) {
                            if let Err(rollback_err) = conn.query_drop("ROLLBACK").await {
                                warn!(error = %rollback_err, "rollback after statement error also failed");
                            }
                        }
                        if handling.contains(MySQLErrorHandling::ERECONNECT) {
                            conn = pool.get_conn().await?;
                            prepared = prepare_all(plan, &mut conn).await?;
                        }
                        if !handling.contains(MySQLErrorHandling::ESILENT) {
                            stats.record(trx_name, stmt_idx, statement.flags, elapsed, Outcome::Recovered);
                        }
                        if handling.contains(MySQLErrorHandling::EABORT) {
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    Ok(stats)
}

/// Prepares every `Prepare`-flagged statement in trx order, sharing one
/// handle across a contiguous `prepare_multi` run.
async fn prepare_all(
    plan: &ClientPlan,
    conn: &mut mysql_async::Conn,
) -> Result<HashMap<String, Vec<Option<mysql_async::Statement>>>, mysql_async::Error> {
    let mut out = HashMap::with_capacity(plan.trx_order.len());

    for trx_name in &plan.trx_order {
        let bound = &plan.statements[trx_name];
        let mut handles = Vec::with_capacity(bound.len());
        let mut pending_shared: Option<(mysql_async::Statement, u32)> = None;

        for entry in bound {
            let statement = &entry.statement;
            if !statement.flags.contains(StatementFlags::PREPARE) {
                pending_shared = None;
                handles.push(None);
                continue;
            }

            if let Some((shared, remaining)) = pending_shared.as_mut() {
                if *remaining > 0 {
                    handles.push(Some(shared.clone()));
                    *remaining -= 1;
                    if *remaining == 0 {
                        pending_shared = None;
                    }
                    continue;
                }
            }

            let prepared = conn.prep(&statement.query).await?;
            if let Some(n) = statement.prepare_multi {
                if n > 1 {
                    pending_shared = Some((prepared.clone(), n - 1));
                }
            }
            handles.push(Some(prepared));
        }

        out.insert(trx_name.clone(), handles);
    }

    Ok(out)
}

/// Flattens one statement's bound inputs into the positional argument
/// list, in textual order. A `@PREV` slot never calls its generator — it
/// reuses the value vector the immediately preceding (owning) slot just
/// produced, indexing into it instead (spec.md §4.B/§9, §9's "index
/// arithmetic on the bound argument list").
fn gather_inputs(inputs: &[crate::allocator::InputBinding], client_no: u32, cnt: &crate::scope::RunCount) -> Vec<Value> {
    let mut out = Vec::with_capacity(inputs.len());
    let mut owner_values: Option<Vec<Value>> = None;

    for input in inputs {
        if input.is_prev {
            let values = owner_values
                .as_ref()
                .expect("internal invariant violation: @PREV slot with no preceding generator call in this statement");
            out.push(values[input.value_index].clone());
            continue;
        }

        let values = if input.forced_call {
            input.generator.call(client_no, cnt)
        } else {
            input.generator.values(client_no, cnt)
        };
        if input.whole {
            out.extend(values.iter().cloned());
        } else {
            out.push(values[input.value_index].clone());
        }
        owner_values = Some(values);
    }
    out
}

async fn execute_one(
    conn: &mut mysql_async::Conn,
    prepared: Option<&mysql_async::Statement>,
    statement: &Statement,
    values: Vec<Value>,
    bindings: &HashMap<String, Arc<ScopedGenerator>>,
) -> Result<(), mysql_async::Error> {
    let result_set = statement.flags.contains(StatementFlags::RESULT_SET);

    if let Some(handle) = prepared {
        let params: Vec<mysql_async::Value> = values.iter().map(value_to_mysql).collect();
        if result_set {
            let rows: Vec<mysql_async::Row> = conn.exec(handle, params).await?;
            scan_outputs(&rows, statement, bindings);
        } else {
            conn.exec_drop(handle, params).await?;
            capture_insert_id(conn, statement, bindings);
        }
    } else {
        let sql = Format::new(&statement.query).render(&values);
        if result_set {
            let rows: Vec<mysql_async::Row> = conn.query(sql).await?;
            scan_outputs(&rows, statement, bindings);
        } else {
            conn.query_drop(sql).await?;
            capture_insert_id(conn, statement, bindings);
        }
    }

    Ok(())
}

fn scan_outputs(rows: &[mysql_async::Row], statement: &Statement, bindings: &HashMap<String, Arc<ScopedGenerator>>) {
    if statement.outputs.is_empty() {
        return;
    }
    // Every row is scanned in order; a multi-row result leaves the last
    // row's columns captured, matching a single logical "most recent
    // value" per output key rather than accumulating a list.
    for row in rows {
        for (idx, output) in statement.outputs.iter().enumerate() {
            let Some(name) = output else { continue };
            let Some(raw) = row.as_ref(idx) else { continue };
            if let Some(g) = bindings.get(name) {
                g.scan(mysql_to_value(raw));
            }
        }
    }
}

fn capture_insert_id(conn: &mysql_async::Conn, statement: &Statement, bindings: &HashMap<String, Arc<ScopedGenerator>>) {
    let Some(key) = &statement.insert_id else { return };
    let Some(id) = conn.last_insert_id() else { return };
    if let Some(g) = bindings.get(key) {
        g.scan(Value::Int(id as i64));
    }
}

fn value_to_mysql(v: &Value) -> mysql_async::Value {
    match v {
        Value::Int(i) => mysql_async::Value::Int(*i),
        Value::Str(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => mysql_async::Value::Bytes(b.clone()),
        Value::Null => mysql_async::Value::NULL,
    }
}

fn mysql_to_value(v: &mysql_async::Value) -> Value {
    match v {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(i) => Value::Int(*i),
        mysql_async::Value::UInt(u) => Value::Int(*u as i64),
        mysql_async::Value::Bytes(b) => Value::Bytes(b.clone()),
        mysql_async::Value::Float(f) => Value::Str(f.to_string()),
        mysql_async::Value::Double(d) => Value::Str(d.to_string()),
        other => Value::Str(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversions_round_trip_int_and_bytes() {
        assert_eq!(value_to_mysql(&Value::Int(7)), mysql_async::Value::Int(7));
        assert_eq!(mysql_to_value(&mysql_async::Value::Int(7)), Value::Int(7));
        assert_eq!(
            mysql_to_value(&mysql_async::Value::Bytes(vec![0x75])),
            Value::Bytes(vec![0x75])
        );
    }

    #[test]
    fn uint_narrows_to_signed_value() {
        assert_eq!(mysql_to_value(&mysql_async::Value::UInt(42)), Value::Int(42));
    }

    /// A fixed arity-2 generator that counts how many times `values()` was
    /// called, used to prove `@PREV` does not re-invoke the generator.
    #[derive(Debug)]
    struct CountingPairGenerator {
        calls: std::sync::atomic::AtomicU32,
    }

    impl crate::generator::Generator for CountingPairGenerator {
        fn name(&self) -> &'static str {
            "counting-pair"
        }

        fn format(&self) -> crate::value::Format {
            crate::value::Format::new("%d, %d")
        }

        fn values(&self, _rc: &crate::scope::RunCount) -> Vec<Value> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            vec![Value::Int(5), Value::Int(10)]
        }

        fn copy(&self) -> Box<dyn crate::generator::Generator> {
            Box::new(CountingPairGenerator {
                calls: std::sync::atomic::AtomicU32::new(0),
            })
        }
    }

    fn scoped(gen: CountingPairGenerator) -> Arc<crate::scope::ScopedGenerator> {
        Arc::new(crate::scope::ScopedGenerator::new(
            crate::scope::ScopedGeneratorId {
                run_level_stage: String::new(),
                scope: crate::scope::ScopeLevel::Statement,
                generator_type: "counting-pair",
                data_key: "@id".to_string(),
                copy_no: 1,
            },
            crate::scope::ScopeLevel::Statement,
            Box::new(gen),
        ))
    }

    #[test]
    fn prev_slot_reuses_owner_values_without_a_second_generator_call() {
        let generator = scoped(CountingPairGenerator {
            calls: std::sync::atomic::AtomicU32::new(0),
        });

        let inputs = vec![
            crate::allocator::InputBinding {
                generator: generator.clone(),
                forced_call: false,
                is_prev: false,
                value_index: 0,
                whole: false,
            },
            crate::allocator::InputBinding {
                generator: generator.clone(),
                forced_call: false,
                is_prev: true,
                value_index: 1,
                whole: false,
            },
        ];

        let cnt = crate::scope::RunCount::new();
        let values = gather_inputs(&inputs, 1, &cnt);

        assert_eq!(values, vec![Value::Int(5), Value::Int(10)]);
    }

    #[test]
    fn whole_slot_extends_every_value_in_the_vector() {
        let generator = scoped(CountingPairGenerator {
            calls: std::sync::atomic::AtomicU32::new(0),
        });

        let inputs = vec![crate::allocator::InputBinding {
            generator,
            forced_call: false,
            is_prev: false,
            value_index: 0,
            whole: true,
        }];

        let cnt = crate::scope::RunCount::new();
        let values = gather_inputs(&inputs, 1, &cnt);

        assert_eq!(values, vec![Value::Int(5), Value::Int(10)]);
    }
}
