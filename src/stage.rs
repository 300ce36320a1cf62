//! The stage runner (component F): owns one stage's lifecycle end to end
//! — compile, allocate, run every exec group to completion in order, tear
//! down.
//!
//! The "log and keep going" shape used here for `benchmark`/`cleanup`
//! stage failures (errors are logged but the runner attempts to reach
//! cleanup before exiting) generalizes a retry-loop pattern common to
//! benchmark drivers, from a single workload loop to full exec-group
//! barrier sequencing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::allocator::{self, Plan};
use crate::client::{self, StageLimits};
use crate::compiler::{self, Set};
use crate::config::StageFile;
use crate::error::FinchError;
use crate::mysql::ErrorPolicy;
use crate::scope::ScopedGenerator;
use crate::stats::StatsSink;

/// `stage`/`global`-scoped generator instances carried from one stage's
/// compiled `Scope` into the next one's, keyed by data key name — each
/// stage compiles a brand-new `Scope`, so without this a `global`-scoped
/// `auto-inc` used in `setup` would restart from its configured `start`
/// in `warmup`/`benchmark` instead of continuing where `setup` left off.
type ScopeCarryover = HashMap<String, Arc<ScopedGenerator>>;

/// How long the watchdog waits for every client task to observe
/// cancellation before forcibly terminating the process. This is a
/// fail-safe, not a graceful path.
pub const WATCHDOG: Duration = Duration::from_millis(7_500);

/// Whether a stage's failure should abort the whole run: `setup`
/// and `warmup` abort the process on any stage-level error; `benchmark`
/// and `cleanup` log and continue toward the next stage (cleanup is
/// always attempted).
fn fatal_on_failure(stage_name: &str) -> bool {
    matches!(stage_name, "setup" | "warmup")
}

pub struct StageOutcome {
    pub stage_name: String,
    pub stats: StatsSink,
    pub error: Option<FinchError>,
}

/// Runs every enabled stage in `files`, in the order given, against one
/// shared [`crate::scope::Scope`]-surviving lifetime (via a stage-local
/// [`Set`] that is recompiled per stage — only `stage`-
/// and `global`-scoped generators persist their *values* across the
/// `Scope::reset` at each stage boundary; the `Set` itself is new each
/// time because trx text is re-read and re-compiled per stage).
pub async fn run_all(files: &[StageFile], stage_dirs: &[std::path::PathBuf], cli_dsn: Option<&str>) -> Vec<StageOutcome> {
    run_all_cancellable(files, stage_dirs, cli_dsn, &CancellationToken::new()).await
}

/// Same as [`run_all`], but honors an externally-owned cancellation token
/// (forwarded from a Ctrl-C handler or a control-plane `/stop` request) so a
/// signal received mid-stage reaches every client's hot-path check instead
/// of only the OS's default SIGINT disposition.
pub async fn run_all_cancellable(
    files: &[StageFile],
    stage_dirs: &[std::path::PathBuf],
    cli_dsn: Option<&str>,
    cancel: &CancellationToken,
) -> Vec<StageOutcome> {
    let policy = ErrorPolicy::with_defaults();
    let mut outcomes = Vec::with_capacity(files.len());
    let mut carryover: ScopeCarryover = HashMap::new();

    for (file, dir) in files.iter().zip(stage_dirs) {
        if file.stage.disable {
            info!(stage = %file.stage.name, "stage disabled, skipping");
            continue;
        }
        if cancel.is_cancelled() {
            info!(stage = %file.stage.name, "cancelled before stage start, skipping remaining stages");
            break;
        }

        let outcome = run_one(file, dir, cli_dsn, &policy, cancel, &mut carryover).await;
        let failed = outcome.error.is_some();
        let stage_name = outcome.stage_name.clone();
        outcomes.push(outcome);

        if failed && fatal_on_failure(&stage_name) {
            error!(stage = %stage_name, "fatal stage failed, aborting run");
            break;
        }
    }

    outcomes
}

async fn run_one(
    file: &StageFile,
    dir: &std::path::Path,
    cli_dsn: Option<&str>,
    policy: &ErrorPolicy,
    cancel: &CancellationToken,
    carryover: &mut ScopeCarryover,
) -> StageOutcome {
    let stage_name = file.stage.name.clone();
    info!(stage = %stage_name, "compiling trx files");

    let result = compile_and_run(file, dir, cli_dsn, policy, cancel, carryover).await;
    match result {
        Ok(stats) => StageOutcome {
            stage_name,
            stats,
            error: None,
        },
        Err(e) => {
            warn!(stage = %stage_name, error = %e, "stage failed");
            StageOutcome {
                stage_name,
                stats: StatsSink::new(),
                error: Some(e),
            }
        }
    }
}

async fn compile_and_run(
    file: &StageFile,
    dir: &std::path::Path,
    cli_dsn: Option<&str>,
    policy: &ErrorPolicy,
    cancel: &CancellationToken,
    carryover: &mut ScopeCarryover,
) -> Result<StatsSink, FinchError> {
    let specs = file.trx_specs();
    let contents = file.load_trx_contents(dir)?;
    let set: Set = compiler::compile(&specs, &contents, &file.params)?;

    // Hand this stage's freshly compiled Scope the `stage`/`global`-scoped
    // generator instances the previous stage left behind, so their
    // internal state (e.g. an `auto-inc`'s counter) continues instead of
    // restarting from the key's configured default.
    set.scope.adopt_survivors(carryover);

    if set.statement_count() == 0 {
        return Err(FinchError::config("stage compiled to zero statements"));
    }

    let opts = file.mysql.resolve(cli_dsn)?;
    let workload = file.workload();
    let plan: Plan = allocator::allocate(&set, &workload, &file.stage.name, opts)?;

    let limits = StageLimits {
        runtime: file.stage.runtime,
        iterations: file.stage.iter,
    };

    let stats = run_plan(plan, policy, limits, cancel).await?;

    // Scope::reset runs at stage boundaries; `stage`- and
    // `global`-scoped generators survive because `reset` only discards
    // entries whose default scope is strictly below `stage`. Snapshot
    // what's left so the next stage's `compile_and_run` can adopt it.
    set.scope.reset();
    *carryover = set.scope.survivors();

    Ok(stats)
}

/// Executes every exec group in `plan.exec_groups`, in order, waiting for
/// every client-group's clients to finish before advancing: the stage
/// runner blocks on a barrier per exec-group.
async fn run_plan(
    plan: Plan,
    policy: &ErrorPolicy,
    limits: StageLimits,
    cancel: &CancellationToken,
) -> Result<StatsSink, FinchError> {
    let sink = StatsSink::new();
    let cancel = cancel.child_token();
    let policy = Arc::new(policy.clone());

    for mut exec_group in plan.exec_groups {
        let mut tasks: JoinSet<(String, Result<client::ClientStats, mysql_async::Error>)> = JoinSet::new();

        for cg in &mut exec_group.client_groups {
            let pool = cg.pool.clone();
            for client_plan in cg.clients.drain(..) {
                let cancel = cancel.clone();
                let policy = policy.clone();
                tasks.spawn(run_client_with_watchdog(client_plan, pool.clone(), policy, limits, cancel));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_client_name, Ok(stats))) => sink.merge(stats),
                Ok((client_name, Err(e))) => warn!(client = %client_name, error = %e, "client in this exec group reported an error"),
                Err(join_err) => warn!(error = %join_err, "client task panicked"),
            }
        }
    }

    Ok(sink)
}

async fn run_client_with_watchdog(
    mut client_plan: allocator::ClientPlan,
    pool: mysql_async::Pool,
    policy: Arc<ErrorPolicy>,
    limits: StageLimits,
    cancel: CancellationToken,
) -> (String, Result<client::ClientStats, mysql_async::Error>) {
    let client_name = format!(
        "{}.{}.{}",
        client_plan.run_level.names.exec_group, client_plan.run_level.names.client_group, client_plan.run_level.names.client
    );

    let watchdog_cancel = cancel.clone();
    let watchdog = tokio::spawn(async move {
        watchdog_cancel.cancelled().await;
        tokio::time::sleep(WATCHDOG).await;
        // Fail-safe only: if we're still alive here, the client did not
        // observe cancellation within the grace period. This is
        // not a graceful path.
        error!("client did not observe cancellation within the watchdog window, terminating process");
        std::process::exit(1);
    });

    let result = client::run_client(&mut client_plan, &pool, &policy, limits, cancel).await;
    watchdog.abort();

    (client_name, result)
}

/// Resolves `trx[].file` paths for every stage file relative to its own
/// directory, and loads+parses the YAML.
pub fn load_stage_files(paths: &[std::path::PathBuf]) -> Result<(Vec<StageFile>, Vec<std::path::PathBuf>), FinchError> {
    let mut files = Vec::with_capacity(paths.len());
    let mut dirs = Vec::with_capacity(paths.len());

    for path in paths {
        let text = std::fs::read_to_string(path)?;
        let file = StageFile::from_yaml(path, &text)?;
        if !crate::config::STAGE_NAMES.contains(&file.stage.name.as_str()) {
            return Err(FinchError::config(format!(
                "stage name {:?} is not one of {:?}",
                file.stage.name,
                crate::config::STAGE_NAMES
            )));
        }
        let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        files.push(file);
        dirs.push(dir);
    }

    Ok((files, dirs))
}

/// Applies `--param KEY=VAL` overrides on top of each stage file's own
/// `params` map. CLI overrides win.
pub fn apply_param_overrides(files: &mut [StageFile], overrides: &[(String, String)]) {
    for file in files.iter_mut() {
        for (k, v) in overrides {
            file.params.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stage_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            r#"
stage:
  name: not-a-real-stage
  workload: []
"#,
        )
        .unwrap();

        let err = load_stage_files(&[path]).unwrap_err();
        assert!(matches!(err, FinchError::Config(_)));
    }

    #[test]
    fn param_overrides_are_merged_into_each_stage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.yaml");
        std::fs::write(
            &path,
            r#"
stage:
  name: benchmark
  workload: []
"#,
        )
        .unwrap();

        let (mut files, _) = load_stage_files(&[path]).unwrap();
        apply_param_overrides(&mut files, &[("rows".to_string(), "42".to_string())]);
        assert_eq!(files[0].params.get("rows"), Some(&"42".to_string()));
    }
}
