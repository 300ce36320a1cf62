//! The scope engine (component B): the lattice that decides, for every
//! `@d` reference, whether a fresh value must be produced or the previous
//! one reused.
//!
//! This is the pivotal algorithm in the whole design. Two representations
//! show up under the name "Scope": the *value domain* (`statement < trx <
//! ... < global`) and the *per-stage symbol table* that tracks key
//! metadata and cached generator copies. We keep the value domain as
//! [`ScopeLevel`] and reserve the name [`Scope`] for the symbol table —
//! see `DESIGN.md` for why the rename was necessary to avoid a type naming
//! itself twice.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::generator::Generator;
use crate::value::Value;

/// The closed set of scope values, in ascending granularity order
/// (coarser scopes come later). `Row` and `Value` are special: `Row`
/// behaves exactly like `Statement` inside CSV expansion, and `Value`
/// means "never cache, always regenerate".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeLevel {
    Statement,
    Trx,
    Iter,
    Client,
    ClientGroup,
    ExecGroup,
    Workload,
    Stage,
    Global,
    /// Alias of `Statement` used during CSV row expansion.
    Row,
    /// Every retrieval is fresh; never cached.
    Value,
}

/// Number of indexed counter slots in [`RunCount`]. `Global` and `Value`
/// are excluded: `Global` generates at most once ever (no counter
/// comparison needed) and `Value` always regenerates (no comparison at
/// all). See `DESIGN.md` for why the `iter`-inclusive, 8-level lattice was
/// chosen as the canonical one.
pub const LEVELS: usize = 8;

impl ScopeLevel {
    /// Index into a [`RunCount`]/[`RunLevel`] counter vector, or `None`
    /// for the two levels that are handled outside the indexed comparison.
    pub fn index(self) -> Option<usize> {
        match self {
            ScopeLevel::Statement | ScopeLevel::Row => Some(0),
            ScopeLevel::Trx => Some(1),
            ScopeLevel::Iter => Some(2),
            ScopeLevel::Client => Some(3),
            ScopeLevel::ClientGroup => Some(4),
            ScopeLevel::ExecGroup => Some(5),
            ScopeLevel::Workload => Some(6),
            ScopeLevel::Stage => Some(7),
            ScopeLevel::Global | ScopeLevel::Value => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "statement" => ScopeLevel::Statement,
            "trx" => ScopeLevel::Trx,
            "iter" => ScopeLevel::Iter,
            "client" => ScopeLevel::Client,
            "client-group" => ScopeLevel::ClientGroup,
            "exec-group" => ScopeLevel::ExecGroup,
            "workload" => ScopeLevel::Workload,
            "stage" => ScopeLevel::Stage,
            "global" => ScopeLevel::Global,
            "row" => ScopeLevel::Row,
            "value" => ScopeLevel::Value,
            _ => return None,
        })
    }

    /// True for scopes whose `ScopedGenerator` cache must be shared across
    /// more than one client (and therefore needs a mutex, not a plain
    /// cell): `client-group`, `exec-group`, `workload`.
    pub fn is_multi_client(self) -> bool {
        matches!(
            self,
            ScopeLevel::ClientGroup | ScopeLevel::ExecGroup | ScopeLevel::Workload
        )
    }

    pub fn is_one_time(self) -> bool {
        matches!(self, ScopeLevel::Stage | ScopeLevel::Global)
    }
}

/// A fixed-size vector of monotonically non-decreasing counters, one per
/// [`ScopeLevel`] below `Global`. Each client owns its own; counters at or
/// below `iter` are advanced by the client loop, counters at or above
/// `client` are fixed at allocation time from the workload assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCount([u64; LEVELS]);

impl RunCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, level: ScopeLevel) -> u64 {
        match level.index() {
            Some(idx) => self.0[idx],
            None => 0,
        }
    }

    pub fn set(&mut self, level: ScopeLevel, value: u64) {
        if let Some(idx) = level.index() {
            self.0[idx] = value;
        }
    }

    pub fn increment(&mut self, level: ScopeLevel) {
        if let Some(idx) = level.index() {
            self.0[idx] += 1;
        }
    }

    /// `GreaterThan(prev, scope)`: true iff any counter at or above `scope`
    /// (i.e. `scope` itself or any coarser level) strictly exceeds the
    /// corresponding counter in `prev`.
    pub fn greater_than(&self, prev: &RunCount, scope: ScopeLevel) -> bool {
        let Some(start) = scope.index() else {
            // Global/Value are handled by their own rule, never via
            // counter comparison.
            return false;
        };
        (start..LEVELS).any(|idx| self.0[idx] > prev.0[idx])
    }
}

/// Identity tuple of a running client at a point in time, plus the names
/// needed for diagnostics. Totally ordered within one client by
/// lexicographic reading of `(Stage, ExecGroup, ClientGroup, Client, Trx,
/// Query)`; carries the same counters as [`RunCount`] so `Scope::copy` can
/// compare a key's last-copied level against the client's current level.
#[derive(Debug, Clone, Default)]
pub struct RunLevel {
    pub counts: RunCount,
    pub names: Arc<RunLevelNames>,
}

/// Human-readable names accompanying a [`RunLevel`], used only for
/// diagnostics (error messages, the `ScopedGenerator::Id` tuple).
#[derive(Debug, Clone, Default)]
pub struct RunLevelNames {
    pub stage: String,
    pub exec_group: u32,
    pub client_group: u32,
    pub client: u32,
    pub trx: String,
}

impl RunLevel {
    pub fn new(names: RunLevelNames) -> Self {
        Self {
            counts: RunCount::new(),
            names: Arc::new(names),
        }
    }

    pub fn greater_than(&self, prev: &RunLevel, scope: ScopeLevel) -> bool {
        self.counts.greater_than(&prev.counts, scope)
    }
}

/// Diagnostic identity of one [`ScopedGenerator`] instance: which
/// `RunLevel` allocated it, at which scope, wrapping which generator type,
/// for which data key, and which copy number it is.
#[derive(Debug, Clone)]
pub struct ScopedGeneratorId {
    pub run_level_stage: String,
    pub scope: ScopeLevel,
    pub generator_type: &'static str,
    pub data_key: String,
    pub copy_no: u32,
}

/// Per-client cache entry for a multi-client-scoped generator: the last
/// `iter` at which a value was produced for a given client, and the value
/// itself.
#[derive(Debug, Clone)]
struct ClientSlot {
    last_iter: u64,
    values: Vec<Value>,
}

/// Wraps a [`Generator`] with scope-aware caching, per the runtime
/// enforcement rules below.
pub struct ScopedGenerator {
    pub id: ScopedGeneratorId,
    scope: ScopeLevel,
    inner: Box<dyn Generator>,
    // Single-client scopes: plain mutex-guarded cache (only ever touched
    // by the one client that owns this instance, but `Mutex` keeps the
    // type `Sync` without unsafe).
    single: Mutex<SingleCache>,
    // Multi-client scopes: one slot per client number, guarded by an
    // `RwLock` so concurrent reads of different clients' slots don't
    // serialize unnecessarily.
    multi: RwLock<HashMap<u32, ClientSlot>>,
    // One-time scopes (`stage`/`global`): produced at most once.
    once: Mutex<Option<Vec<Value>>>,
}

#[derive(Debug, Default)]
struct SingleCache {
    last: RunCount,
    values: Vec<Value>,
    produced: bool,
}

impl ScopedGenerator {
    pub fn new(id: ScopedGeneratorId, scope: ScopeLevel, inner: Box<dyn Generator>) -> Self {
        Self {
            id,
            scope,
            inner,
            single: Mutex::new(SingleCache::default()),
            multi: RwLock::new(HashMap::new()),
            once: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn format(&self) -> crate::value::Format {
        self.inner.format()
    }

    /// The scope-checked retrieval used on the hot path: regenerate only
    /// when the relevant counter has advanced since the last call,
    /// otherwise replay the cached value.
    pub fn values(&self, client_no: u32, cnt: &RunCount) -> Vec<Value> {
        if matches!(self.scope, ScopeLevel::Value) {
            return self.inner.values(cnt);
        }

        if self.scope.is_one_time() {
            let mut once = self.once.lock();
            if once.is_none() {
                *once = Some(self.inner.values(cnt));
            }
            return once.as_ref().unwrap().clone();
        }

        if self.scope.is_multi_client() {
            let iter = cnt.get(ScopeLevel::Iter);
            {
                let guard = self.multi.read();
                if let Some(slot) = guard.get(&client_no) {
                    if slot.last_iter >= iter {
                        return slot.values.clone();
                    }
                }
            }
            let mut guard = self.multi.write();
            let fresh = match guard.get(&client_no) {
                Some(slot) if slot.last_iter >= iter => return slot.values.clone(),
                _ => self.inner.values(cnt),
            };
            guard.insert(
                client_no,
                ClientSlot {
                    last_iter: iter,
                    values: fresh.clone(),
                },
            );
            return fresh;
        }

        // Single-client scopes: statement, trx, iter, client.
        let mut single = self.single.lock();
        if !single.produced || cnt.greater_than(&single.last, self.scope) {
            single.values = self.inner.values(cnt);
            single.last = *cnt;
            single.produced = true;
        }
        single.values.clone()
    }

    /// The unconditional-produce variant used when the compiler marked an
    /// input with the explicit-call syntax `@d()`.
    pub fn call(&self, client_no: u32, cnt: &RunCount) -> Vec<Value> {
        let fresh = self.inner.values(cnt);

        if self.scope.is_one_time() {
            *self.once.lock() = Some(fresh.clone());
        } else if self.scope.is_multi_client() {
            let iter = cnt.get(ScopeLevel::Iter);
            self.multi.write().insert(
                client_no,
                ClientSlot {
                    last_iter: iter,
                    values: fresh.clone(),
                },
            );
        } else if !matches!(self.scope, ScopeLevel::Value) {
            let mut single = self.single.lock();
            single.values = fresh.clone();
            single.last = *cnt;
            single.produced = true;
        }
        fresh
    }

    pub fn scan(&self, raw: Value) {
        self.inner.scan(raw);
    }
}

impl std::fmt::Debug for ScopedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedGenerator")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Metadata for one `@d` occurrence, as recorded by the trx compiler.
#[derive(Clone)]
pub struct Key {
    pub name: String,
    pub file: std::path::PathBuf,
    pub line: usize,
    pub stmt_index: usize,
    /// -1 if not a column capture, 0 for insert-id, >=1 for column
    /// position.
    pub column_index: i32,
    /// `None` means the trx file never set an explicit scope; the default
    /// rule supplies it (`trx` for `column` generators, `statement`
    /// otherwise) at copy time.
    pub scope: Option<ScopeLevel>,
    /// Copy 0: the generator instance constructed by the factory, from
    /// which every `ScopedGenerator`'s inner generator is `Copy()`-ed.
    pub generator: Arc<dyn Generator>,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("column_index", &self.column_index)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Key {
    pub fn default_scope(&self) -> ScopeLevel {
        self.scope.unwrap_or(if self.column_index >= 0 {
            ScopeLevel::Trx
        } else {
            ScopeLevel::Statement
        })
    }
}

/// The process-wide symbol table for one stage.
/// `Keys` is populated by the trx compiler and never mutated after
/// compilation; `copy_of`/`copied_at`/`copy_count` are populated lazily by
/// the workload allocator as it walks the `RunLevel` tree.
pub struct Scope {
    keys: HashMap<String, Key>,
    copy_of: Mutex<HashMap<String, Arc<ScopedGenerator>>>,
    copied_at: Mutex<HashMap<String, RunLevel>>,
    copy_count: Mutex<HashMap<String, u32>>,
    /// Singleton no-op generator bound to the reserved name `"_"`.
    noop: Arc<ScopedGenerator>,
}

impl Scope {
    pub fn new(keys: HashMap<String, Key>) -> Self {
        Self {
            keys,
            copy_of: Mutex::new(HashMap::new()),
            copied_at: Mutex::new(HashMap::new()),
            copy_count: Mutex::new(HashMap::new()),
            noop: Arc::new(ScopedGenerator::new(
                ScopedGeneratorId {
                    run_level_stage: String::new(),
                    scope: ScopeLevel::Value,
                    generator_type: "noop",
                    data_key: "_".to_string(),
                    copy_no: 0,
                },
                ScopeLevel::Value,
                Box::new(crate::generator::noop::NoopGenerator),
            )),
        }
    }

    pub fn key(&self, name: &str) -> Option<&Key> {
        self.keys.get(name)
    }

    /// The central `Scope.Copy` algorithm, evaluated in order.
    ///
    /// Returns `None` for `@PREV`, signalling the caller to bind the
    /// neighboring input slot instead.
    pub fn copy(&self, key_name: &str, rl: &RunLevel) -> Option<Arc<ScopedGenerator>> {
        if key_name == "@PREV" {
            return None;
        }
        if key_name == "_" {
            return Some(self.noop.clone());
        }

        let key = self
            .keys
            .get(key_name)
            .unwrap_or_else(|| panic!("internal invariant violation: unknown data key {key_name:?} reached Scope::copy"));
        let scope = key.default_scope();

        let needs_copy = {
            let copied_at = self.copied_at.lock();
            match copied_at.get(key_name) {
                Some(prev) => rl.greater_than(prev, scope),
                None => true,
            }
        };

        if needs_copy {
            let mut copy_count = self.copy_count.lock();
            let copy_no = copy_count.entry(key_name.to_string()).or_insert(0);
            *copy_no += 1;
            let id = ScopedGeneratorId {
                run_level_stage: rl.names.stage.clone(),
                scope,
                generator_type: key.generator.name(),
                data_key: key_name.to_string(),
                copy_no: *copy_no,
            };
            let sg = Arc::new(ScopedGenerator::new(id, scope, key.generator.copy()));
            self.copy_of.lock().insert(key_name.to_string(), sg);
            self.copied_at.lock().insert(key_name.to_string(), rl.clone());
        }

        self.copy_of.lock().get(key_name).cloned()
    }

    /// Discards every entry whose scope is strictly below `stage`;
    /// `stage`- and `global`-scoped generators survive into later stages.
    ///
    /// This only prunes cached `ScopedGenerator`s *within this `Scope`
    /// instance* — it does not by itself make a `stage`/`global` generator
    /// visible to a later stage, since each stage compiles a brand-new
    /// `Scope`. Callers that need values to persist across stage
    /// boundaries must pair this with [`Scope::survivors`] (taken after
    /// `reset`) and [`Scope::adopt_survivors`] (applied to the next
    /// stage's freshly compiled `Scope`); see `stage::run_all_cancellable`.
    pub fn reset(&self) {
        let survivors: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, k)| matches!(k.default_scope(), ScopeLevel::Stage | ScopeLevel::Global))
            .map(|(name, _)| name.clone())
            .collect();
        let survivors: std::collections::HashSet<_> = survivors.into_iter().collect();

        self.copy_of.lock().retain(|name, _| survivors.contains(name));
        self.copied_at.lock().retain(|name, _| survivors.contains(name));
        self.copy_count.lock().retain(|name, _| survivors.contains(name));
    }

    /// Snapshot of every `stage`/`global`-scoped `ScopedGenerator` this
    /// `Scope` currently has cached, keyed by data key name. Meant to be
    /// called right after [`Scope::reset`] (whose filtering already
    /// restricted `copy_of` to exactly these entries), so the stage runner
    /// can hand the live instances — carrying whatever internal state
    /// they've accumulated, e.g. an `auto-inc`'s current counter — to the
    /// next stage's freshly compiled `Scope`.
    pub fn survivors(&self) -> HashMap<String, Arc<ScopedGenerator>> {
        self.copy_of.lock().clone()
    }

    /// Seeds this (freshly compiled) `Scope` with `ScopedGenerator`
    /// instances carried over from a previous stage via [`Scope::survivors`],
    /// so [`Scope::copy`] reuses them instead of minting a new instance
    /// around a newly `Factory`-built generator — the fix for `stage`/
    /// `global` generators otherwise restarting from their configured
    /// defaults every stage. Only adopts entries whose key is still
    /// declared in this stage and whose default scope is still `stage` or
    /// `global` here; anything else is silently left for `copy` to mint
    /// fresh, on the assumption the key's role changed between stages.
    pub fn adopt_survivors(&self, survivors: &HashMap<String, Arc<ScopedGenerator>>) {
        if survivors.is_empty() {
            return;
        }
        let mut copy_of = self.copy_of.lock();
        let mut copied_at = self.copied_at.lock();
        for (name, generator) in survivors {
            let Some(key) = self.keys.get(name) else { continue };
            if !key.default_scope().is_one_time() {
                continue;
            }
            copy_of.insert(name.clone(), generator.clone());
            copied_at.insert(name.clone(), RunLevel::default());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::constant::ConstantGenerator;
    use crate::value::Value;

    fn key(name: &str, scope: Option<ScopeLevel>) -> Key {
        Key {
            name: name.to_string(),
            file: "t.trx".into(),
            line: 1,
            stmt_index: 0,
            column_index: -1,
            scope,
            generator: Arc::new(ConstantGenerator::new(Value::Int(7))),
        }
    }

    fn rl(stage: u64, exec_group: u64, client_group: u64, client: u64, trx: u64, query: u64) -> RunLevel {
        let mut r = RunLevel::new(RunLevelNames::default());
        r.counts.set(ScopeLevel::Stage, stage);
        r.counts.set(ScopeLevel::ExecGroup, exec_group);
        r.counts.set(ScopeLevel::ClientGroup, client_group);
        r.counts.set(ScopeLevel::Client, client);
        r.counts.set(ScopeLevel::Trx, trx);
        r.counts.set(ScopeLevel::Statement, query);
        r
    }

    #[test]
    fn copy_is_idempotent_until_scope_advances() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), key("a", Some(ScopeLevel::Trx)));
        let scope = Scope::new(keys);

        let r1 = rl(0, 0, 0, 0, 1, 1);
        let g1 = scope.copy("a", &r1).unwrap();

        let r2 = rl(0, 0, 0, 0, 1, 2); // statement advanced, trx did not
        let g2 = scope.copy("a", &r2).unwrap();
        assert!(Arc::ptr_eq(&g1, &g2), "same trx counter must reuse the instance");

        let r3 = rl(0, 0, 0, 0, 2, 2); // trx advanced
        let g3 = scope.copy("a", &r3).unwrap();
        assert!(!Arc::ptr_eq(&g1, &g3), "trx advancing must mint a new copy");
    }

    #[test]
    fn prev_and_noop_are_sentinels() {
        let scope = Scope::new(HashMap::new());
        assert!(scope.copy("@PREV", &RunLevel::default()).is_none());
        assert!(scope.copy("_", &RunLevel::default()).is_some());
    }

    proptest::proptest! {
        /// `Scope.Copy(name, rl)` is idempotent unless `rl`
        /// advanced some counter at or above the key's scope relative to
        /// the `RunLevel` the key was last copied at.
        #[test]
        fn copy_idempotence_matches_greater_than(trx1 in 0u64..4, stmt1 in 0u64..4, trx2 in 0u64..4, stmt2 in 0u64..4) {
            let mut keys = HashMap::new();
            keys.insert("a".to_string(), key("a", Some(ScopeLevel::Trx)));
            let scope = Scope::new(keys);

            let r1 = rl(0, 0, 0, 0, trx1, stmt1);
            let g1 = scope.copy("a", &r1).unwrap();

            let r2 = rl(0, 0, 0, 0, trx2, stmt2);
            let g2 = scope.copy("a", &r2).unwrap();

            let advanced = r2.greater_than(&r1, ScopeLevel::Trx);
            proptest::prop_assert_eq!(!advanced, Arc::ptr_eq(&g1, &g2));
        }
    }

    #[test]
    fn reset_drops_non_stage_entries() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), key("a", Some(ScopeLevel::Client)));
        keys.insert("b".to_string(), key("b", Some(ScopeLevel::Stage)));
        let scope = Scope::new(keys);

        let r = rl(0, 0, 0, 0, 1, 1);
        let a1 = scope.copy("a", &r).unwrap();
        let b1 = scope.copy("b", &r).unwrap();

        scope.reset();

        let a2 = scope.copy("a", &r).unwrap();
        let b2 = scope.copy("b", &r).unwrap();
        assert!(!Arc::ptr_eq(&a1, &a2), "client-scoped entry must not survive reset");
        assert!(Arc::ptr_eq(&b1, &b2), "stage-scoped entry must survive reset");
    }

    #[test]
    fn adopt_survivors_carries_a_stage_scoped_instance_across_scope_objects() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), key("a", Some(ScopeLevel::Stage)));
        let first = Scope::new(keys);

        let r = rl(0, 0, 0, 0, 1, 1);
        let g1 = first.copy("a", &r).unwrap();
        first.reset();
        let survivors = first.survivors();
        assert!(survivors.contains_key("a"));

        // A brand-new `Scope` (as every stage compiles) would otherwise
        // mint a brand-new instance here.
        let mut keys2 = HashMap::new();
        keys2.insert("a".to_string(), key("a", Some(ScopeLevel::Stage)));
        let second = Scope::new(keys2);
        second.adopt_survivors(&survivors);

        let g2 = second.copy("a", &r).unwrap();
        assert!(Arc::ptr_eq(&g1, &g2), "adopted survivor must be the same instance the previous stage produced");
    }

    #[test]
    fn adopt_survivors_ignores_keys_no_longer_declared() {
        let mut keys = HashMap::new();
        keys.insert("a".to_string(), key("a", Some(ScopeLevel::Global)));
        let first = Scope::new(keys);
        let r = rl(0, 0, 0, 0, 1, 1);
        first.copy("a", &r).unwrap();
        first.reset();
        let survivors = first.survivors();

        // The next stage never declares key "a" at all.
        let second = Scope::new(HashMap::new());
        second.adopt_survivors(&survivors);
        assert!(second.copy("a", &r).is_none() || second.key("a").is_none());
    }
}
