//! The trx compiler (component C): turns a stage's `.trx` SQL files into a
//! [`Set`] of [`Statement`]s bound to a populated [`Scope`] symbol table.
//!
//! Eight steps run per accumulated statement block: classify, apply
//! modifiers, substitute `/*!copy-number*/`, expand `/*!csv*/`, scan `@d`
//! tokens, resolve each token to a (possibly shared) data key, substitute
//! the resolved format into the query text, and finally emit one or more
//! [`Statement`]s (more than one iff `copies` was set).

mod csv;
mod lexer;
mod modifiers;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use bitflags::bitflags;
use regex::Regex;

use crate::error::FinchError;
use crate::generator::{Factory, Params};
use crate::scope::{Key, Scope, ScopeLevel};
use modifiers::Modifier;

bitflags! {
    /// Classification bits assigned to every compiled statement. A
    /// statement always has exactly one of `RESULT_SET`/`WRITE`/`DDL`/
    /// `BEGIN`/`COMMIT` set by [`classify`]; `PREPARE` is added
    /// separately by the `prepare`/`prepared` modifier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatementFlags: u8 {
        const RESULT_SET = 0b0000_0001;
        const PREPARE    = 0b0000_0010;
        const BEGIN      = 0b0000_0100;
        const COMMIT     = 0b0000_1000;
        const WRITE      = 0b0001_0000;
        const DDL        = 0b0010_0000;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowsLimit {
    pub rows: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimitKind {
    Table,
    Database,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeLimit {
    pub kind: SizeLimitKind,
    pub scope: ScopeLevel,
    pub bytes: u64,
}

/// One resolved `@d` occurrence inside a statement's query text, in the
/// order it appears.
#[derive(Debug, Clone)]
pub struct InputRef {
    /// Resolved key name (`@PREV` is always resolved to the neighboring
    /// input's key before this struct is built).
    pub key: String,
    /// Whether the occurrence used the explicit-call form `@key()`, which
    /// bypasses the scope cache and always regenerates.
    pub forced_call: bool,
    /// `true` for a literal `@PREV` occurrence: at runtime this slot must
    /// not call the generator again, it must reuse the value vector the
    /// owning (non-`@PREV`) occurrence just produced.
    pub is_prev: bool,
    /// Which element of the generator's value vector this occurrence
    /// contributes. `0` and ignored when `whole` is `true`.
    pub value_index: usize,
    /// `true` when this occurrence consumes the generator's entire value
    /// vector (the common case: a bare `@d` with no following `@PREV`).
    /// `false` when the vector is split across this occurrence and one or
    /// more following `@PREV`s (`BETWEEN @d AND @PREV` against an
    /// arity-2 generator), in which case this occurrence contributes only
    /// `value_index`.
    pub whole: bool,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub trx: String,
    pub file: PathBuf,
    pub line: usize,
    pub stmt_index: usize,
    /// Fully substituted query text: every `@d` occurrence has been
    /// replaced by its generator's printf template (unprepared) or `?`
    /// placeholders (prepared), so this string is itself a valid
    /// [`crate::value::Format`] template whose arity is the sum of every
    /// input's arity, in order.
    pub query: String,
    pub flags: StatementFlags,
    /// `Some(n)` on the leading copy of a `prepare`d, `copies`-expanded
    /// statement that shares one prepared handle across `n` textually
    /// identical copies; `None` otherwise, including on
    /// every non-leading copy and on any statement containing a literal
    /// `/*!copy-number*/` token (each such copy is textually distinct, so
    /// sharing a prepared handle does not apply).
    pub prepare_multi: Option<u32>,
    pub idle: Option<Duration>,
    pub inputs: Vec<InputRef>,
    pub insert_id: Option<String>,
    /// Position-indexed `save-columns` destinations for a `RESULT_SET`
    /// statement: `outputs[i]` is the key name bound to column `i` of the
    /// result set, or `None` for a `_` skip.
    pub outputs: Vec<Option<String>>,
    pub rows_limit: Option<RowsLimit>,
    pub size_limit: Option<SizeLimit>,
}

#[derive(Debug, Clone)]
pub struct DataCfg {
    pub generator: String,
    pub scope: Option<String>,
    pub params: Params,
}

#[derive(Debug, Clone)]
pub struct TrxSpec {
    pub file: PathBuf,
    pub name: String,
    pub data: HashMap<String, DataCfg>,
}

pub struct TrxMeta {
    pub file: PathBuf,
}

/// The trx compiler's output: every statement, grouped by trx name in
/// source order, plus the [`Scope`] symbol table those statements'
/// `inputs` reference.
pub struct Set {
    pub order: Vec<String>,
    pub statements: HashMap<String, Vec<Statement>>,
    pub meta: HashMap<String, TrxMeta>,
    pub scope: Scope,
}

impl Set {
    pub fn statement_count(&self) -> usize {
        self.statements.values().map(|v| v.len()).sum()
    }
}

pub fn compile(
    specs: &[TrxSpec],
    contents: &HashMap<PathBuf, String>,
    stage_params: &HashMap<String, String>,
) -> Result<Set, FinchError> {
    let factory = Factory::with_builtins();
    let mut keys: HashMap<String, Key> = HashMap::new();
    let mut declared_via_capture: HashSet<String> = HashSet::new();
    let mut referenced: HashSet<String> = HashSet::new();

    let mut order = Vec::with_capacity(specs.len());
    let mut statements = HashMap::with_capacity(specs.len());
    let mut meta = HashMap::with_capacity(specs.len());

    for spec in specs {
        let data = contents
            .get(&spec.file)
            .ok_or_else(|| FinchError::config(format!("trx file {:?} not loaded", spec.file)))?;
        let stmts = compile_trx(
            spec,
            data,
            stage_params,
            &factory,
            &mut keys,
            &mut declared_via_capture,
            &mut referenced,
        )?;
        order.push(spec.name.clone());
        meta.insert(spec.name.clone(), TrxMeta { file: spec.file.clone() });
        statements.insert(spec.name.clone(), stmts);
    }

    let unreferenced: Vec<&String> = declared_via_capture.difference(&referenced).collect();
    if let Some(name) = unreferenced.into_iter().next() {
        return Err(FinchError::config(format!(
            "data key {name:?} is captured via save-columns/save-insert-id but never referenced by a later statement"
        )));
    }

    Ok(Set {
        order,
        statements,
        meta,
        scope: Scope::new(keys),
    })
}

fn at_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(PREV|[A-Za-z_][\w-]*)(\(\))?").unwrap())
}

fn copy_number_token() -> &'static str {
    "/*!copy-number*/"
}

#[allow(clippy::too_many_arguments)]
fn compile_trx(
    spec: &TrxSpec,
    data: &str,
    stage_params: &HashMap<String, String>,
    factory: &Factory,
    keys: &mut HashMap<String, Key>,
    declared_via_capture: &mut HashSet<String>,
    referenced: &mut HashSet<String>,
) -> Result<Vec<Statement>, FinchError> {
    let blocks = lexer::split(&spec.file, data, stage_params)?;
    let mut stmt_index = 0usize;
    let mut out = Vec::new();

    for block in blocks {
        let mut mods = Vec::with_capacity(block.mod_lines.len());
        for (lineno, line) in &block.mod_lines {
            mods.push(modifiers::parse(&spec.file, *lineno, line)?);
        }

        let copies = mods
            .iter()
            .find_map(|m| if let Modifier::Copies(n) = m { Some(*n) } else { None })
            .unwrap_or(1);

        let raw_text = block.text.trim().to_string();
        if raw_text.is_empty() {
            return Err(FinchError::compile(&spec.file, block.start_line, "statement text is empty"));
        }

        let has_copy_number_token = raw_text.contains(copy_number_token());
        let flags_base = classify(&raw_text);
        let prepared = mods.iter().any(|m| matches!(m, Modifier::Prepare));

        for m in &mods {
            if let Modifier::SaveInsertId(_) = m {
                if flags_base.contains(StatementFlags::RESULT_SET) {
                    return Err(FinchError::compile(
                        &spec.file,
                        block.start_line,
                        "save-insert-id modifier is not valid on a SELECT statement",
                    ));
                }
            }
        }

        let mut copy_statements = Vec::with_capacity(copies as usize);
        for copy_no in 1..=copies {
            let mut text = if has_copy_number_token {
                raw_text.replace(copy_number_token(), &copy_no.to_string())
            } else {
                raw_text.clone()
            };
            text = csv::expand(&text);

            let stmt = build_statement(
                spec,
                &block,
                stmt_index,
                &text,
                flags_base,
                &mods,
                factory,
                keys,
                declared_via_capture,
                referenced,
            )?;
            copy_statements.push(stmt);
        }
        stmt_index += 1;

        if prepared && copies > 1 && !has_copy_number_token {
            copy_statements[0].prepare_multi = Some(copies);
        }

        out.extend(copy_statements);
    }

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn build_statement(
    spec: &TrxSpec,
    block: &lexer::RawBlock,
    stmt_index: usize,
    text: &str,
    flags_base: StatementFlags,
    mods: &[Modifier],
    factory: &Factory,
    keys: &mut HashMap<String, Key>,
    declared_via_capture: &mut HashSet<String>,
    referenced: &mut HashSet<String>,
) -> Result<Statement, FinchError> {
    let prepared = mods.iter().any(|m| matches!(m, Modifier::Prepare));
    let mut flags = flags_base;
    if prepared {
        flags |= StatementFlags::PREPARE;
    }

    let mut idle = None;
    let mut rows_limit = None;
    let mut size_limit = None;
    let mut insert_id = None;
    let mut save_columns: Option<Vec<String>> = None;

    for m in mods {
        match m {
            Modifier::Idle(d) => idle = Some(*d),
            Modifier::Rows { rows, offset } => rows_limit = Some(RowsLimit { rows: *rows, offset: *offset }),
            Modifier::TableSize { scope, bytes } => {
                size_limit = Some(SizeLimit {
                    kind: SizeLimitKind::Table,
                    scope: *scope,
                    bytes: *bytes,
                })
            }
            Modifier::DatabaseSize { scope, bytes } => {
                size_limit = Some(SizeLimit {
                    kind: SizeLimitKind::Database,
                    scope: *scope,
                    bytes: *bytes,
                })
            }
            Modifier::SaveInsertId(key) => insert_id = Some(key.clone()),
            Modifier::SaveColumns(cols) => save_columns = Some(cols.clone()),
            Modifier::Prepare | Modifier::Copies(_) => {}
        }
    }

    // Register save-columns captures before scanning @d tokens, so a
    // statement that both captures and immediately re-references a column
    // (unusual, but not forbidden) resolves correctly.
    if let Some(cols) = &save_columns {
        for (position, name) in cols.iter().enumerate() {
            if name == "_" {
                continue;
            }
            let generator = crate::generator::column::ColumnGenerator::from_params(&Params::new())?;
            keys.insert(
                name.clone(),
                Key {
                    name: name.clone(),
                    file: spec.file.clone(),
                    line: block.start_line,
                    stmt_index,
                    column_index: (position + 1) as i32,
                    scope: None,
                    generator: std::sync::Arc::new(generator),
                },
            );
            declared_via_capture.insert(name.clone());
        }
    }
    if let Some(key) = &insert_id {
        let generator = crate::generator::column::ColumnGenerator::from_params(&Params::new())?;
        keys.insert(
            key.clone(),
            Key {
                name: key.clone(),
                file: spec.file.clone(),
                line: block.start_line,
                stmt_index,
                column_index: 0,
                scope: None,
                generator: std::sync::Arc::new(generator),
            },
        );
        declared_via_capture.insert(key.clone());
    }

    // Pass 1: walk the tokens left to right, resolving `@PREV` to the
    // immediately preceding occurrence's key and registering/looking up
    // each key's generator. Chain grouping (which occurrences split a
    // multi-arity generator's value vector across `@PREV`) needs to see
    // the whole token list, so this pass only records spans and resolved
    // names; substitution text is built in pass 3.
    struct RawOccurrence {
        start: usize,
        end: usize,
        key: String,
        forced_call: bool,
        is_prev: bool,
    }

    let mut occurrences: Vec<RawOccurrence> = Vec::new();
    let mut prev_resolved: Option<String> = None;

    for m in at_token_re().captures_iter(text) {
        let whole = m.get(0).unwrap();
        let name = format!("@{}", &m[1]);
        let forced_call = m.get(2).is_some();
        let is_prev = name == "@PREV";

        let resolved = if is_prev {
            prev_resolved
                .clone()
                .ok_or_else(|| FinchError::compile(&spec.file, block.start_line, "@PREV used without a preceding input"))?
        } else {
            name.clone()
        };

        if !keys.contains_key(&resolved) {
            let cfg = spec
                .data
                .get(resolved.trim_start_matches('@'))
                .ok_or_else(|| FinchError::compile(&spec.file, block.start_line, format!("undefined data key {resolved:?}")))?;
            let generator = factory.build(&cfg.generator, &cfg.params)?;
            let scope = match &cfg.scope {
                Some(s) => Some(ScopeLevel::parse(s).ok_or_else(|| {
                    FinchError::compile(&spec.file, block.start_line, format!("unknown scope {s:?} for key {resolved:?}"))
                })?),
                None => None,
            };
            keys.insert(
                resolved.clone(),
                Key {
                    name: resolved.clone(),
                    file: spec.file.clone(),
                    line: block.start_line,
                    stmt_index,
                    column_index: -1,
                    scope,
                    generator,
                },
            );
        } else {
            referenced.insert(resolved.clone());
        }

        occurrences.push(RawOccurrence {
            start: whole.start(),
            end: whole.end(),
            key: resolved.clone(),
            forced_call,
            is_prev,
        });
        prev_resolved = Some(resolved);
    }

    // Pass 2: group each maximal run of `@PREV`s onto the non-`@PREV`
    // occurrence that starts it ("the nearest preceding non-@PREV
    // input", spec.md §4.C step 6). A chain of length 1 (no trailing
    // `@PREV`) consumes the generator's whole value vector at that one
    // occurrence, exactly as before. A longer chain splits the vector:
    // the starter contributes index 0, each following `@PREV`
    // contributes the next index — index arithmetic on the bound
    // argument list, per spec.md §4.B/§9, instead of re-calling the
    // generator and substituting its full multi-value template again.
    let mut value_index = vec![0usize; occurrences.len()];
    let mut whole = vec![true; occurrences.len()];
    let mut i = 0;
    while i < occurrences.len() {
        let mut j = i + 1;
        while j < occurrences.len() && occurrences[j].is_prev && occurrences[j].key == occurrences[i].key {
            j += 1;
        }
        let chain_len = j - i;
        if chain_len > 1 {
            let arity = keys[&occurrences[i].key].generator.format().arity;
            if chain_len > arity {
                return Err(FinchError::compile(
                    &spec.file,
                    block.start_line,
                    format!(
                        "@PREV chain for key {:?} references {chain_len} values but its generator only produces {arity}",
                        occurrences[i].key
                    ),
                ));
            }
            for (k, slot) in (i..j).enumerate() {
                value_index[slot] = k;
                whole[slot] = false;
            }
        }
        i = j;
    }

    // Pass 3: build the substituted query text and the final `inputs`
    // list using the chain assignment from pass 2.
    let mut inputs = Vec::with_capacity(occurrences.len());
    let mut rendered = String::with_capacity(text.len());
    let mut last_end = 0;

    for (idx, occ) in occurrences.iter().enumerate() {
        rendered.push_str(&text[last_end..occ.start]);
        last_end = occ.end;

        let key = keys.get(&occ.key).expect("registered in pass 1");
        let fmt = key.generator.format();
        let substitution = if whole[idx] {
            if prepared {
                fmt.placeholder_template()
            } else {
                fmt.template.clone()
            }
        } else if prepared {
            "?".to_string()
        } else {
            format!("%{}", fmt.specifier_kind(value_index[idx]))
        };
        rendered.push_str(&substitution);

        inputs.push(InputRef {
            key: occ.key.clone(),
            forced_call: occ.forced_call,
            is_prev: occ.is_prev,
            value_index: value_index[idx],
            whole: whole[idx],
        });
    }
    rendered.push_str(&text[last_end..]);

    let outputs = save_columns
        .map(|cols| cols.into_iter().map(|c| if c == "_" { None } else { Some(c) }).collect())
        .unwrap_or_default();

    Ok(Statement {
        trx: spec.name.clone(),
        file: spec.file.clone(),
        line: block.start_line,
        stmt_index,
        query: rendered,
        flags,
        prepare_multi: None,
        idle,
        inputs,
        insert_id,
        outputs,
        rows_limit,
        size_limit,
    })
}

/// Classify a statement by its leading keyword.
fn classify(text: &str) -> StatementFlags {
    let head = text
        .trim_start()
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match head.as_str() {
        "SELECT" => StatementFlags::RESULT_SET,
        "BEGIN" | "START" => StatementFlags::BEGIN,
        "COMMIT" => StatementFlags::COMMIT,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementFlags::WRITE,
        "ALTER" | "CREATE" | "DROP" | "RENAME" | "TRUNCATE" => StatementFlags::DDL,
        _ => StatementFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(file: &str, data: &HashMap<String, DataCfg>) -> TrxSpec {
        TrxSpec {
            file: PathBuf::from(file),
            name: file.trim_end_matches(".trx").to_string(),
            data: data.clone(),
        }
    }

    fn int_cfg() -> DataCfg {
        DataCfg {
            generator: "int".to_string(),
            scope: None,
            params: Params::new(),
        }
    }

    #[test]
    fn classifies_statement_kinds() {
        assert_eq!(classify("select * from t"), StatementFlags::RESULT_SET);
        assert_eq!(classify("  INSERT INTO t VALUES (1)"), StatementFlags::WRITE);
        assert_eq!(classify("begin"), StatementFlags::BEGIN);
        assert_eq!(classify("CREATE TABLE t (id INT)"), StatementFlags::DDL);
    }

    #[test]
    fn compiles_a_single_statement_substituting_its_generator_template() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("read.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "SELECT * FROM t WHERE id = @id\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmts = &set.statements["read"];
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].query.contains('%'), "unprepared statement should keep a printf specifier");
        assert_eq!(stmts[0].inputs.len(), 1);
        assert_eq!(stmts[0].inputs[0].key, "@id");
    }

    #[test]
    fn prepared_statement_substitutes_placeholders() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("read.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "-- prepare\nSELECT * FROM t WHERE id = @id\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmt = &set.statements["read"][0];
        assert!(stmt.flags.contains(StatementFlags::PREPARE));
        assert!(stmt.query.contains('?'));
        assert!(!stmt.query.contains('%'));
    }

    #[test]
    fn prev_splits_a_multi_arity_generators_value_vector() {
        let mut data = HashMap::new();
        data.insert(
            "id".to_string(),
            DataCfg {
                generator: "int-range".to_string(),
                scope: None,
                params: Params::new(),
            },
        );
        let s = spec("read.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "SELECT * FROM t WHERE id BETWEEN @id AND @PREV\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmt = &set.statements["read"][0];

        // Each occurrence contributes exactly one value, not the whole
        // two-value template twice: "BETWEEN %d AND %d", not
        // "BETWEEN %d, %d AND %d, %d".
        assert_eq!(stmt.query, "SELECT * FROM t WHERE id BETWEEN %d AND %d\n");
        assert_eq!(stmt.inputs.len(), 2);
        assert!(!stmt.inputs[0].is_prev);
        assert!(!stmt.inputs[0].whole);
        assert_eq!(stmt.inputs[0].value_index, 0);
        assert!(stmt.inputs[1].is_prev);
        assert!(!stmt.inputs[1].whole);
        assert_eq!(stmt.inputs[1].value_index, 1);
    }

    #[test]
    fn prev_chain_longer_than_generator_arity_is_a_compile_error() {
        let mut data = HashMap::new();
        data.insert(
            "id".to_string(),
            DataCfg {
                generator: "int-range".to_string(),
                scope: None,
                params: Params::new(),
            },
        );
        let s = spec("read.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(
            s.file.clone(),
            "SELECT * FROM t WHERE id BETWEEN @id AND @PREV AND @PREV\n".to_string(),
        );

        assert!(compile(&[s], &contents, &HashMap::new()).is_err());
    }

    #[test]
    fn bare_multi_arity_key_without_prev_keeps_whole_vector_substitution() {
        let mut data = HashMap::new();
        data.insert(
            "id".to_string(),
            DataCfg {
                generator: "int-range".to_string(),
                scope: None,
                params: Params::new(),
            },
        );
        let s = spec("w.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "INSERT INTO t VALUES (@id)\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmt = &set.statements["w"][0];
        assert_eq!(stmt.query, "INSERT INTO t VALUES (%d, %d)\n");
        assert_eq!(stmt.inputs.len(), 1);
        assert!(stmt.inputs[0].whole);
    }

    #[test]
    fn prev_as_first_input_is_a_compile_error() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("read.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "SELECT * FROM t WHERE id = @PREV\n".to_string());

        assert!(compile(&[s], &contents, &HashMap::new()).is_err());
    }

    #[test]
    fn unreferenced_save_column_is_a_compile_error() {
        let s = spec("w.trx", &HashMap::new());
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "-- save-columns @x\nSELECT id FROM t\n".to_string());

        assert!(compile(&[s], &contents, &HashMap::new()).is_err());
    }

    #[test]
    fn save_insert_id_on_select_is_a_compile_error() {
        let s = spec("w.trx", &HashMap::new());
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "-- save-insert-id @id\nSELECT 1\n".to_string());

        assert!(compile(&[s], &contents, &HashMap::new()).is_err());
    }

    #[test]
    fn copies_expands_into_multiple_statements_sharing_prepare_multi() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("w.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "-- prepare\n-- copies 3\nINSERT INTO t VALUES (@id())\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmts = &set.statements["w"];
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0].prepare_multi, Some(3));
        assert_eq!(stmts[1].prepare_multi, None);
        assert_eq!(stmts[2].prepare_multi, None);
    }

    proptest::proptest! {
        /// For any `copies: N` on a `prepare`d statement
        /// without a `/*!copy-number*/` token, exactly the leading copy
        /// carries `prepare_multi == Some(N)`; the remaining `N-1` are
        /// plain `prepare`d singles.
        #[test]
        fn copies_prepare_multi_sharing_holds_for_any_n(n in 2u32..8) {
            let mut data = HashMap::new();
            data.insert("id".to_string(), int_cfg());
            let s = spec("w.trx", &data);
            let mut contents = HashMap::new();
            contents.insert(s.file.clone(), format!("-- prepare\n-- copies {n}\nINSERT INTO t VALUES (@id())\n"));

            let set = compile(&[s], &contents, &HashMap::new()).unwrap();
            let stmts = &set.statements["w"];
            proptest::prop_assert_eq!(stmts.len(), n as usize);
            proptest::prop_assert_eq!(stmts[0].prepare_multi, Some(n));
            for stmt in &stmts[1..] {
                proptest::prop_assert_eq!(stmt.prepare_multi, None);
                proptest::prop_assert!(stmt.flags.contains(StatementFlags::PREPARE));
            }
        }
    }

    #[test]
    fn copy_number_token_defeats_prepare_multi_sharing() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("w.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(
            s.file.clone(),
            "-- prepare\n-- copies 2\nINSERT INTO t_/*!copy-number*/ VALUES (@id())\n".to_string(),
        );

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmts = &set.statements["w"];
        assert!(stmts[0].query.contains("t_1"));
        assert!(stmts[1].query.contains("t_2"));
        assert_eq!(stmts[0].prepare_multi, None);
        assert_eq!(stmts[1].prepare_multi, None);
    }

    #[test]
    fn csv_expansion_joins_copies_with_comma() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("w.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(
            s.file.clone(),
            "INSERT INTO t VALUES /*!csv 3 (@id())*/\n".to_string(),
        );

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        let stmt = &set.statements["w"][0];
        assert_eq!(stmt.inputs.len(), 3);
    }

    #[test]
    fn repeated_key_reuses_the_same_data_key() {
        let mut data = HashMap::new();
        data.insert("id".to_string(), int_cfg());
        let s = spec("w.trx", &data);
        let mut contents = HashMap::new();
        contents.insert(s.file.clone(), "SELECT * FROM t WHERE a = @id OR b = @id\n".to_string());

        let set = compile(&[s], &contents, &HashMap::new()).unwrap();
        assert_eq!(set.scope.keys().count(), 1);
    }
}
