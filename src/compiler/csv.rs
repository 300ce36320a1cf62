//! `/*!csv N template*/` expansion: turns one comma-separated-values
//! template into `N` comma-joined copies, e.g. for multi-row `INSERT ...
//! VALUES` statements.
//!
//! The first row-scoped `@d` reference inside the
//! template is rewritten to its explicit-call form `@d()` before
//! duplication, so that every row after the first is forced to draw a
//! fresh value instead of silently reusing row 1's statement-scoped cache
//! (row scope is statement scope under a different name, so without the
//! rewrite every row would render identically).

use regex::Regex;
use std::sync::OnceLock;

static CSV_TOKEN: OnceLock<Regex> = OnceLock::new();
static AT_TOKEN: OnceLock<Regex> = OnceLock::new();

fn csv_token() -> &'static Regex {
    CSV_TOKEN.get_or_init(|| Regex::new(r"(?s)/\*!csv\s+(\d+)\s+(.*?)\*/").unwrap())
}

fn at_token() -> &'static Regex {
    AT_TOKEN.get_or_init(|| Regex::new(r"@[A-Za-z_][\w-]*(\(\))?").unwrap())
}

/// Expand every `/*!csv N template*/` occurrence in `query`.
pub fn expand(query: &str) -> String {
    csv_token()
        .replace_all(query, |caps: &regex::Captures| {
            let n: usize = caps[1].parse().unwrap_or(1);
            let template = &caps[2];
            let forced = force_first_call(template);
            std::iter::repeat(forced.as_str())
                .take(n.max(1))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .into_owned()
}

/// Rewrite the first bare `@key` occurrence of *each distinct key* (without
/// a trailing `()`) to `@key()`, leaving every later occurrence of that
/// same key untouched — only the first row-scoped draw of a given key in
/// the template needs forcing, because row/statement scope means every
/// subsequent occurrence within the same row's text would already share
/// that first draw's cache slot. A key whose first occurrence is already
/// an explicit call (e.g. a key the author already wrote as `@id()`) is
/// left alone and counts as already satisfied, so later bare occurrences
/// of that same key are not force-converted either.
fn force_first_call(template: &str) -> String {
    let mut satisfied = std::collections::HashSet::new();
    let mut out = String::with_capacity(template.len() + 8);
    let mut last_end = 0;
    for m in at_token().find_iter(template) {
        let text = m.as_str();
        out.push_str(&template[last_end..m.start()]);
        last_end = m.end();

        let is_call = text.ends_with("()");
        let key = if is_call { &text[..text.len() - 2] } else { text };

        if satisfied.insert(key.to_string()) && !is_call {
            out.push_str(text);
            out.push_str("()");
        } else {
            out.push_str(text);
        }
    }
    out.push_str(&template[last_end..]);
    out
}
