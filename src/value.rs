//! The runtime value type generators produce, and the tiny printf-style
//! renderer used to splice generated values into unprepared SQL text.
//!
//! Generators don't speak `mysql_async::Value` directly so that the
//! generator library (§4.A) stays independent of the transport layer; the
//! client execution engine (`crate::client`) is the only place a [`Value`]
//! is converted to a `mysql_async::Value` for prepared-statement binding.

use std::fmt;

/// A single generated data value.
///
/// `Bytes` exists so the `column` generator can round-trip a captured
/// column byte-for-byte (e.g. distinguishing `0x75` from the ASCII text
/// `'u'`), which a lossy string conversion would not preserve.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    /// Render as a literal SQL token (used by the `%v`/`%d`/`%s` template
    /// renderer and by raw-text fallback formatting).
    fn literal(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Null => "NULL".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.literal())
    }
}

/// A generator's output shape: how many values it produces per call, and
/// the printf-style template used to splice them into unprepared SQL text.
///
/// The template contains exactly `arity` conversion specifiers among
/// `%d`, `%s`, `%v` (in the order the values must be substituted); any
/// other characters (parens, commas) are copied through literally. `%d`
/// always renders unquoted and `%s` always quotes, regardless of the
/// value's runtime type. `%v` defers that choice to render time: it
/// quotes unless the value being substituted is numeric, so a generator
/// whose output type isn't known until the value exists (`column`,
/// replaying a captured result) doesn't have to bake a quoting decision
/// into the template before it has a value to look at. `Value::Null`
/// renders as the bare `NULL` keyword under any specifier, never quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub arity: usize,
    pub template: String,
}

impl Format {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let arity = count_specifiers(&template);
        Self { arity, template }
    }

    /// Render this format's template with concrete values, in order.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != self.arity` — a mismatch here means a
    /// generator violated its own declared arity, which is an internal
    /// invariant violation (§8 property 1), not a recoverable error.
    pub fn render(&self, values: &[Value]) -> String {
        assert_eq!(
            values.len(),
            self.arity,
            "generator produced {} values but format {:?} declares arity {}",
            values.len(),
            self.template,
            self.arity
        );

        let mut out = String::with_capacity(self.template.len() + 8 * values.len());
        let mut chars = self.template.chars().peekable();
        let mut values = values.iter();

        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.peek() {
                    Some('d') => {
                        chars.next();
                        let val = values.next().expect("arity already checked");
                        out.push_str(&val.literal());
                    }
                    Some('s') => {
                        chars.next();
                        let val = values.next().expect("arity already checked");
                        if matches!(val, Value::Null) {
                            out.push_str("NULL");
                        } else {
                            out.push('\'');
                            out.push_str(&val.literal().replace('\'', "''"));
                            out.push('\'');
                        }
                    }
                    Some('v') => {
                        chars.next();
                        let val = values.next().expect("arity already checked");
                        if matches!(val, Value::Null) {
                            out.push_str("NULL");
                        } else if val.is_numeric() {
                            out.push_str(&val.literal());
                        } else {
                            out.push('\'');
                            out.push_str(&val.literal().replace('\'', "''"));
                            out.push('\'');
                        }
                    }
                    _ => out.push(c),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// The conversion kind (`'d'`, `'s'`, or `'v'`) of the `idx`-th value
    /// slot in this template, left to right. Used to substitute a single
    /// specifier in isolation when a multi-arity generator's values are
    /// split across more than one textual occurrence (`@d ... @PREV`).
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.arity` — callers only ever ask for an index
    /// a prior arity check already bounded.
    pub fn specifier_kind(&self, idx: usize) -> char {
        let mut seen = 0;
        let mut chars = self.template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                if let Some(&next) = chars.peek() {
                    if matches!(next, 'd' | 's' | 'v') {
                        chars.next();
                        if seen == idx {
                            return next;
                        }
                        seen += 1;
                    }
                }
            }
        }
        panic!("specifier index {idx} out of bounds for format {:?}", self.template);
    }

    /// The placeholder template used when a statement is prepared: one `?`
    /// per value, joined the same way the literal template would join them
    /// (so `(%d, %d)` becomes `(?, ?)`, preserving surrounding punctuation).
    pub fn placeholder_template(&self) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut chars = self.template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.peek() {
                    Some('d') | Some('v') | Some('s') => {
                        chars.next();
                        out.push('?');
                    }
                    _ => out.push(c),
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

fn count_specifiers(template: &str) -> usize {
    let mut n = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if matches!(chars.peek(), Some('d') | Some('s') | Some('v')) {
                chars.next();
                n += 1;
            }
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_single_int() {
        let f = Format::new("%d");
        assert_eq!(f.arity, 1);
        assert_eq!(f.render(&[Value::Int(42)]), "42");
    }

    #[test]
    fn render_quoted_string() {
        let f = Format::new("'%s'");
        assert_eq!(f.render(&[Value::Str("o'brien".into())]), "'o''brien'");
    }

    #[test]
    fn render_pair() {
        let f = Format::new("%d, %d");
        assert_eq!(f.arity, 2);
        assert_eq!(f.render(&[Value::Int(1), Value::Int(2)]), "1, 2");
    }

    #[test]
    fn placeholder_preserves_punctuation() {
        let f = Format::new("(%d, %d)");
        assert_eq!(f.placeholder_template(), "(?, ?)");
    }

    #[test]
    fn specifier_kind_indexes_left_to_right() {
        let f = Format::new("(%d, %s)");
        assert_eq!(f.specifier_kind(0), 'd');
        assert_eq!(f.specifier_kind(1), 's');
    }

    #[test]
    #[should_panic]
    fn render_arity_mismatch_panics() {
        let f = Format::new("%d, %d");
        f.render(&[Value::Int(1)]);
    }

    #[test]
    fn quoted_template_renders_null_value_as_bare_keyword() {
        let f = Format::new("'%s'");
        assert_eq!(f.render(&[Value::Null]), "NULL");
    }

    #[test]
    fn percent_v_defers_quoting_to_the_values_runtime_type() {
        let f = Format::new("%v");
        assert_eq!(f.render(&[Value::Int(7)]), "7");
        assert_eq!(f.render(&[Value::Str("x".into())]), "'x'");
        assert_eq!(f.render(&[Value::Bytes(vec![b'y'])]), "'y'");
        assert_eq!(f.render(&[Value::Null]), "NULL");
    }
}
