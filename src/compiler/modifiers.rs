//! Parsing of `-- <modifier>` lines into structured [`Modifier`] values.

use std::time::Duration;

use crate::error::FinchError;
use crate::scope::ScopeLevel;

#[derive(Debug, Clone)]
pub enum Modifier {
    Prepare,
    Idle(Duration),
    Rows { rows: u64, offset: u64 },
    TableSize { scope: ScopeLevel, bytes: u64 },
    DatabaseSize { scope: ScopeLevel, bytes: u64 },
    SaveInsertId(String),
    SaveColumns(Vec<String>),
    Copies(u32),
}

pub fn parse(file: &std::path::Path, lineno: usize, line: &str) -> Result<Modifier, FinchError> {
    let mut parts = line.split_whitespace();
    let kw = parts
        .next()
        .ok_or_else(|| FinchError::compile(file, lineno, "empty modifier line"))?;
    let rest: Vec<&str> = parts.collect();

    let err = |msg: &str| FinchError::compile(file, lineno, msg.to_string());

    match kw {
        "prepare" | "prepared" => Ok(Modifier::Prepare),
        "idle" => {
            let raw = rest.first().ok_or_else(|| err("idle modifier requires a duration"))?;
            let dur = humantime::parse_duration(raw).map_err(|e| err(&format!("invalid idle duration {raw:?}: {e}")))?;
            Ok(Modifier::Idle(dur))
        }
        "rows" => {
            let rows = rest
                .first()
                .ok_or_else(|| err("rows modifier requires a count"))?
                .parse()
                .map_err(|_| err("rows modifier count must be an integer"))?;
            let offset = match rest.get(1) {
                Some(s) => s.parse().map_err(|_| err("rows modifier offset must be an integer"))?,
                None => 0,
            };
            Ok(Modifier::Rows { rows, offset })
        }
        "table-size" | "database-size" => {
            let scope_str = rest.first().ok_or_else(|| err("size modifier requires a scope"))?;
            let scope = ScopeLevel::parse(scope_str).ok_or_else(|| err(&format!("unknown scope {scope_str:?}")))?;
            let size_str = rest.get(1).ok_or_else(|| err("size modifier requires a size"))?;
            let bytes = size_str
                .parse::<bytesize::ByteSize>()
                .map_err(|e| err(&format!("invalid size {size_str:?}: {e}")))?
                .as_u64();
            if kw == "table-size" {
                Ok(Modifier::TableSize { scope, bytes })
            } else {
                Ok(Modifier::DatabaseSize { scope, bytes })
            }
        }
        "save-insert-id" => {
            let key = rest.first().ok_or_else(|| err("save-insert-id modifier requires a key"))?;
            Ok(Modifier::SaveInsertId((*key).to_string()))
        }
        "save-columns" => {
            if rest.is_empty() {
                return Err(err("save-columns modifier requires at least one column"));
            }
            let cols = rest
                .join(" ")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect::<Vec<_>>();
            Ok(Modifier::SaveColumns(cols))
        }
        "copies" => {
            let n = rest
                .first()
                .ok_or_else(|| err("copies modifier requires a count"))?
                .parse::<u32>()
                .map_err(|_| err("copies modifier count must be a positive integer"))?;
            if n == 0 {
                return Err(err("copies modifier count must be at least 1"));
            }
            Ok(Modifier::Copies(n))
        }
        other => Err(err(&format!("unknown modifier {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_rows_with_default_offset() {
        let m = parse(Path::new("t"), 1, "rows 10").unwrap();
        assert!(matches!(m, Modifier::Rows { rows: 10, offset: 0 }));
    }

    #[test]
    fn parses_idle_duration() {
        let m = parse(Path::new("t"), 1, "idle 500ms").unwrap();
        assert!(matches!(m, Modifier::Idle(d) if d == Duration::from_millis(500)));
    }

    #[test]
    fn parses_save_columns_list() {
        let m = parse(Path::new("t"), 1, "save-columns @x, _, @y").unwrap();
        let Modifier::SaveColumns(cols) = m else { panic!() };
        assert_eq!(cols, vec!["@x", "_", "@y"]);
    }

    #[test]
    fn unknown_modifier_is_a_compile_error() {
        assert!(parse(Path::new("t"), 1, "frobnicate 1").is_err());
    }

    #[test]
    fn copies_of_zero_is_a_compile_error() {
        assert!(parse(Path::new("t"), 1, "copies 0").is_err());
    }
}
