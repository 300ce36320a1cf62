//! Line-oriented streaming parse of one trx file's text into raw statement
//! blocks: a line starting with `"-- "` is a modifier, `"--
//! EOF"` halts the file, a blank line (or end of file) closes the
//! accumulated statement, and every other non-empty line is appended
//! (with a trailing space) to the statement's text.

use crate::error::FinchError;
use std::path::Path;

/// One accumulated statement block before modifier interpretation: the
/// joined SQL text and the raw (post-interpolation) modifier lines that
/// preceded/interleaved it, in source order.
#[derive(Debug, Clone, Default)]
pub struct RawBlock {
    pub start_line: usize,
    pub text: String,
    pub mod_lines: Vec<(usize, String)>,
}

/// Split `data` (one trx file's contents) into raw statement blocks,
/// interpolating `${params.*}` into modifier lines as they're read.
pub fn split(file: &Path, data: &str, params: &std::collections::HashMap<String, String>) -> Result<Vec<RawBlock>, FinchError> {
    let mut blocks = Vec::new();
    let mut cur = RawBlock::default();
    let mut started = false;

    for (idx, raw_line) in data.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw_line.trim_end();

        if let Some(rest) = line.strip_prefix("-- ") {
            if rest.trim() == "EOF" {
                break;
            }
            if !started {
                cur.start_line = lineno;
                started = true;
            }
            let interpolated = interpolate(file, lineno, rest, params)?;
            cur.mod_lines.push((lineno, interpolated));
            continue;
        }

        if line.trim().is_empty() {
            if started {
                blocks.push(std::mem::take(&mut cur));
                started = false;
            }
            continue;
        }

        if !started {
            cur.start_line = lineno;
            started = true;
        }
        cur.text.push_str(line);
        cur.text.push(' ');
    }

    if started {
        blocks.push(cur);
    }

    if blocks.is_empty() {
        return Err(FinchError::compile(file, 1, "trx file must yield at least one statement"));
    }

    Ok(blocks)
}

/// Expand `${params.NAME}` references against the stage's `params` map.
fn interpolate(
    file: &Path,
    lineno: usize,
    line: &str,
    params: &std::collections::HashMap<String, String>,
) -> Result<String, FinchError> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("${params.") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "${params.".len()..];
        let Some(end) = after.find('}') else {
            return Err(FinchError::compile(file, lineno, "unterminated ${params.*} interpolation"));
        };
        let name = &after[..end];
        let value = params
            .get(name)
            .ok_or_else(|| FinchError::compile(file, lineno, format!("undefined param {name:?} referenced in modifier")))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn blank_line_separates_statements() {
        let data = "SELECT 1;\n\nSELECT 2;\n";
        let blocks = split(Path::new("t.trx"), data, &HashMap::new()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text.trim(), "SELECT 1;");
        assert_eq!(blocks[1].text.trim(), "SELECT 2;");
    }

    #[test]
    fn eof_marker_halts_parsing() {
        let data = "SELECT 1;\n\n-- EOF\nSELECT 2;\n";
        let blocks = split(Path::new("t.trx"), data, &HashMap::new()).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn modifier_lines_are_collected_and_interpolated() {
        let mut params = HashMap::new();
        params.insert("n".to_string(), "5".to_string());
        let data = "-- rows ${params.n}\nSELECT 1;\n";
        let blocks = split(Path::new("t.trx"), data, &params).unwrap();
        assert_eq!(blocks[0].mod_lines[0].1, "rows 5");
    }

    #[test]
    fn empty_file_is_a_compile_error() {
        assert!(split(Path::new("t.trx"), "", &HashMap::new()).is_err());
    }
}
