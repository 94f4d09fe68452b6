//! Fixtures shared by the test suites of this crate and its dependants.
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use bigdecimal::BigDecimal;

use crate::{
    macros::{Macro, MacroParser},
    utils::{Error, ModelResult},
};

/// Reads only the `MACRO <name>` / `SIZE <w> BY <h> ;` / `END <name>` lines
/// of a macro library file and ignores everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeOnlyMacroParser;

impl MacroParser for SizeOnlyMacroParser {
    fn parse(&self, path: &Path) -> ModelResult<Vec<Macro>> {
        let fail = |reason: String| Error::MacroParse {
            file: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;

        let mut macros = Vec::new();
        let mut current: Option<(String, Option<(BigDecimal, BigDecimal)>)> = None;
        for (line_no, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["MACRO", name] => current = Some((name.to_string(), None)),
                ["SIZE", w, "BY", h, ..] => {
                    let Some((_, size)) = current.as_mut() else {
                        return Err(fail(format!("line {}: SIZE outside of a MACRO", line_no + 1)));
                    };
                    let parse = |v: &str| {
                        BigDecimal::from_str(v)
                            .map_err(|e| fail(format!("line {}: {}", line_no + 1, e)))
                    };
                    *size = Some((parse(w)?, parse(h)?));
                }
                ["END", name] if current.as_ref().is_some_and(|(n, _)| n == name) => {
                    if let Some((name, size)) = current.take() {
                        let (w, h) = size.ok_or_else(|| fail(format!("macro `{}` has no SIZE", name)))?;
                        macros.push(Macro::new(name, w, h));
                    }
                }
                _ => {}
            }
        }
        Ok(macros)
    }
}

/// Write `content` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// A macro library text defining each `(name, width, height)`.
pub fn lef_text(macros: &[(&str, &str, &str)]) -> String {
    macros
        .iter()
        .map(|(name, w, h)| format!("MACRO {name}\n  CLASS BLOCK ;\n  SIZE {w} BY {h} ;\nEND {name}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_and_skips_other_statements() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "libs/mem.lef",
            &lef_text(&[("sram_1k", "30.5", "20"), ("rom", "8", "4.25")]),
        );

        let macros = SizeOnlyMacroParser.parse(&file).unwrap();
        assert_eq!(macros.len(), 2);
        assert_eq!(macros[0].name, "sram_1k");
        assert_eq!(macros[1].size_y, BigDecimal::from_str("4.25").unwrap());
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SizeOnlyMacroParser
            .parse(&dir.path().join("absent.lef"))
            .unwrap_err();
        assert!(err.is_macro_parse());
    }
}
