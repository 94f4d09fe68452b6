//! Lexical scanner for hardware-description source text.
//!
//! This is not a parser. Module definitions and instantiations are located
//! with two patterns over comment-free text, which is enough to rebuild the
//! structural hierarchy of a design. Statements that share the
//! `type name (` token shape can be misread as instantiations; reserved
//! words are filtered out, everything else is accepted as-is.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::{debug, warn};
use regex::Regex;
use walkdir::WalkDir;

static COMMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?(?:\*/|\z)|//[^\n]*").unwrap());

static MODULE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bmodule\s+(\w+)\s*(?:#\s*\((?:[^()]|\([^()]*\))*\)\s*)?\([^)]*\)\s*;([\s\S]*?)\bendmodule\b")
        .unwrap()
});

static INSTANCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\w+)(?:\s*#\s*\((?:[^()]|\([^()]*\))*\))?\s+(\w+)\s*\(").unwrap()
});

/// Words that can precede `identifier (` without starting an instantiation.
const RESERVED: &[&str] = &[
    "always", "assign", "begin", "case", "else", "end", "for", "function", "if", "initial",
    "module", "endmodule", "return", "task", "while", "wire", "reg", "logic", "input",
    "output", "inout", "posedge", "negedge", "or", "and", "not", "generate", "localparam",
    "parameter",
];

/// A module definition found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedModule {
    pub name: String,
    pub file: PathBuf,
    /// Text between the port-list terminator and `endmodule`, comments removed.
    pub body: String,
}

/// Remove block and line comments in one left-to-right pass.
///
/// Block comments become a single space so the tokens around them stay apart.
/// An unterminated block comment runs to the end of the text.
pub fn strip_comments(content: &str) -> String {
    COMMENT_REGEX
        .replace_all(content, |caps: &regex::Captures<'_>| {
            if caps[0].starts_with("/*") { " " } else { "" }
        })
        .into_owned()
}

/// Find every module definition in `content`.
pub fn scan_modules(file: &Path, content: &str) -> Vec<ScannedModule> {
    let content = strip_comments(content);
    MODULE_REGEX
        .captures_iter(&content)
        .map(|caps| {
            let module = ScannedModule {
                name: caps[1].to_string(),
                file: file.to_path_buf(),
                body: caps[2].to_string(),
            };
            debug!("Found module `{}` in `{}`", module.name, file.display());
            module
        })
        .collect()
}

/// Map each instance name in a module body to its type name.
///
/// A name instantiated twice keeps its last type.
pub fn scan_instances(body: &str) -> BTreeMap<String, String> {
    let mut instances = BTreeMap::new();
    for caps in INSTANCE_REGEX.captures_iter(body) {
        let (type_name, inst_name) = (&caps[1], &caps[2]);
        if RESERVED.contains(&type_name) || RESERVED.contains(&inst_name) {
            continue;
        }
        if type_name.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        instances.insert(inst_name.to_string(), type_name.to_string());
    }
    instances
}

/// Recursively list files under `directory` with the given extension, sorted.
pub fn source_files_in(directory: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory) {
        match entry {
            Ok(e) => {
                if e.file_type().is_file()
                    && e.path().extension().is_some_and(|ext| ext == extension)
                {
                    files.push(e.path().to_path_buf());
                }
            }
            Err(err) => {
                warn!(
                    "Skipping unreadable entry under `{}`: {}",
                    directory.display(),
                    err
                );
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_never_produce_modules_or_instances() {
        let source = r#"
// module ghost(); endmodule
/* module phantom();
   endmodule */
module top(input clk);
    leaf u_real(.clk(clk)); // leaf u_fake();
    /* leaf u_hidden(); */
endmodule
"#;
        let modules = scan_modules(Path::new("top.sv"), source);
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "top");

        let instances = scan_instances(&modules[0].body);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances["u_real"], "leaf");
    }

    #[test]
    fn block_comment_keeps_tokens_apart() {
        assert_eq!(strip_comments("leaf/*x*/u0();"), "leaf u0();");
    }

    #[test]
    fn unterminated_block_comment_hides_the_rest() {
        let source = "module top(); leaf u0(); endmodule\n/* module ghost(); stray u1(); endmodule\n";
        assert_eq!(strip_comments("a /* b"), "a  ");

        let modules = scan_modules(Path::new("top.sv"), source);
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["top"]);
        assert_eq!(scan_instances(&modules[0].body).len(), 1);
    }

    #[test]
    fn parameterized_definitions_and_instances() {
        let source = "module fifo #(parameter W = 8, parameter D = $clog2(4)) (input clk, output [W-1:0] q);\n  sram #(.WIDTH(W)) mem (.clk(clk));\n  counter cnt0 (.clk(clk));\nendmodule\n";
        let modules = scan_modules(Path::new("fifo.sv"), source);
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "fifo");

        let instances = scan_instances(&modules[0].body);
        assert_eq!(instances.get("mem").map(String::as_str), Some("sram"));
        assert_eq!(instances.get("cnt0").map(String::as_str), Some("counter"));
    }

    #[test]
    fn several_modules_in_one_file_with_non_greedy_bodies() {
        let source = "module top(); leaf inst0(); endmodule\nmodule leaf(); endmodule\n";
        let modules = scan_modules(Path::new("design.sv"), source);
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["top", "leaf"]);
        assert_eq!(scan_instances(&modules[0].body)["inst0"], "leaf");
        assert!(scan_instances(&modules[1].body).is_empty());
    }

    #[test]
    fn reserved_words_are_not_instances() {
        let body = "always @(posedge clk) begin if (a) x <= 1; else if (b) x <= 0; end\n";
        assert!(scan_instances(body).is_empty());
    }
}
