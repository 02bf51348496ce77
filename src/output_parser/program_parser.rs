use std::sync::LazyLock;

use regex::Regex;

use super::OutputParseError;

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(\w*)[ \t]*\r?\n([\s\S]*?)```").expect("static regex is valid")
});

/// A program extracted from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProgram {
    /// The source to execute. Multiple fenced blocks arrive wrapped in an
    /// implicit `(do …)`.
    pub program: String,
    /// Response text outside the code blocks, when any.
    pub reasoning: Option<String>,
    /// How many fenced blocks contributed.
    pub block_count: usize,
}

/// Pulls the PTC-Lisp program out of a response.
///
/// Fenced blocks tagged `clojure` or `lisp` (or untagged) count; several
/// blocks are wrapped in one implicit `do`, which is accepted but worth a
/// warning upstream. With no fences at all, a response that itself starts
/// with `(` is taken verbatim.
pub fn extract_program(response: &str) -> Result<ParsedProgram, OutputParseError> {
    let mut blocks = Vec::new();
    let mut outside = String::new();
    let mut cursor = 0;

    for cap in CODE_BLOCK_RE.captures_iter(response) {
        let whole = cap.get(0).expect("group 0");
        let tag = cap[1].to_lowercase();
        let body = cap[2].trim();
        outside.push_str(&response[cursor..whole.start()]);
        cursor = whole.end();
        if matches!(tag.as_str(), "clojure" | "lisp" | "") && !body.is_empty() {
            blocks.push(body.to_string());
        }
    }
    outside.push_str(&response[cursor..]);

    let reasoning = {
        let trimmed = outside.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };

    match blocks.len() {
        0 => {
            let trimmed = response.trim();
            if trimmed.starts_with('(') {
                Ok(ParsedProgram {
                    program: trimmed.to_string(),
                    reasoning: None,
                    block_count: 0,
                })
            } else {
                Err(OutputParseError::NoCode)
            }
        }
        1 => Ok(ParsedProgram {
            program: blocks.pop().expect("one block"),
            reasoning,
            block_count: 1,
        }),
        n => Ok(ParsedProgram {
            program: format!("(do\n{}\n)", blocks.join("\n")),
            reasoning,
            block_count: n,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tagged_block() {
        let parsed = extract_program("thinking...\n```clojure\n(+ 1 2)\n```\ndone").unwrap();
        assert_eq!(parsed.program, "(+ 1 2)");
        assert_eq!(parsed.block_count, 1);
        assert_eq!(parsed.reasoning.as_deref(), Some("thinking...\n\ndone"));
    }

    #[test]
    fn test_lisp_tag_and_untagged() {
        assert_eq!(
            extract_program("```lisp\n(inc)\n```").unwrap().program,
            "(inc)"
        );
        assert_eq!(extract_program("```\n(f)\n```").unwrap().program, "(f)");
    }

    #[test]
    fn test_foreign_tags_are_ignored() {
        assert!(matches!(
            extract_program("```python\nprint(1)\n```"),
            Err(OutputParseError::NoCode)
        ));
    }

    #[test]
    fn test_multiple_blocks_wrap_in_do() {
        let parsed =
            extract_program("```clojure\n(def x 1)\n```\ntext\n```clojure\n(+ x 1)\n```").unwrap();
        assert_eq!(parsed.block_count, 2);
        assert!(parsed.program.starts_with("(do\n"));
        assert!(parsed.program.contains("(def x 1)"));
        assert!(parsed.program.contains("(+ x 1)"));
    }

    #[test]
    fn test_raw_sexpr_accepted() {
        let parsed = extract_program("  (return 42)  ").unwrap();
        assert_eq!(parsed.program, "(return 42)");
        assert_eq!(parsed.block_count, 0);
    }

    #[test]
    fn test_prose_only_is_no_code() {
        assert!(matches!(
            extract_program("I cannot write code for this."),
            Err(OutputParseError::NoCode)
        ));
    }
}
