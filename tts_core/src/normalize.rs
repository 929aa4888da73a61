//! Markdown clean-up before synthesis.
//!
//! LLM replies arrive formatted for a screen. A speech backend would read the
//! markers out loud ("asterisk", "hash"), so they are stripped here and the
//! text is flattened into a single line. The rules run in a fixed order so a
//! later rule never sees matter an earlier rule removed.

use std::sync::OnceLock;

use regex::Regex;

use crate::segment::paragraph_break;

struct Rules {
    code_fence: Regex,
    inline_code: Regex,
    header: Regex,
    bold: Regex,
    italic: Regex,
    blockquote: Regex,
    bullet: Regex,
    numbered: Regex,
    newlines: Regex,
    whitespace: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        code_fence: Regex::new(r"```[\s\S]*?```").expect("code fence regex"),
        inline_code: Regex::new(r"`([^`]+)`").expect("inline code regex"),
        header: Regex::new(r"(?m)^#+\s+").expect("header regex"),
        bold: Regex::new(r"\*\*(.*?)\*\*").expect("bold regex"),
        italic: Regex::new(r"\*(.*?)\*").expect("italic regex"),
        blockquote: Regex::new(r"(?m)^>\s*").expect("blockquote regex"),
        bullet: Regex::new(r"(?m)^[-*+]\s+").expect("bullet regex"),
        numbered: Regex::new(r"(?m)^\d+\.\s+").expect("numbered list regex"),
        newlines: Regex::new(r"\n+").expect("newline regex"),
        whitespace: Regex::new(r"\s+").expect("whitespace regex"),
    })
}

/// Strip presentation markup and collapse whitespace.
///
/// Total and side-effect free; empty input yields empty output.
pub fn normalize(raw: &str) -> String {
    let r = rules();

    let text = r.code_fence.replace_all(raw, "");
    let text = r.inline_code.replace_all(&text, "$1");
    let text = r.header.replace_all(&text, "");
    let text = r.bold.replace_all(&text, "$1");
    let text = r.italic.replace_all(&text, "$1");
    let text = r.blockquote.replace_all(&text, "");
    let text = r.bullet.replace_all(&text, "");
    let text = r.numbered.replace_all(&text, "");
    let text = r.newlines.replace_all(&text, " ");
    let text = r.whitespace.replace_all(&text, " ");

    text.trim().to_string()
}

/// Split raw text at paragraph and list-item breaks and normalize each
/// section, dropping sections with nothing left to say.
///
/// Code blocks are removed first since they may contain blank lines.
pub fn normalize_sections(raw: &str) -> Vec<String> {
    let without_code = rules().code_fence.replace_all(raw, "");
    paragraph_break()
        .split(&without_code)
        .map(normalize)
        .filter(|section| !section.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_headers_and_emphasis() {
        let out = normalize("## Chapter 1: Introduction\n\nThis is **bold text** and *italic text*.");
        assert_eq!(out, "Chapter 1: Introduction This is bold text and italic text.");
    }

    #[test]
    fn removes_list_markers() {
        let out = normalize(
            "Here are the key points:\n\n1. First point\n2. Second point\n- Bullet item\n- Another bullet",
        );
        assert_eq!(
            out,
            "Here are the key points: First point Second point Bullet item Another bullet"
        );
    }

    #[test]
    fn drops_code_blocks_but_keeps_inline_code_text() {
        let out = normalize("Use `this.method()` for implementation.\n\n```python\nprint('code block')\n```");
        assert_eq!(out, "Use this.method() for implementation.");
    }

    #[test]
    fn removes_blockquotes() {
        let out = normalize("> This is a blockquote\n\n**Important**: Check the *documentation* for details.");
        assert_eq!(
            out,
            "This is a blockquote Important: Check the documentation for details."
        );
    }

    #[test]
    fn empty_and_blank_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\n\t "), "");
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let samples = [
            "### Advanced Features\n\n1. **Performance**: Very fast\n2. **Usability**: Easy to use\n\n> Remember to test your code!",
            "Plain sentence. Another one!   With   gaps.",
            "- item\n* item\n+ item",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input: {s:?}");
        }
    }

    #[test]
    fn sections_follow_headings_paragraphs_and_list_items() {
        let raw = "## Getting started\n\nInstall the **toolchain** first.\n\n\
            ```sh\ncurl example\n\nmore\n```\n\n- Open a terminal\n- Run the installer";
        assert_eq!(
            normalize_sections(raw),
            vec![
                "Getting started",
                "Install the toolchain first.",
                "Open a terminal",
                "Run the installer",
            ]
        );
        assert_eq!(normalize_sections("```\nonly code\n```"), Vec::<String>::new());
    }

    #[test]
    fn keeps_decimal_numbers_and_hashes_inside_lines() {
        assert_eq!(normalize("Version 2.5 of C# is #1"), "Version 2.5 of C# is #1");
    }
}
