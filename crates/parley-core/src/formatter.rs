//! Message formatting: assistant text to safe HTML.
//!
//! Fenced code blocks are lifted out before the markdown pass and re-inserted
//! afterwards as structured blocks with copy/run actions. Actions are exposed
//! as `data-action`/`data-block` attributes only; the code itself never lands
//! in an attribute, and handlers are bound by block index by the surface.

use std::sync::OnceLock;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use regex::{Captures, Regex};

/// Languages whose blocks get a "run" action.
pub const RUNNABLE_LANGUAGES: &[&str] = &["python", "javascript", "js"];

/// Private-use marker around placeholder indices; markdown passes it through untouched.
const PLACEHOLDER_MARK: char = '\u{E000}';

const BLOCKED_URL_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

/// A fenced code block lifted out of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    pub fn is_runnable(&self) -> bool {
        RUNNABLE_LANGUAGES.contains(&self.language.as_str())
    }

    /// Language name sent to the execution endpoint, if runnable.
    pub fn execution_language(&self) -> Option<&'static str> {
        match self.language.as_str() {
            "python" => Some("python"),
            "javascript" | "js" => Some("javascript"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedMessage {
    pub html: String,
    pub code_blocks: Vec<CodeBlock>,
}

fn reasoning_block_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?is)<reasoning>.*?</reasoning>").expect("reasoning regex must compile")
    })
}

fn preamble_regexes() -> &'static [Regex; 2] {
    static CACHED: OnceLock<[Regex; 2]> = OnceLock::new();
    CACHED.get_or_init(|| {
        [
            Regex::new(r"(?i)\A(?:User |The user |They )[^\n]*?\. (?:We|I) should[^\n]*\n\n")
                .expect("preamble regex must compile"),
            Regex::new(r"(?i)\A(?:User wants|They want|The user)[^\n]*\n\n")
                .expect("preamble regex must compile"),
        ]
    })
}

fn code_fence_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?s)```(\w+)?\n(.*?)```").expect("code fence regex must compile")
    })
}

fn placeholder_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        let mark = format!("\\x{{{:X}}}", PLACEHOLDER_MARK as u32);
        Regex::new(&format!(r"(?:<p>)?{mark}(\d+){mark}(?:</p>\n?)?"))
            .expect("placeholder regex must compile")
    })
}

/// Format raw assistant text into HTML safe for direct insertion.
pub fn format_message(raw: &str) -> FormattedMessage {
    let content = strip_reasoning(raw);
    let (content, code_blocks) = extract_code_blocks(&content);
    let rendered = markdown_to_html(&content);

    let html = placeholder_regex()
        .replace_all(&rendered, |caps: &Captures| {
            let index: usize = caps[1].parse().unwrap_or(usize::MAX);
            match code_blocks.get(index) {
                Some(block) => code_block_html(index, block),
                None => String::new(),
            }
        })
        .into_owned();

    FormattedMessage { html, code_blocks }
}

/// Remove model "thinking" that precedes the actual answer. Best effort.
pub fn strip_reasoning(raw: &str) -> String {
    let mut content = reasoning_block_regex().replace_all(raw, "").into_owned();

    loop {
        let trimmed = content.trim_start();
        let stripped = preamble_regexes()
            .iter()
            .find_map(|re| re.find(trimmed).map(|m| trimmed[m.end()..].to_string()));
        match stripped {
            Some(rest) => content = rest,
            None => break,
        }
    }

    content.trim().to_string()
}

/// Text for surfaces that show markdown source rather than HTML.
pub fn display_text(raw: &str) -> String {
    strip_reasoning(raw)
}

/// Replace each fenced block with a placeholder paragraph.
pub fn extract_code_blocks(text: &str) -> (String, Vec<CodeBlock>) {
    let mut blocks = Vec::new();
    let replaced = code_fence_regex().replace_all(text, |caps: &Captures| {
        let index = blocks.len();
        blocks.push(CodeBlock {
            language: caps
                .get(1)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_else(|| "text".to_string()),
            code: caps[2].trim().to_string(),
        });
        format!("\n\n{PLACEHOLDER_MARK}{index}{PLACEHOLDER_MARK}\n\n")
    });
    (replaced.into_owned(), blocks)
}

/// Markdown to HTML with GitHub-style tables and lists, newline as line break.
/// Raw HTML in the source is emitted as text.
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let lowered = url.trim_start().to_ascii_lowercase();
    if BLOCKED_URL_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
        CowStr::Borrowed("#")
    } else {
        url
    }
}

fn code_block_html(index: usize, block: &CodeBlock) -> String {
    let language = escape_html(&block.language);
    let mut out = String::new();

    out.push_str(&format!(
        "<div class=\"code-block\" data-block=\"{index}\">\n<div class=\"code-header\">\n"
    ));
    out.push_str(&format!(
        "<span class=\"code-language\">{language}</span>\n<div class=\"code-actions\">\n"
    ));
    out.push_str(&format!(
        "<button class=\"code-copy-btn\" data-action=\"copy\" data-block=\"{index}\">Copy</button>\n"
    ));
    if let Some(exec) = block.execution_language() {
        out.push_str(&format!(
            "<button class=\"code-execute-btn\" data-action=\"run\" data-block=\"{index}\" data-language=\"{exec}\">Run Code</button>\n"
        ));
    }
    out.push_str("</div>\n</div>\n");
    out.push_str(&format!(
        "<pre><code class=\"language-{language}\">{}</code></pre>\n</div>\n",
        escape_html(&block.code)
    ));
    out
}

/// Escape text for HTML content or a quoted attribute value.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_block_is_escaped_and_runnable() {
        let out = format_message("```python\nprint(1)\n```");

        assert!(out.html.contains("print(1)"));
        assert!(out.html.contains("data-action=\"run\""));
        assert!(out.html.contains("data-action=\"copy\""));
        assert_eq!(
            out.code_blocks,
            vec![CodeBlock {
                language: "python".to_string(),
                code: "print(1)".to_string(),
            }]
        );
    }

    #[test]
    fn test_non_allow_listed_language_has_no_run_action() {
        let out = format_message("```rust\nfn main() {}\n```");
        assert!(!out.html.contains("data-action=\"run\""));
        assert!(out.html.contains("data-action=\"copy\""));
        assert!(out.html.contains("<span class=\"code-language\">rust</span>"));
    }

    #[test]
    fn test_code_body_markup_is_escaped() {
        let out = format_message("```html\n<script>alert('x')</script>\n```");
        let code = &out.html[out.html.find("<code").unwrap()..];

        assert!(code.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(!out.html.contains("<script>"));
    }

    #[test]
    fn test_missing_language_defaults_to_text() {
        let out = format_message("```\nplain\n```");
        assert_eq!(out.code_blocks[0].language, "text");
        assert!(!out.code_blocks[0].is_runnable());
    }

    #[test]
    fn test_js_runs_as_javascript() {
        let out = format_message("```js\nconsole.log(1)\n```");
        assert!(out.html.contains("data-language=\"javascript\""));
        assert_eq!(out.code_blocks[0].execution_language(), Some("javascript"));
    }

    #[test]
    fn test_code_block_placeholder_is_not_wrapped_in_paragraph() {
        let out = format_message("Here:\n\n```python\nx = 1\n```\n\nDone.");
        assert!(out.html.contains("<p>Here:</p>"));
        assert!(out.html.contains("<p>Done.</p>"));
        assert!(!out.html.contains("<p><div"));
        assert!(!out.html.contains(PLACEHOLDER_MARK));
    }

    #[test]
    fn test_raw_html_is_rendered_as_text() {
        let out = format_message("hello <img src=x onerror=alert(1)> world");
        assert!(!out.html.contains("<img"));
        assert!(out.html.contains("&lt;img"));
    }

    #[test]
    fn test_script_links_are_neutralised() {
        let out = format_message("[click](javascript:alert(1))");
        assert!(out.html.contains("href=\"#\""));
        assert!(!out.html.contains("javascript:"));
    }

    #[test]
    fn test_newlines_become_breaks_and_tables_render() {
        let html = markdown_to_html("line one\nline two");
        assert!(html.contains("<br />"));

        let table = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(table.contains("<table>"));
    }

    #[test]
    fn test_strip_reasoning_block_and_preamble() {
        let raw = "<reasoning>think think</reasoning>The user wants a greeting.\n\nHello!";
        assert_eq!(strip_reasoning(raw), "Hello!");

        let raw = "User asked about Rust. We should answer briefly.\n\nRust is a language.";
        assert_eq!(strip_reasoning(raw), "Rust is a language.");
    }

    #[test]
    fn test_strip_reasoning_leaves_answers_alone() {
        let raw = "Sure.\n\nThe user guide covers this.\n\nDone.";
        assert_eq!(strip_reasoning(raw), raw);
    }

    #[test]
    fn test_escape_html_attribute_quotes() {
        assert_eq!(escape_html(r#"a"b'c<d>&"#), "a&quot;b&#39;c&lt;d&gt;&amp;");
    }
}
