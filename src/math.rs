//! Math extraction and the Markdown math grammar
//!
//! Chat pages show the same formula in three shapes:
//!
//! - **typeset**: KaTeX, MathJax or MathML output that still carries its TeX
//!   source in an annotation or attribute ([`typeset_source`])
//! - **failed**: a typesetting error marker whose text is the near-raw source
//!   with its delimiters ([`error_source`])
//! - **raw**: `\[...\]` or `\(...\)` left in plain text ([`split_delimited`])
//!
//! All three produce a [`MathExpr`], which is written as `$expr$` inline or as
//! a `$$` fenced block.

use std::sync::OnceLock;

use markup5ever_rcdom::Handle;
use regex::Regex;

use crate::dom::{attr, collapse_whitespace, find_descendant, has_class, tag_name, text_content};

/// Markers that force display mode for failed-typeset formulas
const DISPLAY_MARKERS: &[&str] = &["\\begin{", "\\\\", "\\displaystyle", "\\tag"];

/// Source notation of one formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathExpr {
    pub source: String,
    pub display: bool,
}

impl MathExpr {
    pub fn inline(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            display: false,
        }
    }

    pub fn block(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            display: true,
        }
    }

    /// Markdown form: `$x$` inline, `$$\nx\n$$` for display
    pub fn to_markdown(&self) -> String {
        if self.display {
            format!("$$\n{}\n$$", self.source)
        } else {
            format!("${}$", self.source)
        }
    }
}

/// A run of text or a raw-delimited formula found inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPiece<'a> {
    Text(&'a str),
    Math(MathExpr),
}

/// Read the TeX source carried by a typeset formula
///
/// Looks, in order, for a TeX `annotation`, a `data-latex`/`data-tex`
/// attribute, MathML `alttext`, and finally the text of the renderer's own
/// `math-inline`/`math-display` spans. Returns `None` when the node exposes no
/// source, for example a bare MathJax SVG.
pub fn typeset_source(node: &Handle, display: bool) -> Option<MathExpr> {
    let source = annotation_source(node)
        .or_else(|| attribute_source(node))
        .or_else(|| {
            find_descendant(node, |n| tag_name(n) == Some("math")).and_then(|m| attribute_source(&m))
        })
        .or_else(|| {
            if has_class(node, "math-inline") || has_class(node, "math-display") {
                Some(text_content(node))
            } else {
                None
            }
        })?;

    let source = collapse_whitespace(&source);
    if source.is_empty() {
        return None;
    }

    Some(MathExpr { source, display })
}

fn is_tex_annotation(node: &Handle) -> bool {
    tag_name(node) == Some("annotation")
        && attr(node, "encoding").is_some_and(|encoding| encoding.to_ascii_lowercase().contains("tex"))
}

fn annotation_source(node: &Handle) -> Option<String> {
    if is_tex_annotation(node) {
        return Some(text_content(node));
    }
    find_descendant(node, is_tex_annotation).map(|annotation| text_content(&annotation))
}

fn attribute_source(node: &Handle) -> Option<String> {
    ["data-latex", "data-tex", "alttext"]
        .iter()
        .find_map(|name| attr(node, name))
        .filter(|value| !value.trim().is_empty())
}

/// Recover a formula from the text of a failed-typeset marker
///
/// Strips `$$`, `\[ \]`, `\( \)` and `$` delimiters, including their
/// double-escaped forms. Display mode follows the delimiters or the presence
/// of environment markers.
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::math::error_source;
///
/// let expr = error_source(r"\[\frac{a}{b\]");
/// assert!(expr.display);
/// assert_eq!(expr.source, r"\frac{a}{b");
///
/// let expr = error_source(r"\(x^{2\)");
/// assert!(!expr.display);
/// ```
pub fn error_source(raw: &str) -> MathExpr {
    let text = raw.trim();
    let (inner, delimited_display) = strip_delimiters(text);
    let display = delimited_display || DISPLAY_MARKERS.iter().any(|marker| inner.contains(marker));

    let source = if display {
        clean_block_source(inner)
    } else {
        collapse_whitespace(inner)
    };

    MathExpr { source, display }
}

/// Recover a failed-typeset formula with its body left as written
///
/// Delimiters and display detection work as in [`error_source`], but display
/// lines keep their indentation and inline bodies only have line breaks
/// turned into spaces. Used for long-form messages.
///
/// ```
/// use chat_markdown_bridge::math::error_source_verbatim;
///
/// let expr = error_source_verbatim("\\[a &= b \\\\\n    c &= d\\]");
/// assert!(expr.display);
/// assert_eq!(expr.source, "a &= b \\\\\n    c &= d");
/// ```
pub fn error_source_verbatim(raw: &str) -> MathExpr {
    let (inner, delimited_display) = strip_delimiters(raw.trim());
    let display = delimited_display || DISPLAY_MARKERS.iter().any(|marker| inner.contains(marker));

    let source = if display {
        inner
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        inner.replace('\n', " ")
    };

    MathExpr { source, display }
}

fn strip_delimiters(text: &str) -> (&str, bool) {
    const PAIRS: &[(&str, &str, bool)] = &[
        ("$$", "$$", true),
        ("\\\\[", "\\\\]", true),
        ("\\[", "\\]", true),
        ("\\\\(", "\\\\)", false),
        ("\\(", "\\)", false),
        ("$", "$", false),
    ];

    for (open, close, display) in PAIRS {
        if text.len() >= open.len() + close.len() && text.starts_with(open) && text.ends_with(close) {
            let inner = &text[open.len()..text.len() - close.len()];
            return (inner.trim(), *display);
        }
    }

    (text, false)
}

/// Trim every line of a display formula and drop blank ones
///
/// A blank line inside `$$ ... $$` would end the block in Markdown.
fn clean_block_source(source: &str) -> String {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text at raw `\[...\]` and `\(...\)` formulas
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::math::{split_delimited, TextPiece, MathExpr};
///
/// let pieces = split_delimited(r"Area \(\pi r^2\) here");
/// assert_eq!(pieces[1], TextPiece::Math(MathExpr::inline(r"\pi r^2")));
/// ```
pub fn split_delimited(text: &str) -> Vec<TextPiece<'_>> {
    static DELIMITED: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = DELIMITED
        .get_or_init(|| Regex::new(r"(?s)\\\[(.+?)\\\]|\\\((.+?)\\\)").ok())
        .as_ref()
    else {
        return vec![TextPiece::Text(text)];
    };

    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let expr = match (caps.get(1), caps.get(2)) {
            (Some(block), _) => MathExpr::block(clean_block_source(block.as_str())),
            (None, Some(inline)) => MathExpr::inline(collapse_whitespace(inline.as_str())),
            (None, None) => continue,
        };
        if expr.source.is_empty() {
            continue;
        }
        if whole.start() > last {
            pieces.push(TextPiece::Text(&text[last..whole.start()]));
        }
        pieces.push(TextPiece::Math(expr));
        last = whole.end();
    }

    if last < text.len() {
        pieces.push(TextPiece::Text(&text[last..]));
    }

    pieces
}

/// Put spaces around CJK punctuation or dashes sitting directly between two inline formulas
///
/// `$a$，$b$` becomes `$a$ ， $b$` so each formula is delimited on its own.
/// Fenced code is left alone.
pub fn separate_adjacent_formulas(markdown: &str) -> String {
    static ADJACENT: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = ADJACENT
        .get_or_init(|| Regex::new(r"\$(——|—|[，。、；：！？])\$").ok())
        .as_ref()
    else {
        return markdown.to_string();
    };

    let mut output = String::with_capacity(markdown.len() + 16);
    let mut in_fence = false;
    for line in markdown.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            output.push_str(line);
        } else if in_fence {
            output.push_str(line);
        } else {
            output.push_str(&re.replace_all(line, "$$ $1 $$"));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::element_children;
    use crate::parser::{fragment_root, parse_html};

    fn first_element(html: &str) -> Handle {
        let dom = parse_html(html).expect("Parse failed");
        element_children(&fragment_root(&dom)).remove(0)
    }

    #[test]
    fn test_katex_annotation() {
        let node = first_element(
            r#"<span class="katex"><span class="katex-mathml"><math><semantics><mrow><mi>x</mi></mrow><annotation encoding="application/x-tex">x^2 +   y</annotation></semantics></math></span><span class="katex-html">x2+y</span></span>"#,
        );
        assert_eq!(typeset_source(&node, false), Some(MathExpr::inline("x^2 + y")));
    }

    #[test]
    fn test_data_latex_attribute() {
        let node = first_element(r#"<span class="math-x" data-latex="\alpha">α</span>"#);
        assert_eq!(typeset_source(&node, true), Some(MathExpr::block(r"\alpha")));
    }

    #[test]
    fn test_mathml_alttext() {
        let node = first_element(r#"<mjx-container><math alttext="a+b"><mi>a</mi></math></mjx-container>"#);
        assert_eq!(typeset_source(&node, false), Some(MathExpr::inline("a+b")));
    }

    #[test]
    fn test_rendered_math_span_text() {
        let node = first_element(r#"<span class="math math-display">\int_0^1 f</span>"#);
        assert_eq!(typeset_source(&node, true), Some(MathExpr::block(r"\int_0^1 f")));
    }

    #[test]
    fn test_no_source() {
        let node = first_element(r#"<mjx-container><svg></svg></mjx-container>"#);
        assert_eq!(typeset_source(&node, false), None);
    }

    #[test]
    fn test_error_source_delimiters() {
        assert_eq!(error_source("$$a+b$$"), MathExpr::block("a+b"));
        assert_eq!(error_source(r"\\[a+b\\]"), MathExpr::block("a+b"));
        assert_eq!(error_source(r"\\(a\\)"), MathExpr::inline("a"));
        assert_eq!(error_source("$a$"), MathExpr::inline("a"));
        assert_eq!(error_source("  a   b "), MathExpr::inline("a b"));
    }

    #[test]
    fn test_error_source_environment_forces_display() {
        let expr = error_source(r"\begin{aligned} a &= b \\ c &= d \end{aligned}");
        assert!(expr.display);
        assert!(expr.source.starts_with(r"\begin{aligned}"));

        assert!(error_source(r"\displaystyle x").display);
        assert!(error_source(r"x \tag{1}").display);
    }

    #[test]
    fn test_block_source_drops_blank_lines() {
        let expr = error_source("$$\n  a\n\n  b\n$$");
        assert_eq!(expr.source, "a\nb");
    }

    #[test]
    fn test_split_delimited() {
        let pieces = split_delimited(r"Let \(x\) be \[x^2\] done");
        assert_eq!(
            pieces,
            vec![
                TextPiece::Text("Let "),
                TextPiece::Math(MathExpr::inline("x")),
                TextPiece::Text(" be "),
                TextPiece::Math(MathExpr::block("x^2")),
                TextPiece::Text(" done"),
            ]
        );
    }

    #[test]
    fn test_split_without_math() {
        assert_eq!(split_delimited("plain [1] (a)"), vec![TextPiece::Text("plain [1] (a)")]);
    }

    #[test]
    fn test_to_markdown() {
        assert_eq!(MathExpr::inline("x").to_markdown(), "$x$");
        assert_eq!(MathExpr::block("x").to_markdown(), "$$\nx\n$$");
    }

    #[test]
    fn test_separate_adjacent_formulas() {
        assert_eq!(separate_adjacent_formulas("$a$，$b$，$c$"), "$a$ ， $b$ ， $c$");
        assert_eq!(separate_adjacent_formulas("$a$——$b$"), "$a$ —— $b$");
        assert_eq!(separate_adjacent_formulas("$a$, $b$"), "$a$, $b$");
    }

    #[test]
    fn test_separate_skips_code_fences() {
        let md = "```\n$a$，$b$\n```\n$a$，$b$\n";
        assert_eq!(separate_adjacent_formulas(md), "```\n$a$，$b$\n```\n$a$ ， $b$\n");
    }
}
