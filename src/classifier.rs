//! Structural role classification of chat-message nodes
//!
//! Every element the converter visits is mapped to exactly one [`NodeRole`].
//! Handlers switch on the role instead of sniffing classes and attributes
//! themselves, so all knowledge of provider markup (KaTeX, MathJax, MathML,
//! the renderer's own `math-*` spans, code-block wrappers) lives here.
//!
//! Priority order matters: error markers win over math wrappers, display
//! wrappers win over the inline `katex` span they contain, and only then are
//! ordinary structural tags considered.

use markup5ever_rcdom::Handle;

use crate::dom::{attr, find_descendant, has_class, tag_name};

/// Structural role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Display formula (KaTeX display, `math[display=block]`, MathJax display, `math-display`)
    BlockMath,
    /// Inline formula (KaTeX, MathML, MathJax, `math-inline`)
    InlineMath,
    /// Formula that failed to typeset and shows near-raw notation
    ErrorMath,
    /// Preformatted code, possibly wrapped in a provider code-block container
    CodeBlock,
    Table,
    List,
    /// Paragraph, heading, blockquote or table cell
    TextContainer,
    /// Anything else; children are visited
    Opaque,
}

/// Classify a node by structural role
///
/// Non-element nodes are always [`NodeRole::Opaque`].
pub fn classify(node: &Handle) -> NodeRole {
    let Some(tag) = tag_name(node) else {
        return NodeRole::Opaque;
    };

    if is_error_math(node, tag) {
        return NodeRole::ErrorMath;
    }

    if is_display_math(node, tag) {
        return NodeRole::BlockMath;
    }

    if is_inline_math(node, tag) {
        return NodeRole::InlineMath;
    }

    match tag {
        "pre" => NodeRole::CodeBlock,
        "table" => NodeRole::Table,
        "ul" | "ol" => NodeRole::List,
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "td" | "th" => {
            NodeRole::TextContainer
        }
        _ if is_code_wrapper(node) => NodeRole::CodeBlock,
        _ => NodeRole::Opaque,
    }
}

/// True for error-marker nodes produced by failed typesetting
pub fn is_error_math(node: &Handle, tag: &str) -> bool {
    tag == "mjx-merror" || has_class(node, "katex-error") || has_class(node, "math-error")
}

fn is_display_math(node: &Handle, tag: &str) -> bool {
    if has_class(node, "katex-display") || has_class(node, "math-display") {
        return true;
    }

    match tag {
        "math" => attr(node, "display").is_some_and(|d| d.eq_ignore_ascii_case("block")),
        "mjx-container" => attr(node, "display").is_some_and(|d| d == "true"),
        // MathJax v2 display wrapper
        "div" => has_class(node, "MathJax_Display") || has_class(node, "math"),
        _ => false,
    }
}

fn is_inline_math(node: &Handle, tag: &str) -> bool {
    matches!(tag, "math" | "mjx-container")
        || has_class(node, "katex")
        || has_class(node, "math-inline")
        || has_class(node, "MathJax")
}

/// Provider wrappers (`div.code-block`, `div.codeblock`) that hold a `pre`
fn is_code_wrapper(node: &Handle) -> bool {
    let Some(classes) = attr(node, "class") else {
        return false;
    };
    let looks_like_code = classes
        .split_whitespace()
        .any(|c| c.starts_with("code-block") || c.starts_with("codeblock"));

    looks_like_code && find_descendant(node, |n| tag_name(n) == Some("pre")).is_some()
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
    fn test_katex_display_is_block_math() {
        let node = first_element(
            r#"<span class="katex-display"><span class="katex">x</span></span>"#,
        );
        assert_eq!(classify(&node), NodeRole::BlockMath);
    }

    #[test]
    fn test_katex_inline_is_inline_math() {
        let node = first_element(r#"<span class="katex">x</span>"#);
        assert_eq!(classify(&node), NodeRole::InlineMath);
    }

    #[test]
    fn test_katex_error_wins() {
        let node = first_element(r#"<span class="katex-error katex">\frac{</span>"#);
        assert_eq!(classify(&node), NodeRole::ErrorMath);
    }

    #[test]
    fn test_mathml_display_attribute() {
        let block = first_element(r#"<math display="block"><mi>x</mi></math>"#);
        assert_eq!(classify(&block), NodeRole::BlockMath);
        let inline = first_element(r#"<math><mi>x</mi></math>"#);
        assert_eq!(classify(&inline), NodeRole::InlineMath);
    }

    #[test]
    fn test_mathjax_container() {
        let block = first_element(r#"<mjx-container class="MathJax" display="true"></mjx-container>"#);
        assert_eq!(classify(&block), NodeRole::BlockMath);
        let inline = first_element(r#"<mjx-container class="MathJax"></mjx-container>"#);
        assert_eq!(classify(&inline), NodeRole::InlineMath);
    }

    #[test]
    fn test_rendered_math_spans() {
        let block = first_element(r#"<span class="math math-display">x</span>"#);
        assert_eq!(classify(&block), NodeRole::BlockMath);
        let inline = first_element(r#"<span class="math math-inline">x</span>"#);
        assert_eq!(classify(&inline), NodeRole::InlineMath);
    }

    #[test]
    fn test_structural_roles() {
        assert_eq!(classify(&first_element("<pre>x</pre>")), NodeRole::CodeBlock);
        assert_eq!(classify(&first_element("<table></table>")), NodeRole::Table);
        assert_eq!(classify(&first_element("<ul><li>a</li></ul>")), NodeRole::List);
        assert_eq!(classify(&first_element("<ol><li>a</li></ol>")), NodeRole::List);
        assert_eq!(classify(&first_element("<p>a</p>")), NodeRole::TextContainer);
        assert_eq!(classify(&first_element("<h3>a</h3>")), NodeRole::TextContainer);
        assert_eq!(classify(&first_element("<blockquote>a</blockquote>")), NodeRole::TextContainer);
        assert_eq!(classify(&first_element("<div>a</div>")), NodeRole::Opaque);
        assert_eq!(classify(&first_element("<span>a</span>")), NodeRole::Opaque);
    }

    #[test]
    fn test_code_wrapper_requires_pre() {
        let wrapper = first_element(r#"<div class="code-block"><div>rust</div><pre>fn x() {}</pre></div>"#);
        assert_eq!(classify(&wrapper), NodeRole::CodeBlock);
        let empty = first_element(r#"<div class="code-block">no pre</div>"#);
        assert_eq!(classify(&empty), NodeRole::Opaque);
    }
}
