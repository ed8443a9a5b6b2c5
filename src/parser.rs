//! HTML5 parser using html5ever
//!
//! Chat adapters hand over one message fragment as a string. The fragment is
//! parsed into a private `RcDom` so the converter can walk and inspect it
//! without touching the caller's live document.
//!
//! html5ever implements the WHATWG parsing algorithm, so unclosed tags,
//! misnested formatting and stray table cells are repaired the same way a
//! browser would repair them. Scripting is disabled; nothing is executed.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::error::ConversionError;

/// Parse an HTML fragment into a DOM tree
///
/// # Errors
///
/// Returns `ConversionError::InvalidInput` for empty input. html5ever itself
/// never rejects markup.
///
/// # Examples
///
/// ```rust
/// use chat_markdown_bridge::parser::parse_html;
///
/// let dom = parse_html("<p>Hello <b>world").expect("parser repairs malformed markup");
/// ```
pub fn parse_html(html: &str) -> Result<RcDom, ConversionError> {
    if html.is_empty() {
        return Err(ConversionError::InvalidInput(
            "HTML input is empty".to_string(),
        ));
    }

    let dom = parse_document(RcDom::default(), Default::default()).one(html);

    Ok(dom)
}

/// Locate the `<body>` element html5ever synthesizes around a fragment
///
/// Falls back to the document node when no body exists.
pub fn fragment_root(dom: &RcDom) -> Handle {
    let document = dom.document.clone();
    let html = document
        .children
        .borrow()
        .iter()
        .find(|child| is_element(child, "html"))
        .cloned();

    if let Some(html) = html {
        let body = html
            .children
            .borrow()
            .iter()
            .find(|child| is_element(child, "body"))
            .cloned();
        if let Some(body) = body {
            return body;
        }
    }

    document
}

fn is_element(node: &Handle, tag: &str) -> bool {
    matches!(node.data, NodeData::Element { ref name, .. } if name.local.as_ref() == tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_simple_fragment() {
        let result = parse_html("<p>Hello</p>");
        assert!(result.is_ok(), "Should parse simple HTML");
    }

    #[test]
    fn test_parse_malformed_html() {
        let result = parse_html("<div><p>Hello");
        assert!(result.is_ok(), "Should handle malformed HTML gracefully");
    }

    #[test]
    fn test_parse_empty_input() {
        match parse_html("") {
            Err(ConversionError::InvalidInput(_)) => (),
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_fragment_root_is_body() {
        let dom = parse_html("<p>One</p><p>Two</p>").unwrap();
        let root = fragment_root(&dom);
        assert!(is_element(&root, "body"));
        assert_eq!(root.children.borrow().len(), 2);
    }

    #[test]
    fn test_parse_mathml_annotation() {
        let html = r#"<math><semantics><mi>x</mi><annotation encoding="application/x-tex">x</annotation></semantics></math>"#;
        let dom = parse_html(html).unwrap();
        let root = fragment_root(&dom);
        assert!(is_element(&root.children.borrow()[0], "math"));
    }

    proptest! {
        #[test]
        fn prop_unclosed_tags_handled(
            tag in prop::sample::select(vec!["div", "p", "span", "h1", "ul", "li", "table", "td", "pre"]),
            content in "[a-zA-Z0-9 ]{1,50}",
        ) {
            let html = format!("<{0}>{1}", tag, content);
            prop_assert!(parse_html(&html).is_ok(), "Parser should handle unclosed tags: {}", html);
        }

        #[test]
        fn prop_misnested_tags_handled(
            outer_tag in prop::sample::select(vec!["b", "i", "strong", "em"]),
            inner_tag in prop::sample::select(vec!["b", "i", "strong", "em"]),
            content in "[a-zA-Z0-9 ]{1,30}",
        ) {
            let html = format!("<{0}><{1}>{2}</{0}></{1}>", outer_tag, inner_tag, content);
            prop_assert!(parse_html(&html).is_ok(), "Parser should handle misnested tags: {}", html);
        }
    }
}
