//! Read-only helpers over `markup5ever_rcdom` nodes

use markup5ever_rcdom::{Handle, NodeData};

/// Local tag name of an element node
pub fn tag_name(node: &Handle) -> Option<&str> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// Value of an attribute, if the node is an element carrying it
pub fn attr(node: &Handle, attr_name: &str) -> Option<String> {
    if let NodeData::Element { ref attrs, .. } = node.data {
        attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.as_ref() == attr_name)
            .map(|attr| attr.value.to_string())
    } else {
        None
    }
}

/// True when the `class` attribute contains `class_name` as a whole token
pub fn has_class(node: &Handle, class_name: &str) -> bool {
    attr(node, "class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

/// Element children in document order
pub fn element_children(node: &Handle) -> Vec<Handle> {
    node.children
        .borrow()
        .iter()
        .filter(|child| matches!(child.data, NodeData::Element { .. }))
        .cloned()
        .collect()
}

/// First descendant (excluding `node`) matching `predicate`, in document order
///
/// Iterative so that pathological nesting cannot exhaust the stack.
pub fn find_descendant<F>(node: &Handle, predicate: F) -> Option<Handle>
where
    F: Fn(&Handle) -> bool,
{
    let mut stack: Vec<Handle> = node.children.borrow().iter().rev().cloned().collect();
    while let Some(current) = stack.pop() {
        if predicate(&current) {
            return Some(current);
        }
        stack.extend(current.children.borrow().iter().rev().cloned());
    }
    None
}

/// Concatenated text of all descendant text nodes, unmodified
pub fn text_content(node: &Handle) -> String {
    let mut output = String::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        match current.data {
            NodeData::Text { ref contents } => output.push_str(&contents.borrow()),
            NodeData::Element { .. } | NodeData::Document => {
                stack.extend(current.children.borrow().iter().rev().cloned());
            }
            _ => {}
        }
    }
    output
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{fragment_root, parse_html};

    #[test]
    fn test_attr_and_class_lookup() {
        let dom = parse_html(r#"<span class="katex  katex-display" data-x="1">x</span>"#).unwrap();
        let span = element_children(&fragment_root(&dom)).remove(0);
        assert_eq!(tag_name(&span), Some("span"));
        assert!(has_class(&span, "katex"));
        assert!(has_class(&span, "katex-display"));
        assert!(!has_class(&span, "kat"));
        assert_eq!(attr(&span, "data-x").as_deref(), Some("1"));
        assert_eq!(attr(&span, "missing"), None);
    }

    #[test]
    fn test_text_content_keeps_document_order() {
        let dom = parse_html("<div>a<b>b<i>c</i></b>d</div>").unwrap();
        assert_eq!(text_content(&fragment_root(&dom)), "abcd");
    }

    #[test]
    fn test_find_descendant() {
        let dom = parse_html(r#"<div><p><code class="language-rust">x</code></p></div>"#).unwrap();
        let found = find_descendant(&fragment_root(&dom), |n| tag_name(n) == Some("code"));
        assert!(found.is_some());
    }

    #[test]
    fn test_deep_tree_text_content_does_not_overflow() {
        let mut html = String::new();
        for _ in 0..5000 {
            html.push_str("<span>");
        }
        html.push_str("deep");
        let dom = parse_html(&html).unwrap();
        assert_eq!(text_content(&fragment_root(&dom)), "deep");
    }
}
