//! HTML sanitization of rendered Markdown
//!
//! The renderer never trusts its own output: raw HTML in Markdown passes
//! straight through pulldown-cmark. A [`Sanitizer`] is injected at
//! construction; the default is backed by ammonia and keeps only the class
//! tokens the preview stylesheet and the converter understand.

use std::collections::HashSet;

use ammonia::Builder;

/// Removes dangerous tags and attributes from HTML
pub trait Sanitizer {
    fn sanitize(&self, html: &str) -> String;
}

impl<F> Sanitizer for F
where
    F: Fn(&str) -> String,
{
    fn sanitize(&self, html: &str) -> String {
        self(html)
    }
}

/// Prefix given to every `id`, so rendered content cannot clobber page ids
const ID_PREFIX: &str = "user-content-";

/// ammonia-backed sanitizer
pub struct AmmoniaSanitizer {
    builder: Builder<'static>,
}

impl AmmoniaSanitizer {
    pub fn new() -> Self {
        let mut builder = Builder::default();
        builder
            .add_tags(["input"])
            .add_tag_attributes("input", ["type", "checked", "disabled"])
            .add_tag_attributes("span", ["class"])
            .add_tag_attributes("code", ["class"])
            .add_tag_attributes("pre", ["class"])
            .add_tag_attributes("div", ["class", "id"])
            .add_tag_attributes("sup", ["class", "id"])
            .add_tag_attributes("li", ["id"])
            .id_prefix(Some(ID_PREFIX))
            .attribute_filter(|element, attribute, value| match (element, attribute) {
                (_, "class") => {
                    let kept = kept_classes(value);
                    if kept.is_empty() {
                        None
                    } else {
                        Some(kept.into())
                    }
                }
                ("input", "type") if value != "checkbox" => None,
                // Keep in-page links pointing at the prefixed ids
                ("a", "href") if value.starts_with('#') && !value[1..].starts_with(ID_PREFIX) => {
                    Some(format!("#{ID_PREFIX}{}", &value[1..]).into())
                }
                _ => Some(value.into()),
            });
        Self { builder }
    }
}

impl Default for AmmoniaSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer for AmmoniaSanitizer {
    fn sanitize(&self, html: &str) -> String {
        self.builder.clean(html).to_string()
    }
}

impl std::fmt::Debug for AmmoniaSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmmoniaSanitizer").finish_non_exhaustive()
    }
}

fn kept_classes(value: &str) -> String {
    let mut seen = HashSet::new();
    value
        .split_whitespace()
        .filter(|class| is_allowed_class(class) && seen.insert(*class))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_allowed_class(class: &str) -> bool {
    class == "math"
        || class.starts_with("math-")
        || class.starts_with("language-")
        || class == "code-placeholder"
        || class == "render-fallback"
        || class == "footnote-definition"
        || class == "footnote-reference"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script_and_handlers() {
        let sanitizer = AmmoniaSanitizer::new();
        let out = sanitizer.sanitize(r#"<p onclick="x()">hi</p><script>alert(1)</script>"#);
        assert_eq!(out, "<p>hi</p>");
    }

    #[test]
    fn test_keeps_math_and_language_classes() {
        let sanitizer = AmmoniaSanitizer::new();
        let out = sanitizer.sanitize(
            r#"<span class="math math-inline evil">x</span><pre><code class="language-rust">fn</code></pre>"#,
        );
        assert!(out.contains(r#"class="math math-inline""#), "{out}");
        assert!(out.contains(r#"class="language-rust""#), "{out}");
        assert!(!out.contains("evil"));
    }

    #[test]
    fn test_drops_unknown_class_attribute() {
        let sanitizer = AmmoniaSanitizer::new();
        let out = sanitizer.sanitize(r#"<span class="tracking">x</span>"#);
        assert_eq!(out, "<span>x</span>");
    }

    #[test]
    fn test_removes_javascript_links() {
        let sanitizer = AmmoniaSanitizer::new();
        let out = sanitizer.sanitize(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains("javascript"));
    }

    #[test]
    fn test_footnote_ids_and_links_share_prefix() {
        let sanitizer = AmmoniaSanitizer::new();
        let out = sanitizer.sanitize(concat!(
            r##"<p>Note<sup class="footnote-reference"><a href="#1">1</a></sup></p>"##,
            r#"<div class="footnote-definition" id="1"><p>Text</p></div>"#
        ));
        assert!(out.contains(r##"href="#user-content-1""##), "{out}");
        assert!(out.contains(r#"<div class="footnote-definition" id="user-content-1">"#), "{out}");
    }

    #[test]
    fn test_closure_is_a_sanitizer() {
        let upper = |html: &str| html.to_uppercase();
        assert_eq!(upper.sanitize("<p>a</p>"), "<P>A</P>");
    }
}
