//! Pre-render validation of Markdown input
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. size in bytes against the caller's limit
//! 2. script tags, embedding tags, inline event handlers and dangerous URL schemes
//! 3. bracket nesting depth
//!
//! Every result carries a `sanitized` echo that is safe to show as plain text,
//! so a caller can always display something.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;

/// Bracket nesting bound used by [`validate`]
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// Appended to the echo of oversized input
pub const TRUNCATION_NOTICE: &str = "\n\n[Content truncated: input exceeds the size limit]";

/// Outcome of [`InputValidator::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<ValidationError>,
    pub sanitized: String,
}

impl ValidationResult {
    fn ok(text: &str) -> Self {
        Self {
            valid: true,
            error: None,
            sanitized: text.to_string(),
        }
    }

    fn rejected(error: ValidationError, sanitized: String) -> Self {
        Self {
            valid: false,
            error: Some(error),
            sanitized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputValidator {
    max_nesting_depth: usize,
}

impl InputValidator {
    pub fn new() -> Self {
        Self::with_max_nesting_depth(DEFAULT_MAX_NESTING_DEPTH)
    }

    pub fn with_max_nesting_depth(max_nesting_depth: usize) -> Self {
        Self { max_nesting_depth }
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    /// Validate `text` against a byte limit
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::validator::InputValidator;
    ///
    /// let result = InputValidator::new().validate("[link](javascript:alert(1))", 1000);
    /// assert!(!result.valid);
    /// assert!(!result.sanitized.contains("javascript:"));
    /// ```
    pub fn validate(&self, text: &str, max_size: usize) -> ValidationResult {
        if text.len() > max_size {
            let mut sanitized = truncate_at_char_boundary(text, max_size).to_string();
            sanitized.push_str(TRUNCATION_NOTICE);
            return ValidationResult::rejected(
                ValidationError::ContentTooLarge {
                    size: text.len(),
                    limit: max_size,
                },
                sanitized,
            );
        }

        if contains_dangerous_content(text) {
            return ValidationResult::rejected(ValidationError::DangerousContent, escape_for_display(text));
        }

        let depth = max_bracket_depth(text);
        if depth > self.max_nesting_depth {
            return ValidationResult::rejected(
                ValidationError::NestingTooDeep {
                    depth,
                    limit: self.max_nesting_depth,
                },
                flatten_brackets(text, self.max_nesting_depth),
            );
        }

        ValidationResult::ok(text)
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate with the default nesting bound
pub fn validate(text: &str, max_size: usize) -> ValidationResult {
    InputValidator::new().validate(text, max_size)
}

/// Escaped plain-text rendering used when the render pipeline cannot run
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::validator::plain_text_fallback;
///
/// let html = plain_text_fallback("<b>x</b>", 100);
/// assert_eq!(html, r#"<pre class="render-fallback">&lt;b&gt;x&lt;/b&gt;</pre>"#);
/// ```
pub fn plain_text_fallback(text: &str, limit: usize) -> String {
    let truncated = truncate_at_char_boundary(text, limit);
    format!(
        "<pre class=\"render-fallback\">{}</pre>",
        escape_for_display(truncated)
    )
}

/// True if `text` contains script, embedding, event-handler or dangerous-scheme patterns
pub fn contains_dangerous_content(text: &str) -> bool {
    static DANGEROUS: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = DANGEROUS.get_or_init(|| {
        Regex::new(
            r"(?i)<\s*script|<\s*(?:iframe|object|embed)\b|<[a-z][^>]*\son[a-z]+\s*=|j\s*a\s*v\s*a\s*s\s*c\s*r\s*i\s*p\s*t\s*:|vbscript\s*:|data\s*:\s*text/html",
        )
        .ok()
    });

    match pattern {
        Some(re) => re.is_match(text),
        None => {
            let lower = text.to_ascii_lowercase();
            lower.contains("<script") || lower.contains("javascript:")
        }
    }
}

/// HTML-escape `text` and neutralize scheme colons
fn escape_for_display(text: &str) -> String {
    static SCHEME: OnceLock<Option<Regex>> = OnceLock::new();
    let escaped = escape_html(text);
    match SCHEME
        .get_or_init(|| Regex::new(r"(?i)(javascript|vbscript|data)(\s*):").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(&escaped, "$1$2&#58;").into_owned(),
        None => escaped.replace(':', "&#58;"),
    }
}

fn escape_html(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#39;"),
            _ => output.push(ch),
        }
    }
    output
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn is_opener(ch: char) -> bool {
    matches!(ch, '(' | '[' | '{')
}

fn is_closer(ch: char) -> bool {
    matches!(ch, ')' | ']' | '}')
}

fn max_bracket_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for ch in text.chars() {
        if is_opener(ch) {
            depth += 1;
            max_depth = max_depth.max(depth);
        } else if is_closer(ch) {
            depth = depth.saturating_sub(1);
        }
    }
    max_depth
}

/// Drop brackets that open beyond `limit` along with their closers
fn flatten_brackets(text: &str, limit: usize) -> String {
    let mut output = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        if is_opener(ch) {
            depth += 1;
            if depth <= limit {
                output.push(ch);
            }
        } else if is_closer(ch) {
            if depth == 0 || depth <= limit {
                output.push(ch);
            }
            depth = depth.saturating_sub(1);
        } else {
            output.push(ch);
        }
    }
    output
}
