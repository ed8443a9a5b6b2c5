//! Security checks applied while walking chat HTML
//!
//! Chat transcripts are user- and model-authored content rendered by a
//! third-party page. Anything that reaches the Markdown output may later be
//! rendered again by [`crate::renderer::MarkdownRenderer`], so the walk drops
//! executable elements and demotes dangerous link targets to plain text before
//! they can be carried across.
//!
//! # Defense Layers
//!
//! 1. **Element removal**: script, style, iframe, object, embed and similar
//!    elements are dropped together with their children
//! 2. **UI chrome**: buttons, icons and templates the provider draws around a
//!    message are skipped
//! 3. **URL checks**: `javascript:`, `data:`, `vbscript:`, `file:` and `about:`
//!    targets are never emitted as links or image sources
//! 4. **Depth bound**: the recursive walk is limited so hostile nesting cannot
//!    exhaust the stack
//!
//! html5ever parses HTML5, not XML, so external entity resolution never happens.

use crate::error::ConversionError;

/// Maximum element nesting the converter walks before degrading to plain text
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Elements removed entirely, children included
const DANGEROUS_ELEMENTS: &[&str] = &[
    "script",   // JavaScript execution
    "style",    // CSS injection
    "noscript", // Alternative content
    "iframe",   // Embedded documents
    "object",   // Plugins
    "embed",    // Plugins
    "applet",   // Legacy Java applets
    "link",     // External stylesheets
    "base",     // Rebases relative URLs
    "meta",
    "form",
    "input",
    "textarea",
    "select",
];

/// Interface elements drawn around chat content, never part of the message
const UI_CHROME_ELEMENTS: &[&str] = &["button", "svg", "canvas", "template", "dialog", "menu"];

/// Dangerous URL schemes that should be blocked
const DANGEROUS_URL_SCHEMES: &[&str] = &["javascript:", "data:", "vbscript:", "file:", "about:"];

/// Action to take for an element encountered during the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeAction {
    /// Visit the element normally
    Allow,
    /// Executable or embedding element; drop it and all its children
    Remove,
    /// Provider interface element; skip it and all its children
    SkipChrome,
}

/// Security validator for chat HTML
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_depth: usize,
}

impl SecurityValidator {
    /// Create a new security validator with default settings
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Create a security validator with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decide how the walk treats an element
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::security::{SecurityValidator, SanitizeAction};
    ///
    /// let validator = SecurityValidator::new();
    /// assert_eq!(validator.check_element("script"), SanitizeAction::Remove);
    /// assert_eq!(validator.check_element("button"), SanitizeAction::SkipChrome);
    /// assert_eq!(validator.check_element("div"), SanitizeAction::Allow);
    /// ```
    pub fn check_element(&self, tag_name: &str) -> SanitizeAction {
        if DANGEROUS_ELEMENTS.contains(&tag_name) {
            SanitizeAction::Remove
        } else if UI_CHROME_ELEMENTS.contains(&tag_name) {
            SanitizeAction::SkipChrome
        } else {
            SanitizeAction::Allow
        }
    }

    /// Check if a URL uses a dangerous scheme
    ///
    /// Leading whitespace and ASCII control characters are ignored, as are
    /// tabs and newlines inside the scheme, matching how browsers resolve
    /// `java\tscript:` targets.
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::security::SecurityValidator;
    ///
    /// let validator = SecurityValidator::new();
    /// assert!(validator.is_dangerous_url("javascript:alert('xss')"));
    /// assert!(validator.is_dangerous_url("  JaVaScRiPt:alert(1)"));
    /// assert!(!validator.is_dangerous_url("https://example.com"));
    /// assert!(!validator.is_dangerous_url("/relative/path"));
    /// ```
    pub fn is_dangerous_url(&self, url: &str) -> bool {
        let normalized: String = url
            .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_control())
            .chars()
            .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
            .take(16)
            .collect::<String>()
            .to_ascii_lowercase();
        DANGEROUS_URL_SCHEMES
            .iter()
            .any(|scheme| normalized.starts_with(scheme))
    }

    /// Validate nesting depth to prevent stack overflow
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::security::SecurityValidator;
    ///
    /// let validator = SecurityValidator::with_max_depth(100);
    /// assert!(validator.validate_depth(50).is_ok());
    /// assert!(validator.validate_depth(150).is_err());
    /// ```
    pub fn validate_depth(&self, depth: usize) -> Result<(), ConversionError> {
        if depth > self.max_depth {
            Err(ConversionError::NestingTooDeep {
                depth,
                max: self.max_depth,
            })
        } else {
            Ok(())
        }
    }

    /// Return the URL when it is safe to emit, `None` otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::security::SecurityValidator;
    ///
    /// let validator = SecurityValidator::new();
    /// assert_eq!(validator.sanitize_url("javascript:alert('xss')"), None);
    /// assert_eq!(validator.sanitize_url("https://example.com"), Some("https://example.com"));
    /// ```
    pub fn sanitize_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        if self.is_dangerous_url(url) {
            None
        } else {
            Some(url)
        }
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}
