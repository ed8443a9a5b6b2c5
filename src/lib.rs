//! Chat Markdown Bridge
//!
//! Two halves of a chat-message round trip:
//!
//! - **Extraction**: [`HtmlToMarkdownConverter`] turns the rendered HTML of one
//!   chat message (KaTeX, MathJax or MathML formulas, highlighted code, tables,
//!   citation pills and UI chrome) into portable Markdown with `$`/`$$` math.
//! - **Preview**: [`MarkdownRenderer`] renders arbitrary Markdown into
//!   sanitized HTML behind a circuit breaker, an LRU cache, input validation,
//!   chunked timed rendering and request deduplication.
//!
//! # Architecture
//!
//! - `parser`: HTML5 parsing using html5ever
//! - `dom`: read-only helpers over the parsed tree
//! - `security`: element removal, URL checks and the walk depth bound
//! - `classifier`: structural role of each element
//! - `math`: TeX source recovery and the Markdown math grammar
//! - `placeholder`: opaque tokens that keep formulas out of clean-up passes
//! - `converter`: the HTML to Markdown walk
//! - `postprocess`: Markdown normalization and citation stripping
//! - `validator`: pre-render input checks and plain-text fallback
//! - `chunker`: block-boundary splitting of large documents
//! - `circuit_breaker`: consecutive-failure guard
//! - `cache`: bounded LRU cache
//! - `sanitizer`: pluggable HTML sanitization
//! - `renderer`: the Markdown to HTML service
//!
//! # Examples
//!
//! ```
//! use chat_markdown_bridge::{HtmlToMarkdownConverter, MarkdownRenderer, RenderOptions};
//!
//! let markdown = HtmlToMarkdownConverter::new()
//!     .parse(r#"<p>Euler: <math alttext="e^{i\pi}+1=0"><mi>e</mi></math></p>"#);
//! assert_eq!(markdown, "Euler: $e^{i\\pi}+1=0$\n");
//!
//! let outcome = futures::executor::block_on(
//!     MarkdownRenderer::new().render(&markdown, &RenderOptions::default()),
//! );
//! assert!(outcome.html.unwrap().contains("math-inline"));
//! ```

pub mod cache;
pub mod chunker;
pub mod circuit_breaker;
pub mod classifier;
pub mod converter;
pub mod dom;
pub mod error;
pub mod math;
pub mod parser;
pub mod placeholder;
pub mod postprocess;
pub mod renderer;
pub mod sanitizer;
pub mod security;
pub mod validator;

// Re-export main types for convenience
pub use cache::BoundedCache;
pub use circuit_breaker::{CircuitBreaker, CircuitHealth, CircuitStatus};
pub use converter::{ConversionOptions, HtmlToMarkdownConverter};
pub use error::{ConversionError, RenderError, RenderErrorCode, ValidationError};
pub use renderer::{CodeBlockMode, MarkdownRenderer, RenderOptions, RenderOutcome, RendererConfig};
pub use sanitizer::{AmmoniaSanitizer, Sanitizer};
pub use validator::{InputValidator, ValidationResult, validate};
