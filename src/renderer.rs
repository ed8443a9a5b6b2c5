//! Resilient Markdown preview rendering
//!
//! [`MarkdownRenderer`] turns Markdown into sanitized HTML. One instance owns
//! all shared state: the circuit breaker, the result cache and the map of
//! in-flight renders. The state is `Rc`/`RefCell` based and meant for a single
//! event loop; any executor can drive the futures.
//!
//! # Pipeline
//!
//! 1. Identical concurrent requests share one in-flight future
//! 2. Successful results are served from an LRU cache
//! 3. Inside the circuit breaker: validation, adjacent-formula separation,
//!    chunked rendering with a cooperative time budget, an output-size check
//!    and sanitization
//!
//! Every failure yields a [`RenderOutcome`] carrying an escaped plain-text
//! fallback. `render` never returns an error.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures_lite::future::yield_now;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::BoundedCache;
use crate::chunker::split_chunks;
use crate::circuit_breaker::{
    CircuitBreaker, CircuitHealth, CircuitStatus, DEFAULT_FAILURE_THRESHOLD, Rejection,
};
use crate::error::{RenderError, RenderErrorCode};
use crate::math::separate_adjacent_formulas;
use crate::sanitizer::{AmmoniaSanitizer, Sanitizer};
use crate::validator::{DEFAULT_MAX_NESTING_DEPTH, InputValidator, plain_text_fallback};

/// Progress callback, called with a percentage after each chunk
pub type ProgressCallback = Rc<dyn Fn(f64)>;

type SharedRender = Shared<LocalBoxFuture<'static, RenderOutcome>>;

/// How fenced and indented code blocks are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeBlockMode {
    /// Full `<pre><code>` output
    #[default]
    Full,
    /// A one-line `[lang code, N lines]` marker
    Placeholder,
}

/// Per-call render options
///
/// Deserializes from camelCase JSON; missing fields take their defaults.
///
/// ```
/// use chat_markdown_bridge::renderer::{CodeBlockMode, RenderOptions};
///
/// let options: RenderOptions = serde_json::from_str(r#"{"timeoutMs": 0, "codeBlockMode": "placeholder"}"#).unwrap();
/// assert_eq!(options.timeout_ms, 0);
/// assert_eq!(options.code_block_mode, CodeBlockMode::Placeholder);
/// assert_eq!(options.chunk_size, 20_000);
/// ```
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    /// Input ceiling in bytes
    pub max_input_size: usize,
    /// Rendered HTML ceiling in bytes
    pub max_output_size: usize,
    /// Time budget in milliseconds; 0 disables it
    pub timeout_ms: u64,
    pub sanitize: bool,
    pub code_block_mode: CodeBlockMode,
    /// Target chunk size in bytes; 0 renders in one piece
    pub chunk_size: usize,
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_input_size: 1_000_000,
            max_output_size: 5_000_000,
            timeout_ms: 3_000,
            sanitize: true,
            code_block_mode: CodeBlockMode::Full,
            chunk_size: 20_000,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOptions")
            .field("max_input_size", &self.max_input_size)
            .field("max_output_size", &self.max_output_size)
            .field("timeout_ms", &self.timeout_ms)
            .field("sanitize", &self.sanitize)
            .field("code_block_mode", &self.code_block_mode)
            .field("chunk_size", &self.chunk_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl RenderOptions {
    /// Options that affect output; the progress callback does not
    fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}:{:?}:{}",
            self.max_input_size,
            self.max_output_size,
            self.timeout_ms,
            self.sanitize,
            self.code_block_mode,
            self.chunk_size
        )
    }
}

/// Result of one render call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RenderErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl RenderOutcome {
    pub fn rendered(html: String) -> Self {
        Self {
            success: true,
            html: Some(html),
            error: None,
            fallback: None,
        }
    }

    pub fn failed(code: RenderErrorCode, fallback: String) -> Self {
        Self {
            success: false,
            html: None,
            error: Some(code),
            fallback: Some(fallback),
        }
    }
}

/// Construction-time settings of a [`MarkdownRenderer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RendererConfig {
    pub cache_capacity: usize,
    pub failure_threshold: u32,
    pub max_nesting_depth: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 32,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

struct RendererState {
    sanitizer: Box<dyn Sanitizer>,
    breaker: CircuitBreaker,
    validator: InputValidator,
    cache: RefCell<BoundedCache<String, String>>,
    in_flight: RefCell<HashMap<String, SharedRender>>,
}

/// Markdown to sanitized HTML renderer
///
/// Cloning is cheap and clones share all state.
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::renderer::{MarkdownRenderer, RenderOptions};
///
/// let renderer = MarkdownRenderer::new();
/// let outcome = futures::executor::block_on(renderer.render("# Hello", &RenderOptions::default()));
/// assert!(outcome.success);
/// assert_eq!(outcome.html.as_deref(), Some("<h1>Hello</h1>\n"));
/// ```
#[derive(Clone)]
pub struct MarkdownRenderer {
    state: Rc<RendererState>,
}

impl MarkdownRenderer {
    /// Renderer with the ammonia sanitizer and default settings
    pub fn new() -> Self {
        Self::with_config(AmmoniaSanitizer::new(), RendererConfig::default())
    }

    pub fn with_sanitizer(sanitizer: impl Sanitizer + 'static) -> Self {
        Self::with_config(sanitizer, RendererConfig::default())
    }

    pub fn with_config(sanitizer: impl Sanitizer + 'static, config: RendererConfig) -> Self {
        Self {
            state: Rc::new(RendererState {
                sanitizer: Box::new(sanitizer),
                breaker: CircuitBreaker::with_threshold(config.failure_threshold),
                validator: InputValidator::with_max_nesting_depth(config.max_nesting_depth),
                cache: RefCell::new(BoundedCache::new(config.cache_capacity)),
                in_flight: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Render `markdown` to HTML
    ///
    /// While the circuit is open every call returns `CIRCUIT_OPEN` at once,
    /// before the cache is consulted. Concurrent calls with the same content
    /// and options share one computation; the progress callback of the first
    /// caller is the one invoked.
    pub async fn render(&self, markdown: &str, options: &RenderOptions) -> RenderOutcome {
        if self.state.breaker.state() == CircuitStatus::Open {
            return self.state.circuit_open(markdown, options);
        }

        let key = render_key(markdown, options);

        let cached = self.state.cache.borrow_mut().get(&key).cloned();
        if let Some(html) = cached {
            debug!(key = %&key[..12], "Serving render from cache");
            return RenderOutcome::rendered(html);
        }

        let existing = self.state.in_flight.borrow().get(&key).cloned();
        let shared = match existing {
            Some(shared) => {
                debug!(key = %&key[..12], "Joining in-flight render");
                shared
            }
            None => {
                let shared = self.spawn_render(key.clone(), markdown.to_string(), options.clone());
                self.state
                    .in_flight
                    .borrow_mut()
                    .insert(key, shared.clone());
                shared
            }
        };

        shared.await
    }

    fn spawn_render(&self, key: String, markdown: String, options: RenderOptions) -> SharedRender {
        let state = Rc::clone(&self.state);
        async move {
            let outcome = state.run(&markdown, &options).await;
            if let (true, Some(html)) = (outcome.success, outcome.html.as_ref()) {
                state.cache.borrow_mut().set(key.clone(), html.clone());
            }
            state.in_flight.borrow_mut().remove(&key);
            outcome
        }
        .boxed_local()
        .shared()
    }

    pub fn circuit_health(&self) -> CircuitHealth {
        self.state.breaker.health()
    }

    /// Close the circuit and clear its failure count
    pub fn reset(&self) {
        self.state.breaker.reset();
    }

    pub fn clear_cache(&self) {
        self.state.cache.borrow_mut().clear();
    }

    /// Number of distinct renders currently running
    pub fn in_flight_count(&self) -> usize {
        self.state.in_flight.borrow().len()
    }

    pub fn cache_len(&self) -> usize {
        self.state.cache.borrow().len()
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MarkdownRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownRenderer")
            .field("circuit", &self.circuit_health())
            .field("cache_len", &self.cache_len())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl RendererState {
    fn circuit_open(&self, markdown: &str, options: &RenderOptions) -> RenderOutcome {
        debug!("Circuit open, serving plain-text fallback");
        let fallback = plain_text_fallback(markdown, options.max_input_size);
        RenderOutcome::failed(RenderErrorCode::CircuitOpen, fallback)
    }

    async fn run(&self, markdown: &str, options: &RenderOptions) -> RenderOutcome {
        self.breaker
            .execute_async_or_else(
                || async move {
                    self.render_pipeline(markdown, options)
                        .await
                        .map(RenderOutcome::rendered)
                },
                |rejection| match rejection {
                    Rejection::Open => self.circuit_open(markdown, options),
                    Rejection::Failed(err) => {
                        warn!(code = %err.code(), error = %err, "Render failed");
                        let fallback = plain_text_fallback(markdown, options.max_input_size);
                        RenderOutcome::failed(err.code(), fallback)
                    }
                },
            )
            .await
    }

    async fn render_pipeline(&self, markdown: &str, options: &RenderOptions) -> Result<String, RenderError> {
        let validation = self.validator.validate(markdown, options.max_input_size);
        if let Some(err) = validation.error {
            return Err(err.into());
        }

        let normalized = separate_adjacent_formulas(markdown);
        let chunks = split_chunks(&normalized, options.chunk_size);
        let total = chunks.len();
        debug!(chunks = total, bytes = normalized.len(), "Rendering Markdown");

        let budget = (options.timeout_ms > 0).then(|| Duration::from_millis(options.timeout_ms));
        let started = Instant::now();
        let mut html = String::with_capacity(normalized.len() * 2);

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                yield_now().await;
                if let Some(budget) = budget {
                    if started.elapsed() > budget {
                        return Err(RenderError::Timeout {
                            budget_ms: options.timeout_ms,
                            completed: index,
                            total,
                        });
                    }
                }
            }

            render_chunk(chunk, options.code_block_mode, &mut html);
            if html.len() > options.max_output_size {
                return Err(RenderError::OutputTooLarge {
                    size: html.len(),
                    limit: options.max_output_size,
                });
            }

            if let Some(on_progress) = &options.on_progress {
                on_progress((index + 1) as f64 * 100.0 / total as f64);
            }
        }

        if total == 0 {
            if let Some(on_progress) = &options.on_progress {
                on_progress(100.0);
            }
        }

        if options.sanitize {
            Ok(self.sanitizer.sanitize(&html))
        } else {
            Ok(html)
        }
    }
}

/// BLAKE3 over the full content and the option fingerprint
fn render_key(markdown: &str, options: &RenderOptions) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(options.fingerprint().as_bytes());
    hasher.update(&[0]);
    hasher.update(markdown.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_MATH);
    options
}

fn render_chunk(chunk: &str, mode: CodeBlockMode, output: &mut String) {
    let parser = Parser::new_ext(chunk, markdown_options());
    match mode {
        CodeBlockMode::Full => html::push_html(output, parser),
        CodeBlockMode::Placeholder => html::push_html(output, CodePlaceholders { inner: parser }),
    }
}

/// Replaces each code block in an event stream with a one-line marker
struct CodePlaceholders<I> {
    inner: I,
}

impl<'a, I> Iterator for CodePlaceholders<I>
where
    I: Iterator<Item = Event<'a>>,
{
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Event<'a>> {
        let kind = match self.inner.next()? {
            Event::Start(Tag::CodeBlock(kind)) => kind,
            other => return Some(other),
        };

        let language = match kind {
            CodeBlockKind::Fenced(info) => info
                .split_whitespace()
                .next()
                .map(|lang| {
                    lang.chars()
                        .filter(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
                        .collect::<String>()
                })
                .unwrap_or_default(),
            CodeBlockKind::Indented => String::new(),
        };

        let mut code = String::new();
        for event in self.inner.by_ref() {
            match event {
                Event::End(TagEnd::CodeBlock) => break,
                Event::Text(text) => code.push_str(&text),
                _ => {}
            }
        }

        Some(Event::Html(CowStr::from(code_placeholder(&language, code.lines().count()))))
    }
}

fn code_placeholder(language: &str, lines: usize) -> String {
    let unit = if lines == 1 { "line" } else { "lines" };
    if language.is_empty() {
        format!("<pre class=\"code-placeholder\">[code, {lines} {unit}]</pre>\n")
    } else {
        format!("<pre class=\"code-placeholder\">[{language} code, {lines} {unit}]</pre>\n")
    }
}
