//! Integration tests for the Markdown preview renderer
//!
//! Covers validation codes, code-block modes, formula separation, caching,
//! request deduplication and the circuit breaker wiring.

use std::cell::Cell;
use std::pin::pin;
use std::rc::Rc;

use chat_markdown_bridge::circuit_breaker::CircuitStatus;
use chat_markdown_bridge::error::RenderErrorCode;
use chat_markdown_bridge::renderer::{
    CodeBlockMode, MarkdownRenderer, RenderOptions, RendererConfig,
};
use futures::executor::block_on;
use futures::{join, poll};

/// Renderer whose sanitizer counts its calls and passes HTML through
fn counting_renderer() -> (MarkdownRenderer, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let renderer = MarkdownRenderer::with_sanitizer(move |html: &str| {
        counter.set(counter.get() + 1);
        html.to_string()
    });
    (renderer, calls)
}

fn render(markdown: &str, options: &RenderOptions) -> String {
    let outcome = block_on(MarkdownRenderer::new().render(markdown, options));
    assert!(outcome.success, "render failed: {:?}", outcome.error);
    outcome.html.unwrap_or_default()
}

#[test]
fn test_heading_and_bold() {
    let html = render("# Hello\n\nThis is **bold**.", &RenderOptions::default());

    assert!(html.contains("<h1>Hello</h1>"));
    assert!(html.contains("<strong>bold</strong>"));
}

#[test]
fn test_gfm_extensions() {
    let markdown = "| a | b |\n| --- | :-: |\n| 1 | 2 |\n\n~~gone~~\n\nNote[^1]\n\n[^1]: Footnote text\n";
    let html = render(markdown, &RenderOptions::default());

    assert!(html.contains("<table>"));
    assert!(html.contains("<del>gone</del>"));
    assert!(html.contains("Footnote text"));
}

#[test]
fn test_footnote_links_resolve_after_sanitizing() {
    let html = render("Note[^a]\n\n[^a]: Footnote text\n", &RenderOptions::default());

    assert!(html.contains(r##"href="#user-content-a""##), "{html}");
    assert!(html.contains(r#"id="user-content-a""#), "{html}");
}

#[test]
fn test_code_block_full_mode() {
    let markdown = "```python\ndef f():\n    return 1\n```\n";
    let html = render(markdown, &RenderOptions::default());

    assert!(html.contains(r#"<code class="language-python">"#), "{html}");
    assert!(html.contains("def f():"));
}

#[test]
fn test_code_block_placeholder_mode() {
    let options = RenderOptions {
        code_block_mode: CodeBlockMode::Placeholder,
        ..RenderOptions::default()
    };
    let markdown = "Intro\n\n```python\ndef f():\n    return 1\n```\n\n    indented\n";
    let html = render(markdown, &options);

    assert!(html.contains(r#"<pre class="code-placeholder">[python code, 2 lines]</pre>"#), "{html}");
    assert!(html.contains(r#"<pre class="code-placeholder">[code, 1 line]</pre>"#), "{html}");
    assert!(!html.contains("<code"));
    assert!(!html.contains("def f()"));
}

/// Formulas joined by a CJK comma are separated before rendering
#[test]
fn test_cjk_comma_separated_formulas() {
    let html = render("$a$，$b$，$c$", &RenderOptions::default());

    assert_eq!(html.matches(r#"<span class="math math-inline">"#).count(), 3, "{html}");
    assert!(html.contains(">a</span>"));
    assert!(html.contains(">b</span>"));
    assert!(html.contains(">c</span>"));
}

#[test]
fn test_display_math() {
    let html = render("$$\n\\int_0^1 x\\,dx\n$$\n", &RenderOptions::default());

    assert!(html.contains(r#"class="math math-display""#), "{html}");
    assert!(html.contains("\\int_0^1"));
}

#[test]
fn test_validation_codes() {
    let renderer = MarkdownRenderer::new();

    let options = RenderOptions {
        max_input_size: 10,
        ..RenderOptions::default()
    };
    let outcome = block_on(renderer.render("This input is too long", &options));
    assert_eq!(outcome.error, Some(RenderErrorCode::ContentTooLarge));
    assert_eq!(
        outcome.fallback.as_deref(),
        Some(r#"<pre class="render-fallback">This input</pre>"#)
    );

    let outcome = block_on(renderer.render("<iframe src=x>", &RenderOptions::default()));
    assert_eq!(outcome.error, Some(RenderErrorCode::DangerousContent));

    renderer.reset();
    let deep = format!("{}x{}", "[".repeat(120), "]".repeat(120));
    let outcome = block_on(renderer.render(&deep, &RenderOptions::default()));
    assert_eq!(outcome.error, Some(RenderErrorCode::NestingTooDeep));
}

#[test]
fn test_circuit_opens_after_three_failures() {
    let renderer = MarkdownRenderer::new();
    let options = RenderOptions::default();

    for i in 0..3 {
        let outcome = block_on(renderer.render(&format!("<script>{i}</script>"), &options));
        assert_eq!(outcome.error, Some(RenderErrorCode::DangerousContent));
    }
    let health = renderer.circuit_health();
    assert_eq!(health.state, CircuitStatus::Open);
    assert_eq!(health.failures, 3);

    let outcome = block_on(renderer.render("# Fine", &options));
    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(RenderErrorCode::CircuitOpen));
    assert_eq!(
        outcome.fallback.as_deref(),
        Some(r#"<pre class="render-fallback"># Fine</pre>"#)
    );

    renderer.reset();
    let health = renderer.circuit_health();
    assert_eq!(health.state, CircuitStatus::Closed);
    assert_eq!(health.failures, 0);

    let outcome = block_on(renderer.render("# Fine", &options));
    assert!(outcome.success);
}

#[test]
fn test_open_circuit_bypasses_cache() {
    let renderer = MarkdownRenderer::new();
    let options = RenderOptions::default();

    assert!(block_on(renderer.render("# Cached", &options)).success);
    assert_eq!(renderer.cache_len(), 1);

    for i in 0..3 {
        block_on(renderer.render(&format!("<script>{i}</script>"), &options));
    }
    assert_eq!(renderer.circuit_health().state, CircuitStatus::Open);

    let outcome = block_on(renderer.render("# Cached", &options));
    assert_eq!(outcome.error, Some(RenderErrorCode::CircuitOpen));
    assert_eq!(
        outcome.fallback.as_deref(),
        Some(r#"<pre class="render-fallback"># Cached</pre>"#)
    );

    renderer.reset();
    let outcome = block_on(renderer.render("# Cached", &options));
    assert!(outcome.success);
}

#[test]
fn test_success_resets_failure_count() {
    let renderer = MarkdownRenderer::new();
    let options = RenderOptions::default();

    block_on(renderer.render("<script>1</script>", &options));
    block_on(renderer.render("<script>2</script>", &options));
    assert_eq!(renderer.circuit_health().failures, 2);

    block_on(renderer.render("ok", &options));
    assert_eq!(renderer.circuit_health().failures, 0);
}

#[test]
fn test_configured_threshold() {
    let config = RendererConfig {
        failure_threshold: 1,
        ..RendererConfig::default()
    };
    let renderer = MarkdownRenderer::with_config(|html: &str| html.to_string(), config);

    block_on(renderer.render("<script>x</script>", &RenderOptions::default()));
    assert_eq!(renderer.circuit_health().state, CircuitStatus::Open);
}

#[test]
fn test_successful_results_are_cached() {
    let (renderer, calls) = counting_renderer();
    let options = RenderOptions::default();

    let first = block_on(renderer.render("Some *text*", &options));
    let second = block_on(renderer.render("Some *text*", &options));

    assert_eq!(first, second);
    assert_eq!(calls.get(), 1);
    assert_eq!(renderer.cache_len(), 1);

    renderer.clear_cache();
    assert_eq!(renderer.cache_len(), 0);
    block_on(renderer.render("Some *text*", &options));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_cache_key_includes_options() {
    let (renderer, calls) = counting_renderer();

    block_on(renderer.render("text", &RenderOptions::default()));
    let placeholder = RenderOptions {
        code_block_mode: CodeBlockMode::Placeholder,
        ..RenderOptions::default()
    };
    block_on(renderer.render("text", &placeholder));

    assert_eq!(calls.get(), 2);
    assert_eq!(renderer.cache_len(), 2);
}

#[test]
fn test_failures_are_not_cached() {
    let renderer = MarkdownRenderer::new();
    block_on(renderer.render("<script>x</script>", &RenderOptions::default()));
    assert_eq!(renderer.cache_len(), 0);
}

#[test]
fn test_cache_capacity_bounds_entries() {
    let config = RendererConfig {
        cache_capacity: 2,
        ..RendererConfig::default()
    };
    let renderer = MarkdownRenderer::with_config(|html: &str| html.to_string(), config);

    for text in ["one", "two", "three"] {
        block_on(renderer.render(text, &RenderOptions::default()));
    }
    assert_eq!(renderer.cache_len(), 2);
}

/// Identical concurrent requests share one computation
#[test]
fn test_concurrent_requests_are_deduplicated() {
    let (renderer, calls) = counting_renderer();
    let markdown = "First paragraph of text.\n\nSecond paragraph of text.\n\nThird.\n";
    let options = RenderOptions {
        chunk_size: 30,
        timeout_ms: 0,
        ..RenderOptions::default()
    };

    block_on(async {
        let mut first = pin!(renderer.render(markdown, &options));
        // The first poll renders one chunk and yields before the next
        assert!(poll!(first.as_mut()).is_pending());
        assert_eq!(renderer.in_flight_count(), 1);

        let second = renderer.render(markdown, &options);
        let (a, b) = join!(first, second);

        assert!(a.success);
        assert_eq!(a, b);
    });

    assert_eq!(calls.get(), 1);
    assert_eq!(renderer.in_flight_count(), 0);
}

#[test]
fn test_different_keys_run_independently() {
    let (renderer, calls) = counting_renderer();
    let options = RenderOptions::default();

    let (a, b) = block_on(async {
        join!(
            renderer.render("alpha", &options),
            renderer.render("beta", &options)
        )
    });

    assert!(a.html.unwrap().contains("alpha"));
    assert!(b.html.unwrap().contains("beta"));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_options_from_json() {
    let options: RenderOptions = serde_json::from_str(
        r#"{"maxInputSize": 5, "sanitize": false, "codeBlockMode": "placeholder"}"#,
    )
    .unwrap();

    assert_eq!(options.max_input_size, 5);
    assert!(!options.sanitize);
    assert_eq!(options.code_block_mode, CodeBlockMode::Placeholder);
    assert_eq!(options.timeout_ms, 3_000);
    assert!(options.on_progress.is_none());
}

#[test]
fn test_outcome_serializes_to_json() {
    let outcome = block_on(MarkdownRenderer::new().render("*hi*", &RenderOptions::default()));
    let json = serde_json::to_value(&outcome).unwrap();

    assert_eq!(json["success"], true);
    assert_eq!(json["html"], "<p><em>hi</em></p>\n");
    assert!(json.get("error").is_none());

    let health = serde_json::to_value(MarkdownRenderer::new().circuit_health()).unwrap();
    assert_eq!(health, serde_json::json!({"state": "closed", "failures": 0}));
}
