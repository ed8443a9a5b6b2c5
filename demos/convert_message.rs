//! Convert a chat message to Markdown and render it back as a preview
//!
//! Reads HTML from the file named on the command line, or uses a built-in
//! KaTeX sample. Set `RUST_LOG=chat_markdown_bridge=debug` to see the
//! converter and renderer logs.
//!
//! Run with: cargo run --example convert_message [message.html]

use std::env;
use std::fs;
use std::process::ExitCode;

use chat_markdown_bridge::converter::HtmlToMarkdownConverter;
use chat_markdown_bridge::renderer::{CodeBlockMode, MarkdownRenderer, RenderOptions};
use futures::executor::block_on;
use tracing_subscriber::EnvFilter;

const SAMPLE: &str = concat!(
    r#"<div class="markdown prose">"#,
    r#"<p>The roots of <span class="katex"><span class="katex-mathml"><math><semantics><mrow></mrow>"#,
    r#"<annotation encoding="application/x-tex">ax^2 + bx + c = 0</annotation></semantics></math></span>"#,
    r#"<span class="katex-html" aria-hidden="true">ax2+bx+c=0</span></span> are</p>"#,
    r#"<div class="katex-display"><span class="katex"><span class="katex-mathml"><math><semantics><mrow></mrow>"#,
    r#"<annotation encoding="application/x-tex">x = \frac{-b \pm \sqrt{b^2 - 4ac}}{2a}</annotation>"#,
    r#"</semantics></math></span></span></div>"#,
    r#"<pre><div class="code-header"><span>python</span><button>Copy code</button></div>"#,
    r#"<code class="hljs">import math</code></pre>"#,
    r#"<p>See the discriminant <span data-testid="webpage-citation-pill"><a href="https://example.com">example.com</a></span>.</p>"#,
    r#"</div>"#
);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let html = match env::args().nth(1) {
        Some(path) => match fs::read_to_string(&path) {
            Ok(html) => html,
            Err(e) => {
                eprintln!("failed to read {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => SAMPLE.to_string(),
    };

    println!("=== Markdown ===\n");
    let converter = HtmlToMarkdownConverter::new();
    let markdown = match converter.try_convert(&html) {
        Ok(markdown) => markdown,
        Err(e) => {
            println!("(structured conversion failed: {e}, using plain text)\n");
            converter.parse(&html)
        }
    };
    println!("{markdown}");

    let renderer = MarkdownRenderer::new();
    for (label, mode) in [("full", CodeBlockMode::Full), ("placeholder", CodeBlockMode::Placeholder)] {
        let options = RenderOptions {
            code_block_mode: mode,
            ..RenderOptions::default()
        };
        let outcome = block_on(renderer.render(&markdown, &options));

        println!("=== Preview ({label} code blocks) ===\n");
        match (outcome.html, outcome.error) {
            (Some(html), _) => println!("{html}"),
            (None, Some(code)) => {
                println!("render failed: {code}");
                println!("{}", outcome.fallback.unwrap_or_default());
            }
            (None, None) => println!("(empty)"),
        }
    }

    let health = renderer.circuit_health();
    println!("circuit: {:?}, failures: {}", health.state, health.failures);
    ExitCode::SUCCESS
}
