//! Markdown converter - transforms chat-message HTML into portable Markdown
//!
//! The converter parses one message fragment into a private DOM, walks it
//! depth-first and emits Markdown that survives a round trip through any
//! GitHub-flavored renderer with math support.
//!
//! # Conversion Strategy
//!
//! Every element is first checked by the [`SecurityValidator`] (executable
//! elements and UI chrome are dropped with their children), then classified
//! by [`classify`] into a [`NodeRole`]. The walk switches on the role:
//!
//! - **Block math** becomes a placeholder block, restored as a `$$` fence
//! - **Code blocks** become fenced code with a fence longer than any backtick
//!   run in the code
//! - **Tables** become pipe tables with math placeholdered and pipes escaped
//! - **Lists** are rendered recursively with marker-width indentation
//! - **Text containers** collect inline content; display math inside them
//!   splits the container while keeping document order
//! - Everything else is recursed into; block-level wrappers end the current
//!   paragraph
//!
//! # Math
//!
//! Formulas are replaced with opaque tokens from a [`PlaceholderMap`] as soon
//! as they are recognized. The Markdown clean-up pass in [`crate::postprocess`]
//! therefore never sees TeX source; tokens are restored afterwards.
//!
//! # Graceful Degradation
//!
//! [`HtmlToMarkdownConverter::parse`] never fails. Any internal error (for
//! example nesting deeper than the walk bound) degrades the whole fragment to
//! plain-text extraction with an iterative walk.
//!
//! # Examples
//!
//! Input HTML:
//! ```html
//! <p>The area is <span class="katex">...<annotation encoding="application/x-tex">\pi r^2</annotation>...</span>.</p>
//! ```
//!
//! Output Markdown:
//! ```markdown
//! The area is $\pi r^2$.
//! ```

use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};
use tracing::{debug, warn};

use crate::classifier::{NodeRole, classify, is_error_math};
use crate::dom::{attr, collapse_whitespace, element_children, find_descendant, tag_name, text_content};
use crate::error::ConversionError;
use crate::math::{
    MathExpr, TextPiece, error_source, error_source_verbatim, split_delimited, typeset_source,
};
use crate::parser::{fragment_root, parse_html};
use crate::placeholder::{PlaceholderMap, strip_reserved};
use crate::postprocess::{self, CleanupOptions};
use crate::security::{DEFAULT_MAX_DEPTH, SanitizeAction, SecurityValidator};

/// Error-math text a fragment needs before bulk mode is considered
const LONG_FORM_MIN_ERROR_CHARS: usize = 10_000;

/// Result containers with error math a fragment needs before bulk mode is considered
const LONG_FORM_MIN_CONTAINERS: usize = 2;

/// Largest ordered-list number Markdown accepts (nine digits)
const MAX_LIST_NUMBER: i64 = 999_999_999;

/// Longest text accepted as a code-block language label
const MAX_LABEL_LEN: usize = 24;

/// Button captions providers place next to the language label
const UI_LABELS: &[&str] = &["copy", "copy code", "copied", "copied!", "edit", "run", "download"];

/// Elements that end the current paragraph
const BLOCK_TAGS: &[&str] = &[
    "div",
    "section",
    "article",
    "main",
    "header",
    "footer",
    "aside",
    "nav",
    "figure",
    "figcaption",
    "details",
    "summary",
    "dl",
    "dt",
    "dd",
    "li",
    "address",
    "center",
    "fieldset",
];

/// Table column alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableAlignment {
    Left,
    Center,
    Right,
}

/// Conversion options
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Drop provider citation pills and citation markers
    pub strip_citations: bool,

    /// Route error-math-heavy fragments through bulk mode
    pub detect_long_form: bool,

    /// Element nesting the walk accepts before degrading to plain text
    pub max_depth: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            strip_citations: true,
            detect_long_form: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One unit of converted output, in document order
///
/// Block math is carried as a placeholder token so that assembly can keep it
/// on its own blank-line separated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    BlockMath(String),
}

impl ContentBlock {
    fn markdown(&self) -> &str {
        match self {
            ContentBlock::Text(text) => text,
            ContentBlock::BlockMath(token) => token,
        }
    }
}

/// Join blocks with blank lines
fn assemble(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(ContentBlock::markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Accumulates inline text into paragraphs and paragraphs into blocks
///
/// An inline-only builder (table cells, link text) never creates blocks:
/// paragraph breaks become spaces and pipes are optionally escaped.
#[derive(Debug, Default)]
struct BlockBuilder {
    blocks: Vec<ContentBlock>,
    line: String,
    inline_only: bool,
    escape_pipes: bool,
    /// Bumped whenever `line` is flushed into a block
    generation: usize,
}

impl BlockBuilder {
    fn flow() -> Self {
        Self::default()
    }

    fn inline(escape_pipes: bool) -> Self {
        Self {
            inline_only: true,
            escape_pipes,
            ..Self::default()
        }
    }

    fn push_space(&mut self) {
        if !self.line.is_empty() && !self.line.ends_with(|c: char| c == ' ' || c == '\n') {
            self.line.push(' ');
        }
    }

    /// Append a text node, collapsing whitespace but keeping word boundaries
    fn push_text(&mut self, text: &str) {
        let normalized = collapse_whitespace(text);
        if normalized.is_empty() {
            if !text.is_empty() {
                self.push_space();
            }
            return;
        }

        if text.starts_with(char::is_whitespace) {
            self.push_space();
        }
        if self.escape_pipes {
            self.line.push_str(&normalized.replace('|', "\\|"));
        } else {
            self.line.push_str(&normalized);
        }
        if text.ends_with(char::is_whitespace) {
            self.line.push(' ');
        }
    }

    fn trim_trailing_space(&mut self) {
        let kept = self.line.trim_end_matches(' ').len();
        self.line.truncate(kept);
    }

    /// Append pre-formatted inline Markdown verbatim
    fn push_atom(&mut self, markdown: &str) {
        self.line.push_str(markdown);
    }

    fn line_break(&mut self) {
        if self.inline_only {
            self.push_space();
        } else if !self.line.trim().is_empty() {
            let trimmed = self.line.trim_end().len();
            self.line.truncate(trimmed);
            self.line.push('\n');
        }
    }

    fn end_paragraph(&mut self) {
        if self.inline_only {
            self.push_space();
            return;
        }

        let text = self.line.trim();
        if !text.is_empty() {
            self.blocks.push(ContentBlock::Text(text.to_string()));
        }
        self.line.clear();
        self.generation += 1;
    }

    fn push_block(&mut self, block: ContentBlock) {
        if self.inline_only {
            self.push_space();
            let text = block.markdown().replace('\n', " ");
            self.line.push_str(&text);
            return;
        }

        self.end_paragraph();
        self.blocks.push(block);
    }

    /// Flush the open paragraph and hand over every block collected so far
    fn take_blocks(&mut self) -> Vec<ContentBlock> {
        self.end_paragraph();
        std::mem::take(&mut self.blocks)
    }

    fn finish(mut self) -> Vec<ContentBlock> {
        self.take_blocks()
    }

    /// Single-line content of an inline-only builder
    fn into_inline(self) -> String {
        collapse_whitespace(&self.line)
    }
}

/// Chat-message HTML to Markdown converter
///
/// # Examples
///
/// ```rust
/// use chat_markdown_bridge::converter::HtmlToMarkdownConverter;
///
/// let converter = HtmlToMarkdownConverter::new();
/// let markdown = converter.parse("<h1>Hello World</h1><p>This is a <b>test</b>.</p>");
/// assert_eq!(markdown, "# Hello World\n\nThis is a **test**.\n");
/// ```
#[derive(Debug, Clone)]
pub struct HtmlToMarkdownConverter {
    options: ConversionOptions,
    security_validator: SecurityValidator,
}

impl HtmlToMarkdownConverter {
    /// Create a new converter with default options
    pub fn new() -> Self {
        Self::with_options(ConversionOptions::default())
    }

    /// Create a new converter with custom options
    pub fn with_options(options: ConversionOptions) -> Self {
        let security_validator = SecurityValidator::with_max_depth(options.max_depth);
        Self {
            options,
            security_validator,
        }
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Convert one message fragment to Markdown
    ///
    /// Never fails: empty or whitespace-only input yields an empty string and
    /// internal errors degrade to plain-text extraction.
    pub fn parse(&self, html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        let html = strip_reserved(html);
        match self.try_convert(&html) {
            Ok(markdown) => markdown,
            Err(err) => {
                warn!(error = %err, "Conversion degraded to plain text extraction");
                self.plain_text(&html)
            }
        }
    }

    /// Convert, reporting internal errors instead of degrading
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::NestingTooDeep` when the fragment nests
    /// deeper than `max_depth`, and `ConversionError::InvalidInput` for empty
    /// input.
    pub fn try_convert(&self, html: &str) -> Result<String, ConversionError> {
        let dom = parse_html(html)?;
        let root = fragment_root(&dom);

        let bulk = self.options.detect_long_form && is_long_form(&root);
        if bulk {
            debug!("Long-form fragment detected, converting in bulk mode");
        }

        let mut walker = Walker {
            converter: self,
            placeholders: PlaceholderMap::new(),
            bulk,
        };
        let mut builder = BlockBuilder::flow();
        walker.walk_children(&root, &mut builder, 0)?;
        let blocks = builder.finish();

        debug!(
            blocks = blocks.len(),
            formulas = walker.placeholders.len(),
            "Assembled Markdown blocks"
        );

        let markdown = assemble(&blocks);
        let cleaned = postprocess::clean(
            &markdown,
            &CleanupOptions {
                strip_citations: self.options.strip_citations,
            },
        );
        let restored = walker.placeholders.restore(&cleaned);
        Ok(postprocess::finalize(&restored))
    }

    /// Iterative plain-text extraction used when the structured walk fails
    fn plain_text(&self, html: &str) -> String {
        enum Step {
            Visit(Handle),
            Break,
        }

        let Ok(dom) = parse_html(html) else {
            return String::new();
        };

        let mut output = String::new();
        let mut stack = vec![Step::Visit(fragment_root(&dom))];
        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Break => {
                    output.push('\n');
                    continue;
                }
                Step::Visit(node) => node,
            };

            match node.data {
                NodeData::Text { ref contents } => {
                    let text = collapse_whitespace(&contents.borrow());
                    if !text.is_empty() {
                        if !output.is_empty() && !output.ends_with(|c: char| c == ' ' || c == '\n') {
                            output.push(' ');
                        }
                        output.push_str(&text);
                    }
                }
                NodeData::Element { ref name, .. } => {
                    let tag = name.local.as_ref();
                    if self.security_validator.check_element(tag) != SanitizeAction::Allow {
                        continue;
                    }
                    let is_block = BLOCK_TAGS.contains(&tag)
                        || matches!(tag, "p" | "br" | "pre" | "tr" | "blockquote" | "ul" | "ol")
                        || (tag.len() == 2 && tag.starts_with('h'));
                    if is_block {
                        output.push('\n');
                        stack.push(Step::Break);
                    }
                    stack.extend(node.children.borrow().iter().rev().cloned().map(Step::Visit));
                }
                NodeData::Document => {
                    stack.extend(node.children.borrow().iter().rev().cloned().map(Step::Visit));
                }
                _ => {}
            }
        }

        let lines: Vec<&str> = output.lines().map(str::trim).collect();
        postprocess::finalize(&lines.join("\n"))
    }
}

impl Default for HtmlToMarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one conversion call
struct Walker<'a> {
    converter: &'a HtmlToMarkdownConverter,
    placeholders: PlaceholderMap,
    /// Long-form mode: error-math bodies keep their original line layout
    bulk: bool,
}

impl Walker<'_> {
    fn walk_children(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        for child in node.children.borrow().iter() {
            self.walk_node(child, builder, depth)?;
        }
        Ok(())
    }

    fn walk_node(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        match node.data {
            NodeData::Document => self.walk_children(node, builder, depth),
            NodeData::Element { .. } => self.walk_element(node, builder, depth),
            NodeData::Text { ref contents } => {
                let text = contents.borrow();
                self.push_text_node(&text, builder);
                Ok(())
            }
            // Comments, doctypes and processing instructions carry no content
            _ => Ok(()),
        }
    }

    fn walk_element(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        let Some(tag) = tag_name(node) else {
            return Ok(());
        };

        let security = &self.converter.security_validator;
        security.validate_depth(depth)?;
        match security.check_element(tag) {
            SanitizeAction::Remove | SanitizeAction::SkipChrome => return Ok(()),
            SanitizeAction::Allow => {}
        }

        if self.converter.options.strip_citations && is_citation_pill(node) {
            builder.trim_trailing_space();
            return Ok(());
        }

        match classify(node) {
            NodeRole::BlockMath => self.handle_typeset_math(node, true, builder),
            NodeRole::InlineMath => self.handle_typeset_math(node, false, builder),
            NodeRole::ErrorMath => self.handle_error_math(node, builder),
            NodeRole::CodeBlock => {
                self.handle_code_block(node, builder);
                Ok(())
            }
            NodeRole::Table => self.handle_table(node, builder, depth),
            NodeRole::List => self.handle_list(node, builder, depth),
            NodeRole::TextContainer => self.handle_text_container(node, tag, builder, depth),
            NodeRole::Opaque => self.handle_opaque(node, tag, builder, depth),
        }
    }

    fn push_text_node(&mut self, text: &str, builder: &mut BlockBuilder) {
        if !text.contains('\\') {
            builder.push_text(text);
            return;
        }

        for piece in split_delimited(text) {
            match piece {
                TextPiece::Text(text) => builder.push_text(text),
                TextPiece::Math(expr) => self.push_math(expr, builder),
            }
        }
    }

    /// Emit a formula through the placeholder map
    fn push_math(&mut self, expr: MathExpr, builder: &mut BlockBuilder) {
        if expr.display && !builder.inline_only {
            let token = self.placeholders.insert_block(expr.source);
            builder.push_block(ContentBlock::BlockMath(token));
            return;
        }

        let formatted = if expr.display {
            format!("$${}$$", expr.source.replace('\n', " "))
        } else {
            expr.to_markdown()
        };
        let formatted = if builder.escape_pipes {
            formatted.replace('|', "\\|")
        } else {
            formatted
        };
        let token = self.placeholders.insert_inline(formatted);
        builder.push_atom(&token);
    }

    fn handle_typeset_math(
        &mut self,
        node: &Handle,
        display: bool,
        builder: &mut BlockBuilder,
    ) -> Result<(), ConversionError> {
        match typeset_source(node, display) {
            Some(expr) => self.push_math(expr, builder),
            None => builder.push_text(&text_content(node)),
        }
        Ok(())
    }

    fn handle_error_math(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
    ) -> Result<(), ConversionError> {
        let raw = text_content(node);
        if raw.trim().is_empty() {
            return Ok(());
        }

        let expr = if self.bulk {
            error_source_verbatim(&raw)
        } else {
            error_source(&raw)
        };
        self.push_math(expr, builder);
        Ok(())
    }

    fn handle_text_container(
        &mut self,
        node: &Handle,
        tag: &str,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        if builder.inline_only {
            builder.end_paragraph();
            self.walk_children(node, builder, depth + 1)?;
            builder.end_paragraph();
            return Ok(());
        }

        match tag {
            "blockquote" => self.handle_blockquote(node, builder, depth),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                self.handle_heading(node, level, builder, depth)
            }
            _ => {
                builder.end_paragraph();
                self.walk_children(node, builder, depth + 1)?;
                builder.end_paragraph();
                Ok(())
            }
        }
    }

    /// ATX heading; display math inside the heading follows it as its own block
    fn handle_heading(
        &mut self,
        node: &Handle,
        level: usize,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        let mut inner = BlockBuilder::flow();
        self.walk_children(node, &mut inner, depth + 1)?;

        let mut prefixed = false;
        for block in inner.finish() {
            match block {
                ContentBlock::Text(text) if !prefixed => {
                    prefixed = true;
                    let heading = format!("{} {}", "#".repeat(level), collapse_whitespace(&text));
                    builder.push_block(ContentBlock::Text(heading));
                }
                other => builder.push_block(other),
            }
        }
        Ok(())
    }

    fn handle_blockquote(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        let mut inner = BlockBuilder::flow();
        self.walk_children(node, &mut inner, depth + 1)?;
        let body = assemble(&inner.finish());
        if body.is_empty() {
            return Ok(());
        }

        let quoted = body
            .lines()
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        builder.push_block(ContentBlock::Text(quoted));
        Ok(())
    }

    fn handle_opaque(
        &mut self,
        node: &Handle,
        tag: &str,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        match tag {
            "strong" | "b" => self.wrap_inline(node, "**", builder, depth),
            "em" | "i" => self.wrap_inline(node, "*", builder, depth),
            "del" | "s" | "strike" => self.wrap_inline(node, "~~", builder, depth),
            "code" | "kbd" | "samp" => {
                self.handle_inline_code(node, builder);
                Ok(())
            }
            "a" => self.handle_link(node, builder, depth),
            "img" => {
                self.handle_image(node, builder);
                Ok(())
            }
            "br" => {
                builder.line_break();
                Ok(())
            }
            "hr" => {
                builder.push_block(ContentBlock::Text("---".to_string()));
                Ok(())
            }
            _ if BLOCK_TAGS.contains(&tag) => {
                builder.end_paragraph();
                self.walk_children(node, builder, depth + 1)?;
                builder.end_paragraph();
                Ok(())
            }
            _ => self.walk_children(node, builder, depth + 1),
        }
    }

    /// Surround inline content with `marker`, moving edge whitespace outside
    ///
    /// Empty content emits nothing. If a block boundary occurred inside the
    /// element the content is left unwrapped.
    fn wrap_inline(
        &mut self,
        node: &Handle,
        marker: &str,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        let start = builder.line.len();
        let generation = builder.generation;
        self.walk_children(node, builder, depth + 1)?;
        if builder.generation != generation || builder.line.len() < start {
            return Ok(());
        }

        let inner = builder.line.split_off(start);
        let trimmed = inner.trim();
        if trimmed.is_empty() {
            if !inner.is_empty() {
                builder.push_space();
            }
            return Ok(());
        }

        if inner.starts_with(char::is_whitespace) {
            builder.push_space();
        }
        builder.line.push_str(marker);
        builder.line.push_str(trimmed);
        builder.line.push_str(marker);
        if inner.ends_with(char::is_whitespace) {
            builder.line.push(' ');
        }
        Ok(())
    }

    /// Inline code span with a fence longer than any backtick run inside
    fn handle_inline_code(&mut self, node: &Handle, builder: &mut BlockBuilder) {
        let code = text_content(node).replace('\n', " ");
        if code.trim().is_empty() {
            return;
        }

        let code = if builder.escape_pipes {
            code.replace('|', "\\|")
        } else {
            code
        };
        let fence = "`".repeat(longest_backtick_run(&code) + 1);
        let pad = if code.starts_with('`') || code.ends_with('`') {
            " "
        } else {
            ""
        };
        builder.push_atom(&format!("{fence}{pad}{code}{pad}{fence}"));
    }

    /// `[text](url)`; dangerous targets are demoted to their text
    fn handle_link(
        &mut self,
        node: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        let mut inner = BlockBuilder::inline(builder.escape_pipes);
        self.walk_children(node, &mut inner, depth + 1)?;
        let text = inner.into_inline();
        if text.is_empty() {
            return Ok(());
        }

        let href = attr(node, "href");
        let safe_url = href
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .and_then(|url| self.converter.security_validator.sanitize_url(url));

        match safe_url {
            Some(url) => {
                builder.push_atom(&format!("[{}]({})", text, format_destination(url)));
            }
            None => builder.push_atom(&text),
        }
        Ok(())
    }

    /// `![alt](src)`; images with missing or dangerous sources are skipped
    fn handle_image(&mut self, node: &Handle, builder: &mut BlockBuilder) {
        let Some(src) = attr(node, "src") else {
            return;
        };
        let Some(safe_src) = self.converter.security_validator.sanitize_url(src.trim()) else {
            return;
        };
        if safe_src.is_empty() {
            return;
        }

        let alt = collapse_whitespace(&attr(node, "alt").unwrap_or_default())
            .replace('[', "\\[")
            .replace(']', "\\]");
        builder.push_atom(&format!("![{}]({})", alt, format_destination(safe_src)));
    }

    fn handle_code_block(&mut self, node: &Handle, builder: &mut BlockBuilder) {
        let pre = if tag_name(node) == Some("pre") {
            node.clone()
        } else {
            match find_descendant(node, |n| tag_name(n) == Some("pre")) {
                Some(pre) => pre,
                None => node.clone(),
            }
        };
        let code_element = find_descendant(&pre, |n| tag_name(n) == Some("code"));
        let source = code_element.as_ref().unwrap_or(&pre);
        let code = text_content(source);
        let code = code.trim_end_matches(['\n', '\r']);

        if builder.inline_only {
            if !code.trim().is_empty() {
                let fence = "`".repeat(longest_backtick_run(code) + 1);
                let code = collapse_whitespace(code);
                let code = if builder.escape_pipes {
                    code.replace('|', "\\|")
                } else {
                    code
                };
                builder.push_atom(&format!("{fence} {code} {fence}"));
            }
            return;
        }

        let language = code_language(node, &pre, code_element.as_ref());
        let fence = "`".repeat(longest_backtick_run(code).max(2) + 1);
        builder.push_block(ContentBlock::Text(format!(
            "{fence}{language}\n{code}\n{fence}"
        )));
    }

    fn handle_table(
        &mut self,
        table: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        if builder.inline_only {
            return self.walk_children(table, builder, depth + 1);
        }

        let mut header: Option<Vec<(String, TableAlignment)>> = None;
        let mut rows: Vec<Vec<(String, TableAlignment)>> = Vec::new();

        for section in element_children(table) {
            match tag_name(&section) {
                Some("thead") => {
                    for tr in table_rows(&section) {
                        let cells = self.table_row(&tr, depth + 2)?;
                        if header.is_none() {
                            header = Some(cells);
                        } else {
                            rows.push(cells);
                        }
                    }
                }
                Some("tbody") | Some("tfoot") => {
                    for tr in table_rows(&section) {
                        rows.push(self.table_row(&tr, depth + 2)?);
                    }
                }
                Some("tr") => rows.push(self.table_row(&section, depth + 1)?),
                _ => {}
            }
        }

        // First row doubles as header when there is no thead
        let header = match header {
            Some(header) => header,
            None if rows.is_empty() => return Ok(()),
            None => rows.remove(0),
        };

        let columns = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return Ok(());
        }

        builder.push_block(ContentBlock::Text(write_gfm_table(&header, &rows, columns)));
        Ok(())
    }

    fn table_row(
        &mut self,
        tr: &Handle,
        depth: usize,
    ) -> Result<Vec<(String, TableAlignment)>, ConversionError> {
        let mut cells = Vec::new();
        for cell in element_children(tr) {
            if !matches!(tag_name(&cell), Some("td") | Some("th")) {
                continue;
            }
            let mut inner = BlockBuilder::inline(true);
            self.walk_children(&cell, &mut inner, depth + 1)?;
            cells.push((inner.into_inline(), extract_alignment(&cell)));
        }
        Ok(cells)
    }

    fn handle_list(
        &mut self,
        list: &Handle,
        builder: &mut BlockBuilder,
        depth: usize,
    ) -> Result<(), ConversionError> {
        if builder.inline_only {
            return self.walk_children(list, builder, depth + 1);
        }

        let markdown = self.render_list(list, depth)?;
        if !markdown.is_empty() {
            builder.push_block(ContentBlock::Text(markdown));
        }
        Ok(())
    }

    /// Render a list at column zero; the caller indents nested lists
    fn render_list(&mut self, list: &Handle, depth: usize) -> Result<String, ConversionError> {
        self.converter.security_validator.validate_depth(depth)?;

        let ordered = tag_name(list) == Some("ol");
        let mut number = attr(list, "start")
            .and_then(|start| start.trim().parse::<i64>().ok())
            .map_or(1, |start| start.clamp(0, MAX_LIST_NUMBER));

        let mut items = Vec::new();
        for child in element_children(list) {
            match tag_name(&child) {
                Some("li") => {
                    let marker = if ordered {
                        format!("{number}. ")
                    } else {
                        "- ".to_string()
                    };
                    number = (number + 1).min(MAX_LIST_NUMBER);
                    items.push(self.render_list_item(&child, &marker, depth + 1)?);
                }
                // A list directly inside a list nests under the previous item
                Some("ul") | Some("ol") => {
                    let nested = self.render_list(&child, depth + 1)?;
                    if !nested.is_empty() {
                        items.push(indent_lines(&nested, 2));
                    }
                }
                _ => {}
            }
        }

        Ok(items.join("\n"))
    }

    fn render_list_item(
        &mut self,
        item: &Handle,
        marker: &str,
        depth: usize,
    ) -> Result<String, ConversionError> {
        // (markdown, is_nested_list)
        let mut parts: Vec<(String, bool)> = Vec::new();
        let mut builder = BlockBuilder::flow();

        for child in item.children.borrow().iter() {
            let is_nested_list = tag_name(child).is_some()
                && classify(child) == NodeRole::List
                && self
                    .converter
                    .security_validator
                    .check_element(tag_name(child).unwrap_or_default())
                    == SanitizeAction::Allow;

            if is_nested_list {
                for block in builder.take_blocks() {
                    parts.push((block.markdown().to_string(), false));
                }
                let nested = self.render_list(child, depth + 1)?;
                if !nested.is_empty() {
                    parts.push((nested, true));
                }
            } else {
                self.walk_node(child, &mut builder, depth + 1)?;
            }
        }
        for block in builder.finish() {
            parts.push((block.markdown().to_string(), false));
        }

        let indent = " ".repeat(marker.len());
        let mut output = String::new();
        if parts.first().is_none_or(|(_, nested)| *nested) {
            output.push_str(marker.trim_end());
        }

        for (index, (markdown, nested)) in parts.iter().enumerate() {
            if index == 0 && !nested {
                output.push_str(marker);
            } else {
                output.push_str(if *nested { "\n" } else { "\n\n" });
            }

            for (line_index, line) in markdown.lines().enumerate() {
                if line_index > 0 {
                    output.push('\n');
                }
                let first_line_of_item = index == 0 && line_index == 0 && !nested;
                if !first_line_of_item && !line.is_empty() {
                    output.push_str(&indent);
                }
                output.push_str(line);
            }
        }

        Ok(output)
    }
}

/// Provider citation pills (source chips next to sentences)
fn is_citation_pill(node: &Handle) -> bool {
    ["class", "data-testid"].iter().any(|name| {
        attr(node, name).is_some_and(|value| value.to_ascii_lowercase().contains("citation"))
    })
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Wrap link destinations containing spaces or parentheses in angle brackets
fn format_destination(url: &str) -> String {
    if url.contains([' ', '(', ')']) {
        format!("<{}>", url.replace('<', "%3C").replace('>', "%3E"))
    } else {
        url.to_string()
    }
}

fn indent_lines(text: &str, width: usize) -> String {
    let indent = " ".repeat(width);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Language of a code block from classes, `data-language` or a UI label
fn code_language(wrapper: &Handle, pre: &Handle, code: Option<&Handle>) -> String {
    let mut candidates: Vec<&Handle> = Vec::new();
    if let Some(code) = code {
        candidates.push(code);
    }
    candidates.push(pre);
    candidates.push(wrapper);

    for node in &candidates {
        if let Some(classes) = attr(node, "class") {
            for class in classes.split_whitespace() {
                if let Some(lang) = class
                    .strip_prefix("language-")
                    .or_else(|| class.strip_prefix("lang-"))
                {
                    if !lang.is_empty() {
                        return clean_language(lang);
                    }
                }
            }
        }
    }

    for node in &candidates {
        if let Some(lang) = attr(node, "data-language") {
            let lang = clean_language(&lang);
            if !lang.is_empty() {
                return lang;
            }
        }
    }

    // The label sits outside the code text; without a separate code element it cannot be told apart
    let skip = match code {
        Some(code) => code.clone(),
        None if !Rc::ptr_eq(wrapper, pre) => pre.clone(),
        None => return String::new(),
    };
    ui_label(wrapper, &skip).unwrap_or_default()
}

/// First short text in `root` outside `skip` and buttons
fn ui_label(root: &Handle, skip: &Handle) -> Option<String> {
    let mut stack: Vec<Handle> = root.children.borrow().iter().rev().cloned().collect();
    while let Some(node) = stack.pop() {
        if Rc::ptr_eq(&node, skip) {
            continue;
        }
        match node.data {
            NodeData::Text { ref contents } => {
                let text = collapse_whitespace(&contents.borrow());
                if text.is_empty() {
                    continue;
                }
                let lower = text.to_lowercase();
                if text.len() <= MAX_LABEL_LEN
                    && !text.contains(' ')
                    && !UI_LABELS.contains(&lower.as_str())
                {
                    let lang = clean_language(&lower);
                    if !lang.is_empty() {
                        return Some(lang);
                    }
                }
            }
            NodeData::Element { ref name, .. } => {
                if matches!(name.local.as_ref(), "button" | "svg") {
                    continue;
                }
                stack.extend(node.children.borrow().iter().rev().cloned());
            }
            _ => {}
        }
    }
    None
}

fn clean_language(lang: &str) -> String {
    lang.trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
        .collect()
}

fn table_rows(section: &Handle) -> Vec<Handle> {
    element_children(section)
        .into_iter()
        .filter(|child| tag_name(child) == Some("tr"))
        .collect()
}

/// Alignment from the `align` attribute or an inline `text-align` style
fn extract_alignment(cell: &Handle) -> TableAlignment {
    if let Some(align) = attr(cell, "align") {
        return match align.to_lowercase().as_str() {
            "center" => TableAlignment::Center,
            "right" => TableAlignment::Right,
            _ => TableAlignment::Left,
        };
    }

    if let Some(style) = attr(cell, "style") {
        let style = style.to_lowercase();
        if style.contains("text-align") {
            if style.contains("center") {
                return TableAlignment::Center;
            } else if style.contains("right") {
                return TableAlignment::Right;
            }
        }
    }

    TableAlignment::Left
}

fn write_gfm_table(
    header: &[(String, TableAlignment)],
    rows: &[Vec<(String, TableAlignment)>],
    columns: usize,
) -> String {
    let mut output = String::new();

    let write_row = |output: &mut String, cells: &[(String, TableAlignment)]| {
        output.push('|');
        for index in 0..columns {
            let text = cells.get(index).map(|(text, _)| text.as_str()).unwrap_or("");
            output.push(' ');
            output.push_str(text);
            output.push_str(" |");
        }
    };

    write_row(&mut output, header);
    output.push('\n');

    output.push('|');
    for index in 0..columns {
        let alignment = header
            .get(index)
            .map(|(_, alignment)| *alignment)
            .unwrap_or(TableAlignment::Left);
        output.push(' ');
        output.push_str(match alignment {
            TableAlignment::Left => "---",
            TableAlignment::Center => ":---:",
            TableAlignment::Right => "---:",
        });
        output.push_str(" |");
    }

    for row in rows {
        output.push('\n');
        write_row(&mut output, row);
    }

    output
}

/// Descend through single-child wrappers to the level holding result containers
fn result_level(root: &Handle) -> Handle {
    let mut current = root.clone();
    loop {
        let children = element_children(&current);
        let has_own_text = current.children.borrow().iter().any(|child| {
            matches!(child.data, NodeData::Text { ref contents } if !contents.borrow().trim().is_empty())
        });
        match children.as_slice() {
            [only] if !has_own_text => current = only.clone(),
            _ => return current,
        }
    }
}

/// Characters of failed-typeset math under `node`
fn error_math_chars(node: &Handle) -> usize {
    let mut total = 0;
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        if tag_name(&current).is_some_and(|tag| is_error_math(&current, tag)) {
            total += text_content(&current).chars().count();
            continue;
        }
        stack.extend(current.children.borrow().iter().cloned());
    }
    total
}

/// True for fragments dominated by failed-typeset math spread over several results
fn is_long_form(root: &Handle) -> bool {
    let level = result_level(root);
    let mut containers_with_errors = 0;
    let mut error_chars = 0;
    for container in element_children(&level) {
        let chars = error_math_chars(&container);
        if chars > 0 {
            containers_with_errors += 1;
            error_chars += chars;
        }
    }

    if containers_with_errors < LONG_FORM_MIN_CONTAINERS || error_chars < LONG_FORM_MIN_ERROR_CHARS {
        return false;
    }

    let total_chars = text_content(root).chars().count();
    error_chars * 2 >= total_chars
}
