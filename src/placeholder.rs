//! Placeholder substitution for formulas
//!
//! Formulas are swapped for opaque tokens while the surrounding Markdown is
//! assembled and cleaned up, so that escaping, citation stripping and
//! whitespace rules never touch TeX source. Tokens are built from Unicode
//! private-use code points; the same code points are removed from incoming
//! text, so a page cannot forge a token.

use std::fmt::Write;

use crate::math::MathExpr;

const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';

/// Remove the code points reserved for tokens
pub fn strip_reserved(text: &str) -> String {
    text.chars()
        .filter(|c| *c != TOKEN_OPEN && *c != TOKEN_CLOSE)
        .collect()
}

/// True if `text` contains any token delimiter
pub fn contains_token(text: &str) -> bool {
    text.contains(TOKEN_OPEN)
}

#[derive(Debug, Clone)]
enum Slot {
    /// Formatted inline replacement, e.g. `$x$`
    Inline(String),
    /// Display formula source
    Block(String),
}

/// Token to formula map scoped to one conversion
#[derive(Debug, Default)]
pub struct PlaceholderMap {
    slots: Vec<Slot>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Register an inline replacement and return its token
    pub fn insert_inline(&mut self, formatted: impl Into<String>) -> String {
        self.push(Slot::Inline(formatted.into()))
    }

    /// Register a display formula and return its token
    pub fn insert_block(&mut self, source: impl Into<String>) -> String {
        self.push(Slot::Block(source.into()))
    }

    /// Register a formula by its display mode
    pub fn insert_expr(&mut self, expr: &MathExpr) -> String {
        if expr.display {
            self.insert_block(expr.source.clone())
        } else {
            self.insert_inline(expr.to_markdown())
        }
    }

    fn push(&mut self, slot: Slot) -> String {
        let index = self.slots.len();
        self.slots.push(slot);
        format!("{TOKEN_OPEN}{index}{TOKEN_CLOSE}")
    }

    /// Replace every token in `text`
    ///
    /// A display token alone on its line becomes a flush-left `$$` block with
    /// blank lines around it. A display token sharing a line with other text
    /// is written as `$$expr$$` in place. Unknown tokens are dropped.
    pub fn restore(&self, text: &str) -> String {
        if !contains_token(text) {
            return text.to_string();
        }

        let mut output = String::with_capacity(text.len() + self.slots.len() * 8);
        for line in text.split_inclusive('\n') {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };

            if let Some(Slot::Block(source)) = self.lone_token(body) {
                let _ = write!(output, "\n$$\n{}\n$$\n{}", source, newline);
                continue;
            }

            self.restore_inline(body, &mut output);
            output.push_str(newline);
        }
        output
    }

    fn lone_token(&self, line: &str) -> Option<&Slot> {
        let inner = line
            .trim()
            .strip_prefix(TOKEN_OPEN)?
            .strip_suffix(TOKEN_CLOSE)?;
        let index: usize = inner.parse().ok()?;
        self.slots.get(index)
    }

    fn restore_inline(&self, text: &str, output: &mut String) {
        let mut rest = text;
        while let Some(start) = rest.find(TOKEN_OPEN) {
            output.push_str(&rest[..start]);
            let after = &rest[start + TOKEN_OPEN.len_utf8()..];
            let Some(end) = after.find(TOKEN_CLOSE) else {
                rest = after;
                continue;
            };
            match after[..end].parse::<usize>().ok().and_then(|i| self.slots.get(i)) {
                Some(Slot::Inline(formatted)) => output.push_str(formatted),
                Some(Slot::Block(source)) => {
                    let _ = write!(output, "$${}$$", source.replace('\n', " "));
                }
                None => {}
            }
            rest = &after[end + TOKEN_CLOSE.len_utf8()..];
        }
        output.push_str(rest);
    }
}
