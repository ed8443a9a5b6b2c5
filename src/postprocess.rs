//! Markdown clean-up applied after assembly
//!
//! [`clean`] runs while formulas are still placeholders: it normalizes line
//! endings and list indentation, trims trailing whitespace and strips
//! provider citation markers. [`finalize`] runs last and fixes blank lines.
//! Both leave fenced code untouched.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Clean-up options
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub strip_citations: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            strip_citations: true,
        }
    }
}

/// Tracks fenced code blocks line by line
#[derive(Debug, Default)]
struct FenceTracker {
    open: Option<(char, usize)>,
}

impl FenceTracker {
    /// Feed one line; returns true if the line is part of a fence, delimiters included
    fn observe(&mut self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let fence = fence_run(trimmed);
        match (self.open, fence) {
            (None, Some(run)) => {
                self.open = Some(run);
                true
            }
            (Some((ch, len)), Some((run_ch, run_len)))
                if ch == run_ch && run_len >= len && trimmed[run_ch.len_utf8() * run_len..].trim().is_empty() =>
            {
                self.open = None;
                true
            }
            (Some(_), _) => true,
            (None, None) => false,
        }
    }
}

/// Fence character and run length at the start of `line`
fn fence_run(line: &str) -> Option<(char, usize)> {
    let ch = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

/// Normalize freshly assembled Markdown
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::postprocess::{clean, CleanupOptions};
///
/// let md = clean("Fact [1].\r\n\r\n\r\n\r\nNext  \r\n", &CleanupOptions::default());
/// assert_eq!(md, "Fact.\n\nNext\n");
/// ```
pub fn clean(markdown: &str, options: &CleanupOptions) -> String {
    let normalized = markdown.replace("\r\n", "\n").replace('\r', "\n");
    let indented = normalize_list_indentation(&normalized);

    let mut fences = FenceTracker::default();
    let mut lines = Vec::new();
    for line in indented.lines() {
        if fences.observe(line) {
            lines.push(line.to_string());
            continue;
        }

        let line = line.trim_end();
        if options.strip_citations {
            if is_bare_domain_line(line) {
                continue;
            }
            lines.push(strip_citation_markers(line));
        } else {
            lines.push(line.to_string());
        }
    }

    finalize(&lines.join("\n"))
}

/// Collapse blank-line runs, separate headings and end with one newline
///
/// Empty input stays empty.
pub fn finalize(markdown: &str) -> String {
    let mut fences = FenceTracker::default();
    let mut output: Vec<&str> = Vec::new();
    let mut previous_blank = true;

    for line in markdown.lines() {
        if fences.observe(line) {
            output.push(line);
            previous_blank = false;
            continue;
        }

        let line = line.trim_end();
        if line.is_empty() {
            if !previous_blank {
                output.push("");
            }
            previous_blank = true;
            continue;
        }

        if is_heading(line) && !previous_blank {
            output.push("");
        }
        output.push(line);
        previous_blank = false;
    }

    while output.last().is_some_and(|line| line.is_empty()) {
        output.pop();
    }
    if output.is_empty() {
        return String::new();
    }

    let mut result = output.join("\n");
    result.push('\n');
    result
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Width of the list marker at the start of `trimmed`, including its trailing space
fn list_marker_width(trimmed: &str) -> Option<usize> {
    let mut chars = trimmed.chars();
    match chars.next()? {
        '-' | '*' | '+' => chars.next().filter(|c| *c == ' ').map(|_| 2),
        c if c.is_ascii_digit() => {
            let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
            if digits > 9 {
                return None;
            }
            let rest = &trimmed[digits..];
            (rest.starts_with(". ") || rest.starts_with(") ")).then_some(digits + 2)
        }
        _ => None,
    }
}

fn leading_spaces(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// One open list item: where it sat in the input and where its content goes in the output
#[derive(Debug, Clone, Copy)]
struct OpenItem {
    source_indent: usize,
    content_indent: usize,
}

/// Re-indent list items by their parent's marker width
///
/// Items deeper than their parent nest under it; continuation lines follow
/// the innermost open item. Outside lists, indentation of four or more
/// spaces would turn prose into a code block and is removed.
fn normalize_list_indentation(markdown: &str) -> String {
    let mut stack: Vec<OpenItem> = Vec::new();
    let mut fences = FenceTracker::default();
    let mut fence_shift: isize = 0;
    let mut previous_blank = false;
    let mut output = Vec::new();

    for line in markdown.lines() {
        let in_fence_before = fences.open.is_some();
        if fences.observe(line) {
            if !in_fence_before {
                // Opening fence: place it like a continuation line
                let indent = leading_spaces(line);
                let target = continuation_target(&mut stack, indent, previous_blank);
                fence_shift = target as isize - indent as isize;
            }
            output.push(shift_line(line, fence_shift));
            previous_blank = false;
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            output.push(String::new());
            previous_blank = true;
            continue;
        }

        let indent = leading_spaces(line);
        if let Some(width) = list_marker_width(trimmed) {
            while stack.last().is_some_and(|item| indent < item.source_indent + 2) {
                stack.pop();
            }
            let out_indent = stack.last().map_or(0, |item| item.content_indent);
            stack.push(OpenItem {
                source_indent: indent,
                content_indent: out_indent + width,
            });
            output.push(format!("{}{}", " ".repeat(out_indent), trimmed));
        } else {
            let target = continuation_target(&mut stack, indent, previous_blank);
            output.push(format!("{}{}", " ".repeat(target), trimmed));
        }
        previous_blank = false;
    }

    output.join("\n")
}

/// Output indent for a non-item line; closes the list when the line leaves it
fn continuation_target(stack: &mut Vec<OpenItem>, indent: usize, previous_blank: bool) -> usize {
    if stack.is_empty() {
        return if indent >= 4 { 0 } else { indent };
    }

    if indent == 0 {
        if previous_blank {
            stack.clear();
        }
        return 0;
    }

    while stack.len() > 1 && stack.last().is_some_and(|item| item.source_indent >= indent) {
        stack.pop();
    }
    stack.last().map_or(0, |item| item.content_indent)
}

fn shift_line(line: &str, shift: isize) -> String {
    if shift >= 0 {
        format!("{}{}", " ".repeat(shift as usize), line)
    } else {
        let removable = leading_spaces(line).min(shift.unsigned_abs());
        let cut = line
            .char_indices()
            .nth(removable)
            .map_or(line.len(), |(index, _)| index);
        line[cut..].to_string()
    }
}

/// A line holding nothing but a source domain, optionally with a `+N` count
fn is_bare_domain_line(line: &str) -> bool {
    static DOMAIN: OnceLock<Option<Regex>> = OnceLock::new();
    DOMAIN
        .get_or_init(|| {
            Regex::new(r"(?i)^\s*(?:www\.)?(?:[a-z0-9-]+\.)+[a-z]{2,24}(?:\s*\+\d+)?\s*$").ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(line))
}

/// Remove `【…】` markers and numeric `[n]` markers outside inline code
///
/// `[n](` and `[n]:` are link syntax and kept.
fn strip_citation_markers(line: &str) -> String {
    static BRACKETED: OnceLock<Option<Regex>> = OnceLock::new();
    static NUMERIC: OnceLock<Option<Regex>> = OnceLock::new();

    if !line.contains('【') && !line.contains('[') {
        return line.to_string();
    }

    let bracketed = BRACKETED
        .get_or_init(|| Regex::new(r"[ \t]*【[^】]*】").ok())
        .as_ref();
    let numeric = NUMERIC
        .get_or_init(|| Regex::new(r"[ \t]*\[\d{1,3}\]([(:]?)").ok())
        .as_ref();

    // Even segments lie outside backtick code spans
    line.split('`')
        .enumerate()
        .map(|(index, segment)| {
            if index % 2 == 1 {
                return segment.to_string();
            }
            let mut segment = segment.to_string();
            if let Some(re) = bracketed {
                segment = re.replace_all(&segment, "").into_owned();
            }
            if let Some(re) = numeric {
                segment = re
                    .replace_all(&segment, |caps: &Captures| {
                        let follows_link = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
                        if follows_link {
                            caps.get(0).map_or(String::new(), |m| m.as_str().to_string())
                        } else {
                            String::new()
                        }
                    })
                    .into_owned();
            }
            segment
        })
        .collect::<Vec<_>>()
        .join("`")
}
