//! Block-boundary splitting of large Markdown documents
//!
//! Rendering proceeds chunk by chunk so that a time budget can be checked and
//! progress reported between chunks. A cut never falls inside fenced code or
//! a `$$` math block.

/// Split `markdown` into chunks of at most `max_chunk` bytes where possible
///
/// Cuts prefer the last blank line outside fences and `$$` blocks. Without
/// one the cut falls at the last line boundary outside them; a single
/// unsplittable block longer than `max_chunk` is kept whole. Concatenating
/// the chunks yields the input.
///
/// # Examples
///
/// ```
/// use chat_markdown_bridge::chunker::split_chunks;
///
/// let md = "para one\n\npara two\n\npara three\n";
/// let chunks = split_chunks(md, 12);
/// assert_eq!(chunks, vec!["para one\n\n", "para two\n\n", "para three\n"]);
/// assert_eq!(chunks.concat(), md);
/// ```
pub fn split_chunks(markdown: &str, max_chunk: usize) -> Vec<&str> {
    if markdown.is_empty() {
        return Vec::new();
    }
    if max_chunk == 0 || markdown.len() <= max_chunk {
        return vec![markdown];
    }

    let boundaries = safe_boundaries(markdown);
    let mut chunks = Vec::new();
    let mut start = 0;

    while markdown.len() - start > max_chunk {
        let limit = start + max_chunk;
        let within = |b: &&Boundary| b.offset > start && b.offset <= limit;

        let cut = boundaries
            .iter()
            .filter(within)
            .filter(|b| b.blank)
            .next_back()
            .or_else(|| boundaries.iter().filter(within).next_back())
            .or_else(|| boundaries.iter().find(|b| b.offset > limit))
            .map(|b| b.offset);

        match cut {
            Some(offset) => {
                chunks.push(&markdown[start..offset]);
                start = offset;
            }
            None => break,
        }
    }

    if start < markdown.len() {
        chunks.push(&markdown[start..]);
    }
    chunks
}

/// Byte offset just past a newline where a chunk may end
#[derive(Debug, Clone, Copy)]
struct Boundary {
    offset: usize,
    /// The line ending here is followed by, or is, a blank line
    blank: bool,
}

fn safe_boundaries(markdown: &str) -> Vec<Boundary> {
    let mut boundaries = Vec::new();
    let mut fence: Option<(char, usize)> = None;
    let mut in_math = false;
    let mut offset = 0;

    for line in markdown.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();

        if let Some((ch, len)) = fence {
            let run = trimmed.chars().take_while(|c| *c == ch).count();
            if run >= len && trimmed[run..].is_empty() {
                fence = None;
            }
        } else if let Some(opening) = fence_opening(trimmed) {
            fence = Some(opening);
        } else if trimmed == "$$" {
            in_math = !in_math;
        } else if !in_math && trimmed.starts_with("$$") && !trimmed[2..].contains("$$") {
            in_math = true;
        } else if in_math && trimmed.ends_with("$$") {
            in_math = false;
        }

        if fence.is_none() && !in_math && line.ends_with('\n') && offset < markdown.len() {
            let next_line_blank = markdown[offset..]
                .split('\n')
                .next()
                .is_some_and(|next| next.trim().is_empty());
            boundaries.push(Boundary {
                offset,
                blank: trimmed.is_empty() && !next_line_blank,
            });
        }
    }

    boundaries
}

fn fence_opening(trimmed: &str) -> Option<(char, usize)> {
    let ch = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_input_is_one_chunk() {
        assert_eq!(split_chunks("short", 100), vec!["short"]);
        assert!(split_chunks("", 100).is_empty());
    }

    #[test]
    fn test_zero_limit_disables_chunking() {
        let md = "a\n\nb\n";
        assert_eq!(split_chunks(md, 0), vec![md]);
    }

    #[test]
    fn test_cuts_after_blank_lines() {
        let md = "aaaa\n\nbbbb\n\ncccc\n";
        let chunks = split_chunks(md, 8);
        assert_eq!(chunks, vec!["aaaa\n\n", "bbbb\n\n", "cccc\n"]);
    }

    #[test]
    fn test_never_cuts_inside_code_fence() {
        let md = "intro\n\n```\nline one\n\nline two\n\nline three\n```\n\nafter\n";
        let chunks = split_chunks(md, 16);
        assert!(chunks.iter().any(|c| c.contains("line one") && c.contains("line three")));
        assert_eq!(chunks.concat(), md);
    }

    #[test]
    fn test_never_cuts_inside_math_block() {
        let md = "intro\n\n$$\na = b\n\nc = d\n$$\n\nafter\n";
        let chunks = split_chunks(md, 10);
        assert!(chunks.iter().any(|c| c.contains("a = b") && c.contains("c = d")));
        assert_eq!(chunks.concat(), md);
    }

    #[test]
    fn test_falls_back_to_line_boundary() {
        let md = "line one\nline two\nline three\n";
        let chunks = split_chunks(md, 12);
        assert_eq!(chunks, vec!["line one\n", "line two\n", "line three\n"]);
    }

    #[test]
    fn test_oversized_line_kept_whole() {
        let long = "x".repeat(50);
        let md = format!("{long}\n\nshort\n");
        let chunks = split_chunks(&md, 10);
        assert_eq!(chunks[0], format!("{long}\n"));
        assert_eq!(chunks.concat(), md);
    }

    proptest! {
        #[test]
        fn prop_chunks_concatenate_to_input(
            paragraphs in prop::collection::vec("[a-z ]{1,40}", 1..20),
            max in 1usize..120,
        ) {
            let md = paragraphs.join("\n\n");
            let chunks = split_chunks(&md, max);
            prop_assert_eq!(chunks.concat(), md.as_str());
            prop_assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }
}
