//! Byte-budget chunking for long markdown reports.
//!
//! Splits prefer natural report boundaries: the `---` separator between
//! stocks, then headings, then bold title lines, then a hard line-based
//! fallback. Every emitted chunk fits the channel's UTF-8 byte budget
//! including its pagination marker.

/// Bytes held back from the budget for the `(i/N)` pagination marker.
const MARKER_RESERVE: usize = 100;

/// Extra room kept when a single oversized section has to be truncated,
/// so the ellipsis note still fits.
const TRUNCATION_RESERVE: usize = 200;

const TRUNCATION_NOTE: &str = "\n\n...(本段內容過長已截斷)";

/// Cut `text` at or below `max_bytes`, never inside a multi-byte
/// codepoint: walk back one byte at a time until the prefix decodes.
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn split_sections(content: &str) -> (Vec<String>, &'static str) {
    if content.contains("\n---\n") {
        return (
            content.split("\n---\n").map(String::from).collect(),
            "\n---\n",
        );
    }
    for heading in ["\n### ", "\n## ", "\n**"] {
        if content.contains(heading) {
            let mut parts = content.split(heading);
            let mut sections = vec![parts.next().unwrap_or_default().to_string()];
            let prefix = heading.trim_start_matches('\n');
            sections.extend(parts.map(|p| format!("{}{}", prefix, p)));
            return (sections, "\n");
        }
    }
    // Hard fallback: one section per line.
    (content.lines().map(String::from).collect(), "\n")
}

/// Split `content` into chunks of at most `max_bytes` UTF-8 bytes each,
/// pagination markers included.
pub fn chunk_markdown(content: &str, max_bytes: usize) -> Vec<String> {
    let effective = max_bytes.saturating_sub(MARKER_RESERVE).max(1);
    if content.len() <= effective {
        return vec![content.to_string()];
    }

    let (sections, separator) = split_sections(content);
    let sep_bytes = separator.len();

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0usize;

    for section in sections {
        let section_bytes = section.len() + sep_bytes;

        if section_bytes > effective {
            // A single section that cannot fit: flush, then truncate it.
            if !current.is_empty() {
                chunks.push(current.join(separator));
                current.clear();
                current_bytes = 0;
            }
            let keep = effective.saturating_sub(TRUNCATION_RESERVE).max(1);
            let mut truncated = truncate_to_bytes(&section, keep).to_string();
            truncated.push_str(TRUNCATION_NOTE);
            chunks.push(truncated);
            continue;
        }

        if current_bytes + section_bytes > effective {
            if !current.is_empty() {
                chunks.push(current.join(separator));
            }
            current = vec![section];
            current_bytes = section_bytes;
        } else {
            current_bytes += section_bytes;
            current.push(section);
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(separator));
    }

    let total = chunks.len();
    if total > 1 {
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.push_str(&format!("\n\n📄 *({}/{})*", i + 1, total));
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_one_chunk_without_marker() {
        let chunks = chunk_markdown("hello", 4000);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_stock_separators_first() {
        let a = format!("### A\n{}", "甲".repeat(500));
        let b = format!("### B\n{}", "乙".repeat(500));
        let c = format!("### C\n{}", "丙".repeat(500));
        let content = format!("{}\n---\n{}\n---\n{}", a, b, c);

        let budget = 2000;
        let chunks = chunk_markdown(&content, budget);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= budget, "chunk of {} bytes", chunk.len());
        }
        // Page markers present and sequential.
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.contains(&format!("({}/{})", i + 1, chunks.len())));
        }
    }

    #[test]
    fn reconstruction_preserves_sections_in_order() {
        let sections: Vec<String> = (0..10)
            .map(|i| format!("### 股票{}\n{}", i, "内容".repeat(200)))
            .collect();
        let content = sections.join("\n---\n");

        let chunks = chunk_markdown(&content, 4000);
        let merged: String = chunks
            .iter()
            .map(|c| {
                // Strip the trailing page marker before reassembly.
                match c.rfind("\n\n📄 *(") {
                    Some(idx) => &c[..idx],
                    None => c.as_str(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n---\n");

        for (i, section) in sections.iter().enumerate() {
            assert!(merged.contains(section.as_str()), "missing section {}", i);
        }
        // Order preserved.
        let positions: Vec<_> = sections
            .iter()
            .map(|s| merged.find(s.as_str()).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn oversized_section_is_truncated_at_codepoint_boundary() {
        let huge = format!("### 超長\n{}", "漲".repeat(5000));
        let chunks = chunk_markdown(&huge, 2000);

        for chunk in &chunks {
            assert!(chunk.len() <= 2000);
            // Every chunk must still be valid UTF-8 (guaranteed by type),
            // and the truncated one carries the ellipsis note.
        }
        assert!(chunks.iter().any(|c| c.contains("已截斷")));
    }

    #[test]
    fn truncate_never_splits_codepoints() {
        let text = "abc漲跌漲跌";
        for max in 0..text.len() + 2 {
            let cut = truncate_to_bytes(text, max);
            assert!(cut.len() <= max.min(text.len()));
            assert!(text.starts_with(cut));
        }
    }

    #[test]
    fn heading_fallback_when_no_separator() {
        let content = (0..8)
            .map(|i| format!("### 段{}\n{}", i, "字".repeat(300)))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_markdown(&content, 2500);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 2500);
        }
        // Sections re-split on headings, so each chunk starts with one.
        assert!(chunks[1].starts_with("### "));
    }

    #[test]
    fn line_fallback_for_unstructured_text() {
        let content = (0..200)
            .map(|i| format!("第{}行：一些沒有任何標題的文字", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_markdown(&content, 1500);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 1500);
        }
    }

    #[test]
    fn sixty_kb_report_in_twenty_kb_budget_yields_about_three_chunks() {
        // ~60KB of section-structured markdown.
        let sections: Vec<String> = (0..30)
            .map(|i| format!("### 股票{}\n{}", i, "深度分析".repeat(160)))
            .collect();
        let content = sections.join("\n---\n");
        assert!(content.len() > 55_000 && content.len() < 70_000);

        let chunks = chunk_markdown(&content, 20_000);
        assert!(
            (3..=5).contains(&chunks.len()),
            "expected ~3-5 chunks, got {}",
            chunks.len()
        );
        for chunk in &chunks {
            assert!(chunk.len() <= 20_000);
            assert!(chunk.contains(&format!("/{})*", chunks.len())));
        }
    }
}
