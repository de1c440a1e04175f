//! Per-dialect markdown transforms.
//!
//! Three small line-oriented rewriters instead of one shared markdown
//! library: the target dialects (Telegram subset, plain text, HTML mail)
//! disagree on too much for a common AST to help.

/// Telegram's legacy markdown: no `#` headings, `*bold*` instead of
/// `**bold**`, brackets escaped.
pub fn to_telegram(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let stripped = strip_heading(line);
        out.push_str(&stripped);
        out.push('\n');
    }

    let mut converted = out.replace("**", "*");
    for (from, to) in [("[", "\\["), ("]", "\\]"), ("(", "\\("), (")", "\\)")] {
        converted = converted.replace(from, to);
    }
    converted.trim_end().to_string()
}

/// Flatten to plain text: headings and emphasis markers removed, tables
/// collapsed to cell text.
pub fn to_plain_text(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        // Table separator rows carry no content.
        if trimmed.starts_with('|')
            && trimmed.ends_with('|')
            && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
        {
            continue;
        }
        let mut cleaned = strip_heading(line);
        if cleaned.trim_start().starts_with('|') {
            cleaned = cleaned
                .trim()
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("  ");
        }
        cleaned = cleaned.replace("**", "").replace("__", "");
        lines.push(cleaned);
    }

    let joined = lines.join("\n");
    collapse_blank_runs(&joined)
}

/// Minimal HTML rendering for mail bodies, with an inline style block.
pub fn to_html(text: &str) -> String {
    let mut body = String::new();
    for line in text.lines() {
        let escaped = escape_html(line);
        let rendered = if let Some(rest) = escaped.strip_prefix("### ") {
            format!("<h3>{}</h3>", rest)
        } else if let Some(rest) = escaped.strip_prefix("## ") {
            format!("<h2>{}</h2>", rest)
        } else if let Some(rest) = escaped.strip_prefix("# ") {
            format!("<h1>{}</h1>", rest)
        } else if escaped.trim() == "---" {
            "<hr/>".to_string()
        } else if escaped.trim().is_empty() {
            String::new()
        } else {
            format!("<p>{}</p>", bold_spans(&escaped))
        };
        body.push_str(&rendered);
        body.push('\n');
    }

    format!(
        "<html><head><meta charset=\"utf-8\"><style>\
         body{{font-family:-apple-system,'Segoe UI',sans-serif;line-height:1.6;\
         color:#2c3e50;max-width:720px;margin:0 auto;padding:16px}}\
         h1,h2,h3{{color:#1a5276;border-bottom:1px solid #eaecee;padding-bottom:4px}}\
         hr{{border:none;border-top:1px solid #d5d8dc;margin:16px 0}}\
         p{{margin:6px 0}}</style></head><body>\n{}</body></html>",
        body
    )
}

fn strip_heading(line: &str) -> String {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes > 0 && hashes <= 6 && trimmed.chars().nth(hashes) == Some(' ') {
        trimmed[hashes + 1..].to_string()
    } else {
        line.to_string()
    }
}

fn bold_spans(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut open = false;
    while let Some(idx) = rest.find("**") {
        out.push_str(&rest[..idx]);
        out.push_str(if open { "</b>" } else { "<b>" });
        open = !open;
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    if open {
        out.push_str("</b>");
    }
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn collapse_blank_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blanks = 0;
    for line in s.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_strips_headings_and_converts_bold() {
        let input = "## 標題\n**重點** [連結](url)";
        let output = to_telegram(input);
        assert!(!output.contains('#'));
        assert!(output.contains("*重點*"));
        assert!(output.contains("\\["));
        assert!(!output.contains("**"));
    }

    #[test]
    fn plain_text_drops_markup_and_tables() {
        let input = "# 報告\n| 代碼 | 名稱 |\n|---|---|\n| 600519 | 茅台 |\n**加粗**";
        let output = to_plain_text(input);
        assert!(!output.contains('#'));
        assert!(!output.contains("**"));
        assert!(!output.contains("|---|"));
        assert!(output.contains("600519  茅台"));
    }

    #[test]
    fn html_renders_headings_and_bold() {
        let input = "### 核心結論\n**買入** <risky>\n---";
        let output = to_html(input);
        assert!(output.contains("<h3>核心結論</h3>"));
        assert!(output.contains("<b>買入</b>"));
        assert!(output.contains("&lt;risky&gt;"));
        assert!(output.contains("<hr/>"));
        assert!(output.contains("<style>"));
    }
}
