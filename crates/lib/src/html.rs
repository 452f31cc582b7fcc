//! # Telegram HTML Rendering
//!
//! Converts LLM-produced Markdown into the constrained HTML subset Telegram
//! accepts: `<b>`, `<i>`, `<code>`, `<pre>`, `<a>`. Everything else is
//! escaped, and bullet markers become `•`. Raw Markdown is never sent to
//! Telegram.
//!
//! Inline and fenced code segments are located first and their contents are
//! escaped but otherwise left untouched; span conversion runs only on the
//! text between them.

/// Escapes the three characters Telegram's HTML parser treats specially.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Converts Markdown spans (bold, italic, links) within an already-escaped
/// non-code segment.
fn convert_spans(escaped: &str) -> String {
    let mut out = escaped.to_string();

    // Links first, so their label/url text is not re-styled.
    let link = regex::Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("static regex");
    out = link
        .replace_all(&out, r#"<a href="$2">$1</a>"#)
        .into_owned();

    let bold = regex::Regex::new(r"\*\*([^*]+)\*\*").expect("static regex");
    out = bold.replace_all(&out, "<b>$1</b>").into_owned();

    let italic_star = regex::Regex::new(r"\*([^*\n]+)\*").expect("static regex");
    out = italic_star.replace_all(&out, "<i>$1</i>").into_owned();

    let italic_underscore = regex::Regex::new(r"\b_([^_\n]+)_\b").expect("static regex");
    out = italic_underscore.replace_all(&out, "<i>$1</i>").into_owned();

    // Bullet markers at line starts.
    out.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                format!("• {rest}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders Markdown-ish LLM output into Telegram-safe HTML.
pub fn render_telegram_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(start) = rest.find('`') {
            let (before, from_tick) = rest.split_at(start);
            out.push_str(&convert_spans(&escape(before)));

            if let Some(fenced) = from_tick.strip_prefix("```") {
                // Fenced block: swallow an optional language tag line.
                match fenced.find("```") {
                    Some(end) => {
                        let body = &fenced[..end];
                        let body = body.strip_prefix('\n').unwrap_or(
                            body.split_once('\n').map(|(_, b)| b).unwrap_or(body),
                        );
                        out.push_str("<pre>");
                        out.push_str(&escape(body.trim_end_matches('\n')));
                        out.push_str("</pre>");
                        rest = &fenced[end + 3..];
                    }
                    None => {
                        // Unclosed fence: escape it literally.
                        out.push_str(&escape(from_tick));
                        rest = "";
                    }
                }
            } else {
                let inline = &from_tick[1..];
                match inline.find('`') {
                    Some(end) => {
                        out.push_str("<code>");
                        out.push_str(&escape(&inline[..end]));
                        out.push_str("</code>");
                        rest = &inline[end + 1..];
                    }
                    None => {
                        out.push_str(&escape(from_tick));
                        rest = "";
                    }
                }
            }
        } else {
            out.push_str(&convert_spans(&escape(rest)));
            rest = "";
        }
    }
    out
}

/// Builds a deep link to a message inside a private channel or group.
///
/// Telegram's `t.me/c/` form expects the internal id, i.e. the channel id
/// without the `-100` prefix.
pub fn message_deep_link(chat_id: i64, message_id: i64) -> String {
    let internal = chat_id
        .to_string()
        .trim_start_matches("-100")
        .trim_start_matches('-')
        .to_string();
    format!("https://t.me/c/{internal}/{message_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_italic_and_links() {
        assert_eq!(
            render_telegram_html("**Main topic** and *details* here"),
            "<b>Main topic</b> and <i>details</i> here"
        );
        assert_eq!(
            render_telegram_html("see [the post](https://t.me/c/123/45)"),
            r#"see <a href="https://t.me/c/123/45">the post</a>"#
        );
    }

    #[test]
    fn bullets_become_dots() {
        assert_eq!(
            render_telegram_html("- first\n- second"),
            "• first\n• second"
        );
    }

    #[test]
    fn html_is_escaped_outside_code() {
        assert_eq!(
            render_telegram_html("a < b & c > d"),
            "a &lt; b &amp; c &gt; d"
        );
    }

    #[test]
    fn inline_code_is_preserved_verbatim() {
        assert_eq!(
            render_telegram_html("run `cargo **build**` now"),
            "run <code>cargo **build**</code> now"
        );
    }

    #[test]
    fn fenced_block_keeps_content_unstyled() {
        let input = "```rust\nlet x = 1 < 2;\n```";
        assert_eq!(
            render_telegram_html(input),
            "<pre>let x = 1 &lt; 2;</pre>"
        );
    }

    #[test]
    fn unclosed_code_is_escaped_literally() {
        assert_eq!(render_telegram_html("tick ` alone"), "tick ` alone");
    }

    #[test]
    fn deep_link_strips_internal_prefix() {
        assert_eq!(
            message_deep_link(-1001234567890, 42),
            "https://t.me/c/1234567890/42"
        );
        assert_eq!(message_deep_link(987, 1), "https://t.me/c/987/1");
    }
}
