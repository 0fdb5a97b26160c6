use std::sync::LazyLock;

use regex::Regex;

/// Longest cleaned text handed to the language model.
pub const MAX_CLEANED_CHARS: usize = 3000;

static HIDDEN_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<span[^>]*display:\s*none[^>]*>.*?</span>").unwrap()
});
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static CSS_ARTIFACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cssfontface|csstransitions|fontface").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip markup and noise from a notice and cap its length.
///
/// Truncation lands on a character boundary and appends `...`.
pub fn clean_notice_text(raw: &str) -> String {
    let text = HIDDEN_SPAN.replace_all(raw, " ");
    let text = STYLE_BLOCK.replace_all(&text, " ");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = CSS_ARTIFACT.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();

    match text.char_indices().nth(MAX_CLEANED_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_artifacts() {
        let raw = r#"<div class="x">NOTICE <b>OF</b> SALE</div>
            <span style="display: none">hidden junk</span>cssfontface
            <style>.a { color: red }</style>MORTGAGOR:&nbsp;Jane Doe"#;
        let cleaned = clean_notice_text(raw);
        assert_eq!(cleaned, "NOTICE OF SALE MORTGAGOR: Jane Doe");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let raw = "é".repeat(MAX_CLEANED_CHARS + 10);
        let cleaned = clean_notice_text(&raw);
        assert!(cleaned.ends_with("..."));
        assert_eq!(cleaned.chars().count(), MAX_CLEANED_CHARS + 3);
    }

    #[test]
    fn short_text_untouched() {
        assert_eq!(clean_notice_text("  plain   text "), "plain text");
    }
}
