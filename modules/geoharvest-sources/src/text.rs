/// Wide enough that html2text never wraps a feed summary or snippet.
const RENDER_WIDTH: usize = 10_000;

/// Flatten an HTML fragment (feed summary, search snippet) to plain text.
/// Entities are decoded and whitespace is collapsed to single spaces.
pub fn strip_html(html: &str) -> String {
    let rendered = html2text::config::plain_no_decorate()
        .string_from_read(html.as_bytes(), RENDER_WIDTH)
        .unwrap_or_else(|_| html.to_string());
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_entities() {
        let html = "<b>Masonic</b> lodge&nbsp;vandalized in <span class=\"x\">Lyon</span> &amp; nearby";
        assert_eq!(strip_html(html), "Masonic lodge vandalized in Lyon & nearby");
    }

    #[test]
    fn decodes_numeric_and_named_entities() {
        assert_eq!(
            strip_html("<p>Lodge&#8217;s hall in M&aacute;laga</p>"),
            "Lodge\u{2019}s hall in M\u{e1}laga"
        );
    }

    #[test]
    fn block_elements_become_spaces() {
        assert_eq!(
            strip_html("<p>First line</p><p>Second&#x20;line<br>third</p>"),
            "First line Second line third"
        );
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(strip_html("Nothing to strip"), "Nothing to strip");
    }

    #[test]
    fn empty_input() {
        assert_eq!(strip_html(""), "");
    }
}
