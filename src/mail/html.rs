//! HTML body → readable plain text.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->")
        .expect("script/style pattern is valid")
});

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6])\s*>").expect("line break pattern is valid")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Strip markup from an HTML body.
///
/// Script and style content is dropped, block ends become line breaks,
/// a handful of common entities are decoded, and runs of whitespace are
/// collapsed. Blank lines are removed.
pub fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_STYLE.replace_all(html, " ");
    let with_breaks = LINE_BREAK.replace_all(&without_code, "\n");
    let stripped = TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    // &amp; last so "&amp;lt;" decodes to "&lt;" rather than "<".
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_basic() {
        assert_eq!(html_to_text("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn block_elements_break_lines() {
        let html = "<div>First</div><div>Second<br>Third</div>";
        assert_eq!(html_to_text(html), "First\nSecond\nThird");
    }

    #[test]
    fn script_and_style_are_dropped() {
        let html = "<style>.x{color:red}</style><p>Visible</p><script>alert('x')</script>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            html_to_text("Tom&nbsp;&amp;&nbsp;Jerry &lt;3 &amp;lt;"),
            "Tom & Jerry <3 &lt;"
        );
    }

    #[test]
    fn strip_html_with_attributes() {
        let html = r#"<a href="https://example.com" class="link">Click</a> here"#;
        assert_eq!(html_to_text(html), "Click here");
    }

    #[test]
    fn strip_html_empty() {
        assert_eq!(html_to_text(""), "");
    }
}
