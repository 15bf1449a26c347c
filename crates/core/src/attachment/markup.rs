//! Lightweight scanner for attachment references in rendered document HTML.
//!
//! Only `<a href>`, `<iframe src>` and `<img src>` matter here, so instead of
//! building a DOM the scanner walks the tag stream, skipping comments, and
//! reads attributes of the three interesting tags.

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::debug;

use crate::errors::SourceError;

/// Which tag a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupKind {
    Link,
    Iframe,
    Image,
}

impl MarkupKind {
    fn from_tag(name: &str) -> Option<(Self, &'static str)> {
        if name.eq_ignore_ascii_case("a") {
            Some((Self::Link, "href"))
        } else if name.eq_ignore_ascii_case("iframe") {
            Some((Self::Iframe, "src"))
        } else if name.eq_ignore_ascii_case("img") {
            Some((Self::Image, "src"))
        } else {
            None
        }
    }

    /// Prefix of the generated attachment name.
    pub fn label(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Iframe => "iframe",
            Self::Image => "image",
        }
    }
}

/// A URL found in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupRef {
    pub kind: MarkupKind,
    pub url: String,
}

fn attribute_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
            .expect("attribute pattern compiles")
    })
}

/// Scan `html` for references.
///
/// Results are grouped by tag (links, then iframes, then images), each
/// group in document order. A `<` that cannot open a tag is read as text,
/// and `<script>`/`<style>` bodies are skipped. Markup that is cut off
/// inside a tag or comment fails the whole scan.
pub fn scan(html: &str) -> Result<Vec<MarkupRef>, SourceError> {
    let mut links = Vec::new();
    let mut iframes = Vec::new();
    let mut images = Vec::new();

    let mut pos = 0;
    while let Some(rel) = html[pos..].find('<') {
        let start = pos + rel;
        let rest = &html[start + 1..];

        if rest.starts_with("!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| SourceError::Markup(format!("unterminated comment at byte {start}")))?;
            pos = start + 1 + end + 3;
            continue;
        }

        let name_len = if rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
            rest.find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len())
        } else {
            0
        };
        // `</x>`, `<!doctype>` and `<?xml?>` are skipped whole; any other
        // `<` without a tag name is text.
        if name_len == 0 && !rest.starts_with(['/', '!', '?']) {
            pos = start + 1;
            continue;
        }

        let end = match tag_end(rest) {
            TagEnd::Closed(end) => end,
            TagEnd::Interrupted => {
                pos = start + 1;
                continue;
            }
            TagEnd::Truncated => {
                return Err(SourceError::Markup(format!("unterminated tag at byte {start}")));
            }
        };
        pos = start + 1 + end + 1;
        if name_len == 0 {
            continue;
        }

        let name = &rest[..name_len];
        if let Some(close) = raw_text_end(&html[pos..], name) {
            pos += close;
        }

        let Some((kind, wanted)) = MarkupKind::from_tag(name) else {
            continue;
        };
        let Some(url) = attribute(&rest[name_len..end], wanted) else {
            continue;
        };
        let url = url.trim();
        if url.is_empty() || is_inline_scheme(url) {
            continue;
        }
        let found = MarkupRef {
            kind,
            url: url.to_string(),
        };
        match kind {
            MarkupKind::Link => links.push(found),
            MarkupKind::Iframe => iframes.push(found),
            MarkupKind::Image => images.push(found),
        }
    }

    debug!(
        links = links.len(),
        iframes = iframes.len(),
        images = images.len(),
        "scanned document markup"
    );
    links.extend(iframes);
    links.extend(images);
    Ok(links)
}

enum TagEnd {
    /// Byte offset of the closing `>`.
    Closed(usize),
    /// Another `<` came first, so this was not a tag.
    Interrupted,
    /// Input ended inside the tag.
    Truncated,
}

/// Find the `>` closing the tag that `rest` starts. Quotes only count
/// after `=`, where they delimit an attribute value.
fn tag_end(rest: &str) -> TagEnd {
    let mut quote: Option<char> = None;
    let mut after_eq = false;
    for (i, c) in rest.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '>' => return TagEnd::Closed(i),
            '<' => return TagEnd::Interrupted,
            '=' => {
                after_eq = true;
                continue;
            }
            '"' | '\'' if after_eq => quote = Some(c),
            c if c.is_whitespace() => continue,
            _ => {}
        }
        after_eq = false;
    }
    TagEnd::Truncated
}

/// For `<script>` and `<style>`, the offset in `body` of the matching close
/// tag, or the end of input when it is missing.
fn raw_text_end(body: &str, name: &str) -> Option<usize> {
    let close = ["script", "style"]
        .into_iter()
        .find(|raw| name.eq_ignore_ascii_case(raw))
        .map(|raw| format!("</{raw}"))?;
    // ASCII lowering keeps byte offsets.
    Some(body.to_ascii_lowercase().find(&close).unwrap_or(body.len()))
}

fn attribute(attrs: &str, wanted: &str) -> Option<String> {
    attribute_pattern().captures_iter(attrs).find_map(|caps| {
        let name = caps.get(1)?.as_str();
        if !name.eq_ignore_ascii_case(wanted) {
            return None;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        Some(html_unescape(value))
    })
}

fn is_inline_scheme(url: &str) -> bool {
    let lower = url.get(..11).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with("about:")
}

/// Unescape the entities that commonly appear in attribute values.
fn html_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(refs: &[MarkupRef]) -> Vec<(&'static str, &str)> {
        refs.iter().map(|r| (r.kind.label(), r.url.as_str())).collect()
    }

    #[test]
    fn test_scan_groups_by_tag() {
        let html = r#"
<p><img src="/pic/1.jpg" alt="x"></p>
<a href="/files/report.pdf">报告</a>
<iframe src="https://player.example.com/v/1" width="600"></iframe>
<IMG SRC='/pic/2.png' />
<a class="x" href=/files/data.xlsx>data</a>
"#;
        let refs = scan(html).unwrap();
        assert_eq!(
            urls(&refs),
            vec![
                ("link", "/files/report.pdf"),
                ("link", "/files/data.xlsx"),
                ("iframe", "https://player.example.com/v/1"),
                ("image", "/pic/1.jpg"),
                ("image", "/pic/2.png"),
            ]
        );
    }

    #[test]
    fn test_scan_skips_comments_and_inline_data() {
        let html = r#"<!-- <img src="/hidden.jpg"> --><img src="data:image/png;base64,AAAA"><a href="javascript:void(0)">x</a><img src="/shown.jpg">"#;
        let refs = scan(html).unwrap();
        assert_eq!(urls(&refs), vec![("image", "/shown.jpg")]);
    }

    #[test]
    fn test_scan_quoted_gt_and_entities() {
        let html = r#"<a title="a > b" href="/d.pdf?x=1&amp;y=2">d</a>"#;
        let refs = scan(html).unwrap();
        assert_eq!(refs[0].url, "/d.pdf?x=1&y=2");
    }

    #[test]
    fn test_scan_ignores_lookalike_attributes() {
        let html = r#"<img data-src="/lazy.jpg" src="/real.jpg"><a data-href="/x.pdf">x</a>"#;
        let refs = scan(html).unwrap();
        assert_eq!(urls(&refs), vec![("image", "/real.jpg")]);
    }

    #[test]
    fn test_scan_stray_lt_in_text() {
        let refs = scan("1 < 2 and I <3 it <img src=\"/a.gif\">").unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_scan_less_than_in_text() {
        let html = r#"<p>if a<b then</p><img src="/p/1.jpg"><a href="/f/a.pdf">a</a>"#;
        let refs = scan(html).unwrap();
        assert_eq!(urls(&refs), vec![("link", "/f/a.pdf"), ("image", "/p/1.jpg")]);
    }

    #[test]
    fn test_scan_skips_script_and_style_bodies() {
        let html = r#"<script>for(i=0;i<n;i++){}</script><img src="/p/1.jpg">"#;
        assert_eq!(urls(&scan(html).unwrap()), vec![("image", "/p/1.jpg")]);

        let html = r#"<SCRIPT type="text/javascript">document.write('<img src="/fake.jpg">')</Script>
<style>a<b{}</style><iframe src="/v/1"></iframe>"#;
        assert_eq!(urls(&scan(html).unwrap()), vec![("iframe", "/v/1")]);
    }

    #[test]
    fn test_scan_unclosed_script_runs_to_end() {
        let refs = scan(r#"<script>if (a<b) {<img src="/x.jpg">"#).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_scan_quotes_outside_values_are_text() {
        let html = r#"<p>say "hi</p><img alt=it's src="/p/2.jpg">"#;
        assert_eq!(urls(&scan(html).unwrap()), vec![("image", "/p/2.jpg")]);
    }

    #[test]
    fn test_scan_unterminated_tag() {
        let err = scan(r#"<p>text</p><img src="/a.jpg"#).unwrap_err();
        assert!(matches!(err, SourceError::Markup(_)));
    }

    #[test]
    fn test_scan_unterminated_comment() {
        assert!(scan("<!-- never closed <img src=\"/a.jpg\">").is_err());
    }

    #[test]
    fn test_scan_plain_text() {
        assert!(scan("no tags at all").unwrap().is_empty());
    }
}
