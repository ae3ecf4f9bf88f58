use regex::Regex;
use std::sync::OnceLock;

/// Where the document body goes in the shell template.
pub const CONTENT_PLACEHOLDER: &str = "<!-- contents goes here -->";
/// Empty title element filled with the document title.
pub const TITLE_PLACEHOLDER: &str = "<title></title>";

struct TitlePatterns {
    heading: Regex,
    taxon: Regex,
    permalink: Regex,
    tag: Regex,
    space: Regex,
}

fn patterns() -> &'static TitlePatterns {
    static PATTERNS: OnceLock<TitlePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TitlePatterns {
        heading: Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid"),
        taxon: Regex::new(r#"(?is)<span\s+class="taxon"[^>]*>.*?</span>"#).expect("valid"),
        permalink: Regex::new(r"(?is)<a\b[^>]*>.*?</a>\s*$").expect("valid"),
        tag: Regex::new(r"(?s)<[^>]*>").expect("valid"),
        space: Regex::new(r"\s+").expect("valid"),
    })
}

fn plain_text(markup: &str) -> String {
    let p = patterns();
    let stripped = p.tag.replace_all(markup, "");
    p.space.replace_all(stripped.trim(), " ").into_owned()
}

/// Plain-text title from the fragment's first `<h1>`, without the taxon
/// label and the trailing permalink anchor.
pub fn extract_title(fragment: &str) -> Option<String> {
    let p = patterns();
    let inner = p.heading.captures(fragment)?.get(1)?.as_str();
    let without_taxon = p.taxon.replace_all(inner, "");

    let title = plain_text(&p.permalink.replace(&without_taxon, ""));
    let title = if title.is_empty() {
        plain_text(&without_taxon)
    } else {
        title
    };
    (!title.is_empty()).then_some(title)
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Title for a page: its first heading, else the output target name.
pub fn page_title(fragment: &str, target: &str) -> String {
    extract_title(fragment).unwrap_or_else(|| escape_text(target))
}

/// Fill the shell template with the body (primary fragment followed by the
/// backmatter) and the title.
pub fn compose(primary: &str, backmatter: &str, shell: &str, title: &str) -> String {
    let body = format!("{primary}{backmatter}");
    shell
        .replace(TITLE_PLACEHOLDER, &format!("<title>{title}</title>"))
        .replace(CONTENT_PLACEHOLDER, &body)
}
