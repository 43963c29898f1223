//! HTML helpers for entity bodies.
//!
//! Descriptions, repro steps and specs are stored as HTML. This module turns
//! them into plain text for scoring and pulls out the images they embed.
//!
//! # Examples
//!
//! ```rust
//! use zentao::net::html;
//! use url::Url;
//!
//! let base = Url::parse("https://pm.example.com/zentao/").unwrap();
//! let body = r#"<p>Steps</p><img src="/zentao/file-read-12.png"><img src="https://cdn.example.com/a.gif">"#;
//!
//! assert_eq!(
//!     html::extract_image_urls(body, &base),
//!     vec![
//!         "https://pm.example.com/zentao/file-read-12.png".to_string(),
//!         "https://cdn.example.com/a.gif".to_string(),
//!     ]
//! );
//! assert_eq!(html::plain_text(body), "Steps");
//! ```

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Parses an HTML fragment (a body field, not a full document).
pub fn parse_fragment(html: &str) -> Html {
    Html::parse_fragment(html)
}

/// Extracts an attribute from every element matching `selector`.
///
/// Returns an empty vector if the selector is invalid.
pub fn select_all_attr(html: &Html, selector: &str, attr: &str) -> Vec<String> {
    Selector::parse(selector)
        .ok()
        .map(|sel| {
            html.select(&sel)
                .filter_map(|el| el.value().attr(attr).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Text content of an HTML fragment with whitespace runs collapsed.
///
/// Adjacent text nodes are concatenated as written, so inline markup inside a
/// word or phrase does not split it.
///
/// ```rust
/// use zentao::net::html;
///
/// assert_eq!(html::plain_text("<p>Crash  on</p>\n<p>save&amp;exit</p>"), "Crash on save&exit");
/// assert_eq!(html::plain_text("no markup"), "no markup");
/// ```
pub fn plain_text(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let fragment = parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Absolute URLs of every `<img src>` in `html`, de-duplicated in first-seen
/// order.
///
/// Relative sources resolve against `base`. Inline `data:` images and sources
/// that do not resolve to http(s) are skipped.
pub fn extract_image_urls(html: &str, base: &Url) -> Vec<String> {
    if !html.contains("<img") && !html.contains("<IMG") {
        return Vec::new();
    }
    let fragment = parse_fragment(html);
    let sources = select_all_attr(&fragment, "img[src]", "src");

    unique_urls(sources.iter().filter_map(|src| {
        let src = src.trim();
        if src.is_empty() || src.starts_with("data:") {
            return None;
        }
        base.join(src)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(String::from)
    }))
}

/// De-duplicates URLs, keeping the first occurrence of each.
///
/// ```rust
/// use zentao::net::html::unique_urls;
///
/// let urls = ["a", "b", "a", "c", "b"].map(String::from);
/// assert_eq!(unique_urls(urls), vec!["a", "b", "c"]);
/// ```
pub fn unique_urls<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
