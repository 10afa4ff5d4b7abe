use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

const SKIPPED_TEXT_PARENTS: [&str; 5] = ["script", "style", "noscript", "template", "svg"];

static CLIENT: Lazy<Result<Client, String>> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    Client::builder()
        .timeout(PAGE_TIMEOUT)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|err| err.to_string())
});

fn client() -> Result<&'static Client> {
    CLIENT
        .as_ref()
        .map_err(|err| anyhow::anyhow!("http client unavailable: {err}"))
}

pub fn clean_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(inner_text)
        .find(|text| !text.is_empty())
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub fn page_text(document: &Html) -> String {
    let mut parts: Vec<String> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| SKIPPED_TEXT_PARENTS.iter().any(|tag| *tag == el.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let cleaned = clean_text(text);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }
    parts.join(" ")
}

pub fn fetch_html(url: &str) -> Result<String> {
    fetch_html_with_timeout(url, PAGE_TIMEOUT)
}

pub fn fetch_html_with_timeout(url: &str, timeout: Duration) -> Result<String> {
    let response = client()?
        .get(url)
        .timeout(timeout)
        .send()
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    response
        .text()
        .with_context(|| format!("unable to read response body for {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
    <html>
      <head>
        <title>Spring Gala</title>
        <style>body { color: red; }</style>
        <script>var tracking = "do not index";</script>
      </head>
      <body>
        <h1>  Spring
            Gala </h1>
        <p>Doors at <b>7:00 PM</b></p>
        <noscript>Enable JavaScript</noscript>
      </body>
    </html>
    "#;

    #[test]
    fn page_text_skips_scripts_and_styles() {
        let document = Html::parse_document(SAMPLE_HTML);
        let text = page_text(&document);
        assert_eq!(text, "Spring Gala Spring Gala Doors at 7:00 PM");
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn first_text_skips_empty_matches() {
        let document = Html::parse_document("<h2> </h2><h2>Agenda</h2>");
        let selector = Selector::parse("h2").expect("h2 selector");
        assert_eq!(first_text(&document, &selector).as_deref(), Some("Agenda"));
    }

    #[test]
    fn normalizes_missing_scheme() {
        assert_eq!(normalize_url(" example.com/events/1 "), "https://example.com/events/1");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
    }

    #[test]
    fn resolves_relative_links() {
        assert_eq!(
            absolute_url("https://conf.example.com/2025/", Some("agenda".to_string())).as_deref(),
            Some("https://conf.example.com/2025/agenda")
        );
        assert_eq!(
            absolute_url("https://conf.example.com/", Some("https://maps.example.com".to_string()))
                .as_deref(),
            Some("https://maps.example.com")
        );
    }
}
