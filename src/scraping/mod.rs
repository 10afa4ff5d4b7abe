pub mod base;
#[cfg(feature = "browser")]
pub mod browser;
pub mod http;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::config::BrowserMode;
use crate::utils;

/// Pages whose visible text is shorter than this are treated as blocked.
pub const MIN_PAGE_TEXT: usize = 100;
pub const RELATED_TEXT_LIMIT: usize = 20_000;

const AGENDA_KEYWORDS: [&str; 3] = ["agenda", "schedule", "program"];
const LOCATION_KEYWORDS: [&str; 4] = ["location", "venue", "directions", "getting here"];

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("link selector"));

pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub text: String,
    pub fetched_with: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedContent {
    pub agenda: Option<String>,
    pub location: Option<String>,
}

pub fn default_fetchers(mode: BrowserMode) -> Vec<Box<dyn PageFetcher>> {
    let mut fetchers: Vec<Box<dyn PageFetcher>> = Vec::new();
    if let Some(browser) = browser_fetcher(mode) {
        fetchers.push(browser);
    }
    fetchers.push(Box::new(http::HttpFetcher));
    fetchers
}

#[cfg(feature = "browser")]
fn browser_fetcher(mode: BrowserMode) -> Option<Box<dyn PageFetcher>> {
    match mode {
        BrowserMode::Auto => Some(Box::new(browser::BrowserFetcher)),
        BrowserMode::Off => None,
    }
}

#[cfg(not(feature = "browser"))]
fn browser_fetcher(_mode: BrowserMode) -> Option<Box<dyn PageFetcher>> {
    None
}

pub fn fetch_page(url: &str, fetchers: &[Box<dyn PageFetcher>]) -> Result<FetchedPage> {
    let url = base::normalize_url(url);
    let mut errors: Vec<String> = Vec::new();

    for fetcher in fetchers {
        tracing::info!(fetcher = fetcher.name(), %url, "fetching event page");
        let html = match fetcher.fetch(&url) {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(fetcher = fetcher.name(), error = %format!("{err:#}"), "page fetch failed");
                errors.push(format!("{}: {err:#}", fetcher.name()));
                continue;
            }
        };

        let text = base::page_text(&Html::parse_document(&html));
        tracing::debug!(fetcher = fetcher.name(), chars = text.len(), "page text extracted");
        if text.chars().count() < MIN_PAGE_TEXT {
            errors.push(format!(
                "{}: retrieved content is too short - possible blocking or empty page",
                fetcher.name()
            ));
            continue;
        }

        return Ok(FetchedPage {
            url,
            html,
            text,
            fetched_with: fetcher.name(),
        });
    }

    if errors.is_empty() {
        return Err(anyhow!("no page fetchers configured"));
    }
    Err(anyhow!("all extraction methods failed. {}", errors.join("; ")))
}

pub fn related_links(base_url: &str, html: &str) -> (Option<String>, Option<String>) {
    let document = Html::parse_document(html);
    let mut agenda = None;
    let mut location = None;

    for link in document.select(&LINK_SELECTOR) {
        if agenda.is_some() && location.is_some() {
            break;
        }
        let label = base::inner_text(link).to_lowercase();
        let href = link.value().attr("href").unwrap_or_default();
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
            continue;
        }
        let Some(target) = base::absolute_url(base_url, Some(href.to_string())) else {
            continue;
        };
        if target.trim_end_matches('/') == base_url.trim_end_matches('/') {
            continue;
        }

        let href_lower = href.to_lowercase();
        let mentions = |keywords: &[&str]| {
            keywords
                .iter()
                .any(|keyword| label.contains(keyword) || href_lower.contains(keyword))
        };
        if agenda.is_none() && mentions(&AGENDA_KEYWORDS[..]) {
            agenda = Some(target);
        } else if location.is_none() && mentions(&LOCATION_KEYWORDS[..]) {
            location = Some(target);
        }
    }

    (agenda, location)
}

pub fn explore_related(page: &FetchedPage, fetcher: &dyn PageFetcher) -> RelatedContent {
    let (agenda_url, location_url) = related_links(&page.url, &page.html);
    RelatedContent {
        agenda: agenda_url.and_then(|url| related_text(&url, fetcher)),
        location: location_url.and_then(|url| related_text(&url, fetcher)),
    }
}

fn related_text(url: &str, fetcher: &dyn PageFetcher) -> Option<String> {
    match fetcher.fetch(url) {
        Ok(html) => {
            let text = base::page_text(&Html::parse_document(&html));
            let text = utils::truncate_chars(&text, RELATED_TEXT_LIMIT).to_string();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(err) => {
            tracing::debug!(%url, error = %format!("{err:#}"), "related page skipped");
            None
        }
    }
}
