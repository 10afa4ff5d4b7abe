use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::models::{present, EmailSource, Restaurant};
use crate::scraping::base;

const WEBSITE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_EMAIL_LEN: usize = 50;

const EXCLUDED_DOMAINS: [&str; 5] = ["example.com", "test.com", "gmail.com", "yahoo.com", "hotmail.com"];
const EXCLUDED_PREFIXES: [&str; 6] = [
    "noreply",
    "no-reply",
    "admin",
    "webmaster",
    "info@facebook",
    "info@twitter",
];

static MAILTO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mailto:([a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,})").expect("mailto regex")
});
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("email regex")
});

/// First plausible restaurant address in a page. `mailto:` links are
/// preferred over addresses that only appear in text.
pub fn extract_email_from_html(html: &str) -> Option<String> {
    let content = html.to_lowercase();
    let linked = MAILTO_RE
        .captures_iter(&content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()));
    let plain = EMAIL_RE.find_iter(&content).map(|m| m.as_str().to_string());
    linked.chain(plain).find(|email| is_acceptable(email))
}

fn is_acceptable(email: &str) -> bool {
    let email = email.trim();
    if email.len() > MAX_EMAIL_LEN {
        return false;
    }
    if EXCLUDED_DOMAINS.iter().any(|domain| email.contains(domain)) {
        return false;
    }
    if EXCLUDED_PREFIXES.iter().any(|prefix| email.contains(prefix)) {
        return false;
    }
    // asset names like logo@2x.png match the address shape
    !matches!(
        email.rsplit('.').next(),
        Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "css" | "js")
    )
}

pub fn guess_email(website: &str) -> Option<String> {
    let url = Url::parse(&base::normalize_url(website)).ok()?;
    let host = url.host_str()?;
    let domain = host.strip_prefix("www.").unwrap_or(host);
    if !domain.contains('.') {
        return None;
    }
    Some(format!("info@{domain}"))
}

pub fn find_contact_email(restaurant: &Restaurant) -> Option<(String, EmailSource)> {
    find_contact_email_with(restaurant, |url| {
        base::fetch_html_with_timeout(url, WEBSITE_TIMEOUT)
    })
}

pub fn find_contact_email_with<F>(restaurant: &Restaurant, fetch: F) -> Option<(String, EmailSource)>
where
    F: Fn(&str) -> Result<String>,
{
    if let Some(listed) = present(&restaurant.email) {
        return Some((listed.to_string(), restaurant.email_source.unwrap_or(EmailSource::Listed)));
    }

    let website = present(&restaurant.website)?;
    match fetch(website) {
        Ok(html) => {
            if let Some(email) = extract_email_from_html(&html) {
                tracing::debug!(restaurant = %restaurant.name, %email, "contact email found on website");
                return Some((email, EmailSource::Website));
            }
        }
        Err(err) => {
            tracing::debug!(restaurant = %restaurant.name, error = %format!("{err:#}"), "website scan skipped");
        }
    }

    guess_email(website).map(|email| (email, EmailSource::Guessed))
}
