use anyhow::Result;

use super::base;
use super::PageFetcher;

pub struct HttpFetcher;

impl PageFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch(&self, url: &str) -> Result<String> {
        base::fetch_html(url)
    }
}
