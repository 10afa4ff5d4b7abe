use std::ffi::OsStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, LaunchOptions};

use super::base;
use super::PageFetcher;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct BrowserFetcher;

impl PageFetcher for BrowserFetcher {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let user_agent = format!("--user-agent={}", base::BROWSER_USER_AGENT);
        let args: Vec<&OsStr> = vec![
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-extensions"),
            OsStr::new(user_agent.as_str()),
        ];
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(IDLE_TIMEOUT)
            .args(args)
            .build()
            .map_err(|err| anyhow!("invalid browser options: {err}"))?;

        let browser = Browser::new(options).context("unable to launch headless chrome")?;
        let tab = browser.new_tab().context("unable to open browser tab")?;
        tab.set_default_timeout(ELEMENT_TIMEOUT);
        tab.navigate_to(url)
            .with_context(|| format!("navigation failed for {url}"))?;
        tab.wait_until_navigated()
            .with_context(|| format!("page never finished loading: {url}"))?;
        tab.wait_for_element("body")
            .with_context(|| format!("no <body> rendered for {url}"))?;
        tab.get_content()
            .with_context(|| format!("unable to read rendered DOM for {url}"))
    }
}
