//! Runtime configuration of the extraction engine.

use std::time::Duration;

use gazette_core::config_file::ConfigFile;
use gazette_parsing::{ParsingConfig, ParsingConfigBuilder};

use crate::ScrapeError;
use crate::fetch::DEFAULT_MAX_DOCUMENT_BYTES;
use crate::form::SearchForm;
use crate::interaction::InteractionPolicy;
use crate::pagination::{DEFAULT_MAX_PAGES, ResultsLayout};
use crate::resolver::DEFAULT_DOCUMENT_URL_PATTERN;
use crate::wait::WaitPolicy;

pub const DEFAULT_CATEGORY: &str = "-11";
pub const DEFAULT_QUERY: &str = "\"instituto nacional do seguro social\" E inss";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Fixed operational parameters of the portal search.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSettings {
    pub category: String,
    pub query_text: String,
    pub max_pages: usize,
    /// 0 disables pacing.
    pub detail_pages_per_second: u32,
    pub document_url_pattern: String,
    pub max_document_bytes: usize,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            query_text: DEFAULT_QUERY.to_string(),
            max_pages: DEFAULT_MAX_PAGES,
            detail_pages_per_second: 1,
            document_url_pattern: DEFAULT_DOCUMENT_URL_PATTERN.to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    /// Attach to a running WebDriver server instead of spawning chromedriver.
    pub webdriver_url: Option<String>,
    pub chromedriver_path: String,
    pub headless: bool,
    pub user_agent: String,
    /// Launch attempts per `acquire` before the session is declared fatal.
    pub launch_retries: u32,
    pub retry_backoff: Duration,
    /// Session losses a single run may recover from.
    pub max_recoveries: u32,
    /// How long a freshly spawned chromedriver gets to start answering.
    pub startup_timeout: Duration,
    pub page_load_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: None,
            chromedriver_path: "chromedriver".to_string(),
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            launch_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_recoveries: 3,
            startup_timeout: Duration::from_secs(15),
            page_load_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything an [`Orchestrator`](crate::Orchestrator) needs besides its
/// collaborators.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub portal: PortalSettings,
    pub browser: BrowserSettings,
    pub wait: WaitPolicy,
    pub interaction: InteractionPolicy,
    pub form: SearchForm,
    pub results: ResultsLayout,
    pub document_timeout: Duration,
    pub parsing: ParsingConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            portal: PortalSettings::default(),
            browser: BrowserSettings::default(),
            wait: WaitPolicy::default(),
            interaction: InteractionPolicy::default(),
            form: SearchForm::default(),
            results: ResultsLayout::default(),
            document_timeout: Duration::from_secs(60),
            parsing: ParsingConfig::default(),
        }
    }
}

impl ScraperConfig {
    /// Overlay the values present in a loaded config file.
    pub fn apply_file(&mut self, file: &ConfigFile) -> Result<(), ScrapeError> {
        if let Some(portal) = &file.portal {
            if let Some(url) = &portal.search_url {
                self.form.url = url.clone();
            }
            if let Some(category) = &portal.category {
                self.portal.category = category.clone();
            }
            if let Some(query) = &portal.query_text {
                self.portal.query_text = query.clone();
            }
            if let Some(max_pages) = portal.max_pages {
                self.portal.max_pages = max_pages;
            }
            if let Some(rate) = portal.detail_pages_per_second {
                self.portal.detail_pages_per_second = rate;
            }
            if let Some(pattern) = &portal.document_url_pattern {
                regex::Regex::new(pattern)?;
                self.portal.document_url_pattern = pattern.clone();
            }
            if let Some(mb) = portal.max_document_mb {
                self.portal.max_document_bytes = mb as usize * 1024 * 1024;
            }
        }

        if let Some(browser) = &file.browser {
            if browser.webdriver_url.is_some() {
                self.browser.webdriver_url = browser.webdriver_url.clone();
            }
            if let Some(path) = &browser.chromedriver_path {
                self.browser.chromedriver_path = path.clone();
            }
            if let Some(headless) = browser.headless {
                self.browser.headless = headless;
            }
            if let Some(agent) = &browser.user_agent {
                self.browser.user_agent = agent.clone();
            }
            if let Some(retries) = browser.launch_retries {
                self.browser.launch_retries = retries.max(1);
            }
        }

        if let Some(timeouts) = &file.timeouts {
            if let Some(secs) = timeouts.wait_secs {
                self.wait.timeout = Duration::from_secs(secs);
            }
            if let Some(ms) = timeouts.poll_ms {
                self.wait.poll_interval = Duration::from_millis(ms.max(10));
            }
            if let Some(secs) = timeouts.page_load_secs {
                self.browser.page_load_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = timeouts.document_fetch_secs {
                self.document_timeout = Duration::from_secs(secs);
            }
            if let Some(attempts) = timeouts.navigation_attempts {
                self.wait.navigation_attempts = attempts.max(1);
            }
        }

        if let Some(classifier) = &file.classifier {
            let mut builder = ParsingConfigBuilder::new();
            if let Some(threshold) = classifier.threshold {
                builder = builder.threshold(threshold);
            }
            if let Some(terms) = &classifier.extra_domain_terms {
                builder = builder.add_domain_terms(terms.clone());
            }
            if let Some(terms) = &classifier.extra_party_terms {
                builder = builder.add_party_terms(terms.clone());
            }
            if let Some(terms) = &classifier.extra_payment_terms {
                builder = builder.add_payment_terms(terms.clone());
            }
            self.parsing = builder.build()?;
        }
        Ok(())
    }
}
