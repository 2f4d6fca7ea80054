//! Turns a result reference into text, from a linked PDF when there is one
//! and from the detail page otherwise.

use std::sync::Arc;

use gazette_core::{ContentKind, PdfBackend, RawContent, ResultReference};
use regex::Regex;
use url::Url;

use crate::driver::{BrowserDriver, DriverError, WindowId};
use crate::fetch::{DocumentFetcher, FetchError};
use crate::pacing::PortalPacer;
use crate::wait::{WaitPolicy, navigate, wait_for_present};
use crate::{ItemError, ScrapeError};

pub const DEFAULT_DOCUMENT_URL_PATTERN: &str = r"(?i)(\.pdf\b|getPaginaDoDiario|/cdje/.*pdf)";

const INNER_TEXT_SCRIPT: &str = "return document.body ? document.body.innerText : '';";

fn item_error(e: DriverError, step: &str) -> ItemError {
    if e.is_session_lost() {
        ItemError::ContextLost(e)
    } else {
        ItemError::Unresolvable(format!("{step}: {e}"))
    }
}

pub struct ContentResolver {
    document_pattern: Regex,
    fetcher: Arc<dyn DocumentFetcher>,
    pdf: Arc<dyn PdfBackend>,
    pacer: Arc<PortalPacer>,
    wait: WaitPolicy,
}

impl ContentResolver {
    pub fn new(
        document_pattern: &str,
        fetcher: Arc<dyn DocumentFetcher>,
        pdf: Arc<dyn PdfBackend>,
        pacer: Arc<PortalPacer>,
        wait: WaitPolicy,
    ) -> Result<Self, ScrapeError> {
        Ok(Self {
            document_pattern: Regex::new(document_pattern)?,
            fetcher,
            pdf,
            pacer,
            wait,
        })
    }

    /// Open `reference` in a new tab and read its content.
    ///
    /// The results tab is restored before returning, whatever happened in
    /// the detail tab. If it cannot be restored the error is
    /// [`ItemError::ContextLost`], since pagination cannot continue.
    pub async fn resolve(
        &self,
        driver: &mut dyn BrowserDriver,
        reference: &ResultReference,
    ) -> Result<RawContent, ItemError> {
        let origin = driver
            .current_window()
            .await
            .map_err(ItemError::ContextLost)?;
        let detail = driver
            .open_window()
            .await
            .map_err(|e| item_error(e, "open tab"))?;

        let outcome = match driver.switch_to_window(&detail).await {
            Ok(()) => self.read_detail(driver, reference).await,
            Err(e) => Err(item_error(e, "switch to tab")),
        };

        match restore(driver, &origin, &detail).await {
            Ok(()) => outcome,
            Err(e) => {
                tracing::warn!(anchor = %reference.anchor, error = %e, "could not return to results");
                Err(ItemError::ContextLost(e))
            }
        }
    }

    async fn read_detail(
        &self,
        driver: &mut dyn BrowserDriver,
        reference: &ResultReference,
    ) -> Result<RawContent, ItemError> {
        self.pacer.wait().await;
        navigate(driver, &reference.anchor, self.wait)
            .await
            .map_err(|e| item_error(e, "navigate"))?;
        wait_for_present(driver, "body", self.wait)
            .await
            .map_err(ItemError::ContextLost)?;

        let current_url = driver
            .current_url()
            .await
            .map_err(|e| item_error(e, "read url"))?;
        let source = match driver.page_source().await {
            Ok(source) => source,
            Err(e) if e.is_session_lost() => return Err(ItemError::ContextLost(e)),
            Err(e) => {
                tracing::debug!(error = %e, "page source unavailable");
                String::new()
            }
        };

        if let Some(document_url) = self.find_document(&source, &current_url) {
            match self.document_text(driver, &document_url).await {
                Ok(text) => {
                    return Ok(RawContent {
                        source_url: document_url,
                        kind: ContentKind::LinkedPdf,
                        text,
                    });
                }
                Err(ItemError::ContextLost(e)) => return Err(ItemError::ContextLost(e)),
                Err(e) => {
                    tracing::warn!(document = %document_url, error = %e, "linked document unusable, using page text");
                }
            }
        }

        let text = self.inline_text(driver, &source).await?;
        if text.trim().is_empty() {
            return Err(ItemError::Unresolvable("detail page has no text".into()));
        }
        Ok(RawContent {
            source_url: current_url,
            kind: ContentKind::InlineHtml,
            text,
        })
    }

    /// The current URL when it is itself a document, else the first linked,
    /// framed or embedded URL that matches the document pattern.
    pub fn find_document(&self, source: &str, current_url: &str) -> Option<String> {
        if self.document_pattern.is_match(current_url) {
            return Some(current_url.to_string());
        }

        let html = scraper::Html::parse_document(source);
        let base = Url::parse(current_url).ok();
        for (css, attr) in [
            ("a[href]", "href"),
            ("iframe[src]", "src"),
            ("embed[src]", "src"),
            ("object[data]", "data"),
        ] {
            let Ok(selector) = scraper::Selector::parse(css) else {
                continue;
            };
            for element in html.select(&selector) {
                let Some(raw) = element.value().attr(attr) else {
                    continue;
                };
                let resolved = match &base {
                    Some(base) => base.join(raw.trim()).ok(),
                    None => Url::parse(raw.trim()).ok(),
                };
                if let Some(url) = resolved.map(String::from)
                    && self.document_pattern.is_match(&url)
                {
                    return Some(url);
                }
            }
        }
        None
    }

    async fn document_text(
        &self,
        driver: &mut dyn BrowserDriver,
        url: &str,
    ) -> Result<String, ItemError> {
        let cookies = match driver.cookie_header().await {
            Ok(cookies) => cookies,
            Err(e) if e.is_session_lost() => return Err(ItemError::ContextLost(e)),
            Err(_) => None,
        };

        self.pacer.wait().await;
        let bytes = match self.fetcher.fetch(url, cookies.as_deref()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if matches!(e, FetchError::Throttled(_)) {
                    self.pacer.on_throttled();
                }
                return Err(ItemError::Unresolvable(format!("fetch document: {e}")));
            }
        };

        let pdf = Arc::clone(&self.pdf);
        let text = tokio::task::spawn_blocking(move || pdf.extract_text(&bytes))
            .await
            .map_err(|e| ItemError::Unresolvable(format!("extraction task: {e}")))?
            .map_err(|e| ItemError::Unresolvable(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(ItemError::Unresolvable("document text is blank".into()));
        }
        Ok(text)
    }

    async fn inline_text(
        &self,
        driver: &mut dyn BrowserDriver,
        source: &str,
    ) -> Result<String, ItemError> {
        match driver.execute(INNER_TEXT_SCRIPT, Vec::new()).await {
            Ok(serde_json::Value::String(text)) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {}
            Err(e) if e.is_session_lost() => return Err(ItemError::ContextLost(e)),
            Err(e) => tracing::debug!(error = %e, "innerText unavailable, parsing source"),
        }
        Ok(visible_text(source))
    }
}

/// Close the detail tab (best effort) and switch back to the results tab.
async fn restore(
    driver: &mut dyn BrowserDriver,
    origin: &WindowId,
    detail: &WindowId,
) -> Result<(), DriverError> {
    match driver.switch_to_window(detail).await {
        Ok(()) => {
            if let Err(e) = driver.close_window().await {
                tracing::debug!(error = %e, "could not close detail tab");
            }
        }
        Err(e) => tracing::debug!(error = %e, "detail tab already gone"),
    }
    driver.switch_to_window(origin).await
}

/// Text nodes of the document outside `head`, `script` and `style`, one per line.
pub fn visible_text(source: &str) -> String {
    let html = scraper::Html::parse_document(source);
    let mut lines: Vec<String> = Vec::new();
    for node in html.tree.root().descendants() {
        let scraper::Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            matches!(a.value(), scraper::Node::Element(e)
                if matches!(e.name(), "head" | "script" | "style" | "noscript"))
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines.join("\n")
}
