//! Lazy traversal of the search results pages.

use std::collections::VecDeque;

use gazette_core::ResultReference;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::ScrapeError;
use crate::driver::{BrowserDriver, DriverError};
use crate::interaction::{Action, InteractionError, InteractionPolicy, interact};
use crate::wait::WaitPolicy;

pub const DEFAULT_MAX_PAGES: usize = 200;

/// Selectors describing the results listing. `container`, `item` and
/// `anchor` must be CSS (they are also matched against the page source);
/// `next_page` may use the `xpath:` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsLayout {
    pub container: String,
    pub item: String,
    pub anchor: String,
    pub next_page: String,
}

impl Default for ResultsLayout {
    fn default() -> Self {
        Self {
            container: "#divResultadosInferior".to_string(),
            item: "tr.fundocinza1".to_string(),
            anchor: "tr.ementaClass a".to_string(),
            next_page: "xpath://div[@id='divResultadosInferior']//a[contains(normalize-space(.), 'Próximo')]"
                .to_string(),
        }
    }
}

impl ResultsLayout {
    /// Check that the CSS selectors parse.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        for selector in [&self.container, &self.item, &self.anchor] {
            scraper::Selector::parse(selector).map_err(|e| ScrapeError::InvalidSelector {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Fresh,
    OnPage,
    Exhausted,
}

/// Yields [`ResultReference`]s page by page.
///
/// The walker only advances to the next page once every item of the
/// current page has been handed out, so callers must finish with an item
/// (and restore the results window) before asking for the next one.
pub struct PaginationWalker {
    layout: ResultsLayout,
    wait: WaitPolicy,
    interaction: InteractionPolicy,
    max_pages: usize,
    state: WalkState,
    page_index: usize,
    buffer: VecDeque<ResultReference>,
    last_signature: Option<String>,
    loaded: Option<(usize, usize)>,
}

impl PaginationWalker {
    pub fn new(
        layout: ResultsLayout,
        wait: WaitPolicy,
        interaction: InteractionPolicy,
        max_pages: usize,
    ) -> Result<Self, ScrapeError> {
        layout.validate()?;
        Ok(Self {
            layout,
            wait,
            interaction,
            max_pages: max_pages.max(1),
            state: WalkState::Fresh,
            page_index: 0,
            buffer: VecDeque::new(),
            last_signature: None,
            loaded: None,
        })
    }

    /// Start over from the first results page of a freshly submitted search.
    pub fn reset(&mut self) {
        self.state = WalkState::Fresh;
        self.page_index = 0;
        self.buffer.clear();
        self.last_signature = None;
        self.loaded = None;
    }

    /// 1-based index of the page currently being handed out (0 before the first).
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// `(page_index, items)` of a page read since the last call.
    pub fn take_loaded_page(&mut self) -> Option<(usize, usize)> {
        self.loaded.take()
    }

    pub async fn next(
        &mut self,
        driver: &mut dyn BrowserDriver,
    ) -> Result<Option<ResultReference>, ScrapeError> {
        loop {
            if let Some(reference) = self.buffer.pop_front() {
                return Ok(Some(reference));
            }
            match self.state {
                WalkState::Exhausted => return Ok(None),
                WalkState::Fresh => self.load_page(driver).await?,
                WalkState::OnPage => {
                    if self.advance(driver).await? {
                        self.load_page(driver).await?;
                    } else {
                        self.state = WalkState::Exhausted;
                    }
                }
            }
        }
    }

    /// Read the page that is (or is about to be) displayed. After a page
    /// change the old listing may still be on screen for a moment, so the
    /// page counts as loaded only once its first anchor differs from the
    /// previous page's.
    async fn load_page(&mut self, driver: &mut dyn BrowserDriver) -> Result<(), ScrapeError> {
        let page_index = self.page_index + 1;
        let deadline = Instant::now() + self.wait.timeout;

        loop {
            if lookup(driver.find_optional(&self.layout.container).await)?.flatten().is_some()
                && let Some(source) = lookup(driver.page_source().await)?
            {
                let base = lookup(driver.current_url().await)?.unwrap_or_default();
                let references = parse_results(&self.layout, &source, &base, page_index);
                let signature = references.first().map(|r| r.anchor.clone());

                if self.page_index == 0 || signature != self.last_signature {
                    if references.is_empty() {
                        if page_index == 1 {
                            tracing::info!("search returned no results");
                        } else {
                            tracing::debug!(page_index, "empty results page, stopping");
                        }
                        self.state = WalkState::Exhausted;
                        return Ok(());
                    }
                    tracing::debug!(page_index, items = references.len(), "results page loaded");
                    self.page_index = page_index;
                    self.last_signature = signature;
                    self.loaded = Some((page_index, references.len()));
                    self.buffer.extend(references);
                    self.state = WalkState::OnPage;
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                if page_index == 1 {
                    tracing::info!("results container never appeared, treating as no results");
                } else {
                    tracing::warn!(page_index, "results did not change after paging, stopping");
                }
                self.state = WalkState::Exhausted;
                return Ok(());
            }
            sleep(self.wait.poll_interval).await;
        }
    }

    async fn advance(&mut self, driver: &mut dyn BrowserDriver) -> Result<bool, ScrapeError> {
        if self.page_index >= self.max_pages {
            tracing::warn!(max_pages = self.max_pages, "page ceiling reached, stopping pagination");
            return Ok(false);
        }
        let Some(next) = lookup(driver.find_optional(&self.layout.next_page).await)?.flatten()
        else {
            tracing::debug!(page_index = self.page_index, "no next-page control, last page");
            return Ok(false);
        };
        match interact(driver, &next, Action::Click, &self.interaction).await {
            Ok(_) => Ok(true),
            Err(InteractionError::SessionLost { source, .. }) => Err(ScrapeError::Driver(source)),
            Err(e) => {
                tracing::warn!(page_index = self.page_index, error = %e, "next-page control would not activate, stopping");
                Ok(false)
            }
        }
    }
}

/// Lost sessions propagate; any other driver failure reads as "nothing yet".
fn lookup<T>(result: Result<T, DriverError>) -> Result<Option<T>, ScrapeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_session_lost() => Err(ScrapeError::Driver(e)),
        Err(e) => {
            tracing::trace!(error = %e, "results lookup failed");
            Ok(None)
        }
    }
}

/// Target of a result anchor: the `popup('...')`/`window.open('...')`
/// argument of its onclick handler, else a real `href`.
fn anchor_target(anchor: scraper::ElementRef<'_>) -> Option<String> {
    static POPUP_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?:popup|window\.open)\s*\(\s*['"]([^'"]+)['"]"#).unwrap()
    });

    if let Some(onclick) = anchor.value().attr("onclick")
        && let Some(caps) = POPUP_RE.captures(onclick)
    {
        return Some(caps[1].to_string());
    }
    let href = anchor.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    Some(href.to_string())
}

fn absolutize(target: &str, base: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(target).ok().map(String::from),
        Err(_) => Url::parse(target).ok().map(String::from),
    }
}

/// Collect one reference per result item, de-duplicated within the page.
pub fn parse_results(
    layout: &ResultsLayout,
    source: &str,
    base_url: &str,
    page_index: usize,
) -> Vec<ResultReference> {
    let (Ok(container_sel), Ok(item_sel), Ok(anchor_sel)) = (
        scraper::Selector::parse(&layout.container),
        scraper::Selector::parse(&layout.item),
        scraper::Selector::parse(&layout.anchor),
    ) else {
        return Vec::new();
    };

    let html = scraper::Html::parse_document(source);
    let mut anchors: Vec<String> = Vec::new();
    for container in html.select(&container_sel) {
        for item in container.select(&item_sel) {
            let target = item
                .select(&anchor_sel)
                .find_map(anchor_target)
                .and_then(|t| absolutize(&t, base_url));
            match target {
                Some(url) if !anchors.contains(&url) => anchors.push(url),
                Some(_) => {}
                None => tracing::debug!(page_index, "result item without a usable anchor"),
            }
        }
    }

    anchors
        .into_iter()
        .map(|anchor| ResultReference { page_index, anchor })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://dje.tjsp.jus.br/cdje/consultaAvancada.do";

    fn listing(rows: &str) -> String {
        format!(
            "<html><body><div id=\"divResultadosInferior\"><table>{rows}</table></div></body></html>"
        )
    }

    #[test]
    fn popup_and_href_targets_are_resolved() {
        let source = listing(
            "<tr class=\"fundocinza1\"><td><table>\
               <tr class=\"ementaClass\"><td><a href=\"#\" onclick=\"return popup('/cdje/consultaSimples.do?cdVolume=1&nuDiario=2');\">10/10/2024</a></td></tr>\
             </table></td></tr>\
             <tr class=\"fundocinza1\"><td><table>\
               <tr class=\"ementaClass\"><td><a href=\"getPaginaDoDiario.do?cdVolume=1&nuSeqpagina=7\">10/10/2024</a></td></tr>\
             </table></td></tr>",
        );
        let refs = parse_results(&ResultsLayout::default(), &source, BASE, 1);
        let anchors: Vec<&str> = refs.iter().map(|r| r.anchor.as_str()).collect();
        assert_eq!(
            anchors,
            vec![
                "https://dje.tjsp.jus.br/cdje/consultaSimples.do?cdVolume=1&nuDiario=2",
                "https://dje.tjsp.jus.br/cdje/getPaginaDoDiario.do?cdVolume=1&nuSeqpagina=7",
            ]
        );
        assert!(refs.iter().all(|r| r.page_index == 1));
    }

    #[test]
    fn duplicate_and_dead_anchors_are_dropped() {
        let row = "<tr class=\"fundocinza1\"><td><table><tr class=\"ementaClass\"><td>\
                   <a href=\"/cdje/a.do?id=1\">x</a></td></tr></table></td></tr>";
        let dead = "<tr class=\"fundocinza1\"><td><table><tr class=\"ementaClass\"><td>\
                    <a href=\"javascript:void(0)\">x</a></td></tr></table></td></tr>";
        let source = listing(&format!("{row}{row}{dead}"));
        let refs = parse_results(&ResultsLayout::default(), &source, BASE, 3);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].page_index, 3);
    }

    #[test]
    fn items_outside_the_container_are_ignored() {
        let source = "<html><body><table><tr class=\"fundocinza1\"><td><table>\
                      <tr class=\"ementaClass\"><td><a href=\"/x\">x</a></td></tr>\
                      </table></td></tr></table></body></html>";
        assert!(parse_results(&ResultsLayout::default(), source, BASE, 1).is_empty());
    }

    #[test]
    fn invalid_css_is_rejected_up_front() {
        let layout = ResultsLayout {
            item: "tr[".to_string(),
            ..ResultsLayout::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(ScrapeError::InvalidSelector { .. })
        ));
    }
}
