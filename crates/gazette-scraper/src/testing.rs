//! Scripted test doubles for the browser and document seams.
//!
//! [`ScriptedPortal`] imitates the gazette portal closely enough for the
//! form, pagination and resolver code to run unchanged: a search form, a
//! paginated results listing in the portal's markup and one detail page
//! per result, optionally linking a PDF. Failure modes are switched on
//! through [`PortalScript`]; everything the engine did is recorded in the
//! shared [`PortalLog`].

use std::collections::{HashMap, HashSet};
use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use gazette_core::{BackendError, PdfBackend};
use serde_json::Value;

use crate::driver::{
    BrowserDriver, DriverError, DriverFuture, DriverLauncher, ElementId, LaunchFuture, ScriptArg,
    WindowId,
};
use crate::fetch::{DocumentFetcher, FetchError, FetchFuture};
use crate::form::SearchForm;
use crate::interaction::InteractionStrategy;
use crate::pagination::ResultsLayout;

pub const PORTAL_ORIGIN: &str = "https://dje.tjsp.jus.br";

/// URL of the detail page of item `item` on the 0-based results page `page`.
pub fn detail_url(page: usize, item: usize) -> String {
    format!("{PORTAL_ORIGIN}/cdje/detail.do?item={page}-{item}")
}

/// URL of the PDF linked from that detail page, when it has one.
pub fn document_url(page: usize, item: usize) -> String {
    format!("{PORTAL_ORIGIN}/cdje/getPaginaDoDiario.do?item={page}-{item}")
}

/// One result's detail page.
#[derive(Debug, Clone, Default)]
pub struct DetailPage {
    /// Visible text of the page itself.
    pub text: String,
    /// Text of a linked PDF, served through [`StaticDocuments`].
    pub document: Option<String>,
}

impl DetailPage {
    pub fn inline(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document: None,
        }
    }

    pub fn pdf(document_text: impl Into<String>) -> Self {
        Self {
            text: "Clique para visualizar o documento".to_string(),
            document: Some(document_text.into()),
        }
    }
}

/// What the scripted portal serves and how it misbehaves.
#[derive(Debug, Clone, Default)]
pub struct PortalScript {
    pub pages: Vec<Vec<DetailPage>>,
    /// Form selectors whose element is found but never displayed.
    pub never_ready: HashSet<String>,
    /// Selectors that reject native WebDriver interaction.
    pub direct_fails: HashSet<String>,
    /// Selectors that also reject `Scripted` interaction.
    pub scripted_fails: HashSet<String>,
    /// Kill the session when the n-th (1-based, across sessions) detail
    /// page is navigated to.
    pub kill_on_detail: Option<usize>,
    /// Launch attempts that fail before launches start succeeding.
    pub launch_failures: u32,
    /// The first `fail_gotos` loads of every URL time out.
    pub fail_gotos: usize,
}

impl PortalScript {
    pub fn new(pages: Vec<Vec<DetailPage>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// `page_count` pages of `per_page` inline items each.
    pub fn uniform(page_count: usize, per_page: usize) -> Self {
        let pages = (0..page_count)
            .map(|p| {
                (0..per_page)
                    .map(|i| DetailPage::inline(format!("Publicação {p}-{i}")))
                    .collect()
            })
            .collect();
        Self::new(pages)
    }

    /// PDF bodies for every detail page that links one, keyed by URL.
    pub fn documents(&self) -> HashMap<String, Vec<u8>> {
        let mut documents = HashMap::new();
        for (p, page) in self.pages.iter().enumerate() {
            for (i, detail) in page.iter().enumerate() {
                if let Some(text) = &detail.document {
                    documents.insert(document_url(p, i), format!("%PDF-1.4\n{text}").into_bytes());
                }
            }
        }
        documents
    }
}

/// Everything the engine did to the scripted portal.
#[derive(Debug, Clone, Default)]
pub struct PortalLog {
    /// `(selector, strategy)` of every successful interaction.
    pub interactions: Vec<(String, InteractionStrategy)>,
    /// Last value set per form selector.
    pub form_values: HashMap<String, String>,
    pub submissions: usize,
    /// Every `goto`, failed or not.
    pub navigations: usize,
    pub details_opened: Vec<String>,
    /// Most windows open at once in any session.
    pub max_windows: usize,
    pub launches: usize,
    pub quits: usize,
}

#[derive(Debug, Default)]
struct Shared {
    log: PortalLog,
    sessions: Vec<Arc<AtomicBool>>,
    loads_per_url: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Blank,
    Form,
    Results(usize),
    Detail(usize, usize),
    Elsewhere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    FormField(String),
    NextPage,
    Container,
    Body,
}

/// A [`BrowserDriver`] serving a [`PortalScript`].
pub struct ScriptedPortal {
    script: Arc<PortalScript>,
    shared: Arc<Mutex<Shared>>,
    alive: Arc<AtomicBool>,
    form: SearchForm,
    layout: ResultsLayout,
    windows: Vec<(WindowId, Location)>,
    current: Option<WindowId>,
    elements: HashMap<String, Target>,
    next_id: u64,
}

impl ScriptedPortal {
    pub fn new(script: PortalScript) -> Self {
        Self::with_shared(Arc::new(script), Arc::new(Mutex::new(Shared::default())))
    }

    fn with_shared(script: Arc<PortalScript>, shared: Arc<Mutex<Shared>>) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        shared.lock().unwrap().sessions.push(Arc::clone(&alive));
        let first = WindowId("win-0".to_string());
        Self {
            script,
            shared,
            alive,
            form: SearchForm::default(),
            layout: ResultsLayout::default(),
            windows: vec![(first.clone(), Location::Blank)],
            current: Some(first),
            elements: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn log(&self) -> PortalLog {
        self.shared.lock().unwrap().log.clone()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// True when the current window shows a results page.
    pub fn on_results(&self) -> bool {
        matches!(self.location(), Some(Location::Results(_)))
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    // ── internals ──

    fn check_alive(&self) -> Result<(), DriverError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::SessionLost("scripted session killed".into()))
        }
    }

    fn location(&self) -> Option<Location> {
        let current = self.current.as_ref()?;
        self.windows
            .iter()
            .find(|(id, _)| id == current)
            .map(|(_, loc)| *loc)
    }

    fn set_location(&mut self, location: Location) -> Result<(), DriverError> {
        let current = self
            .current
            .clone()
            .ok_or_else(|| DriverError::Other("no such window".into()))?;
        if let Some(entry) = self.windows.iter_mut().find(|(id, _)| *id == current) {
            entry.1 = location;
        }
        Ok(())
    }

    fn require_location(&self) -> Result<Location, DriverError> {
        self.check_alive()?;
        self.location()
            .ok_or_else(|| DriverError::Other("no such window".into()))
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn form_selectors(&self) -> [&str; 5] {
        [
            &self.form.start_date,
            &self.form.end_date,
            &self.form.category,
            &self.form.query,
            &self.form.submit,
        ]
    }

    fn target(&self, element: &ElementId) -> Result<Target, DriverError> {
        self.elements
            .get(&element.0)
            .cloned()
            .ok_or_else(|| DriverError::Stale(element.0.clone()))
    }

    fn sync_goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.require_location()?;
        let loads = {
            let mut shared = self.shared.lock().unwrap();
            shared.log.navigations += 1;
            let loads = shared.loads_per_url.entry(url.to_string()).or_default();
            *loads += 1;
            *loads
        };
        if loads <= self.script.fail_gotos {
            return Err(DriverError::Navigation(format!("page load of {url} exceeded 60s")));
        }
        self.elements.clear();
        if url == self.form.url {
            return self.set_location(Location::Form);
        }
        let detail = url
            .strip_prefix(&format!("{PORTAL_ORIGIN}/cdje/detail.do?item="))
            .and_then(|rest| rest.split_once('-'))
            .and_then(|(p, i)| Some((p.parse::<usize>().ok()?, i.parse::<usize>().ok()?)));
        let Some((page, item)) = detail else {
            return self.set_location(Location::Elsewhere);
        };

        let opened = {
            let mut shared = self.shared.lock().unwrap();
            shared.log.details_opened.push(url.to_string());
            shared.log.details_opened.len()
        };
        if self.script.kill_on_detail == Some(opened) {
            self.kill();
            return Err(DriverError::SessionLost("browser crashed on detail page".into()));
        }
        self.set_location(Location::Detail(page, item))
    }

    fn sync_current_url(&self) -> Result<String, DriverError> {
        Ok(match self.require_location()? {
            Location::Blank => "about:blank".to_string(),
            Location::Form | Location::Results(_) => self.form.url.clone(),
            Location::Detail(p, i) => detail_url(p, i),
            Location::Elsewhere => format!("{PORTAL_ORIGIN}/elsewhere"),
        })
    }

    fn sync_page_source(&self) -> Result<String, DriverError> {
        Ok(match self.require_location()? {
            Location::Results(page) => self.results_html(page),
            Location::Detail(p, i) => {
                let detail = self
                    .script
                    .pages
                    .get(p)
                    .and_then(|items| items.get(i))
                    .cloned()
                    .unwrap_or_default();
                let link = if detail.document.is_some() {
                    format!("<a href=\"/cdje/getPaginaDoDiario.do?item={p}-{i}\"></a>")
                } else {
                    String::new()
                };
                format!(
                    "<html><head><title>DJE</title></head><body><div>{}</div>{link}</body></html>",
                    detail.text
                )
            }
            Location::Form => "<html><body><form name=\"consultaAvancadaForm\"></form></body></html>"
                .to_string(),
            Location::Blank | Location::Elsewhere => "<html><body></body></html>".to_string(),
        })
    }

    fn results_html(&self, page: usize) -> String {
        let rows: String = self
            .script
            .pages
            .get(page)
            .map(|items| {
                (0..items.len())
                    .map(|i| {
                        format!(
                            "<tr class=\"fundocinza1\"><td><table><tr class=\"ementaClass\"><td>\
                             <a href=\"#\" onclick=\"return popup('/cdje/detail.do?item={page}-{i}');\">item</a>\
                             </td></tr></table></td></tr>"
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        format!(
            "<html><body><div id=\"divResultadosInferior\"><table>{rows}</table>\
             <a href=\"#\">Próximo</a></div></body></html>"
        )
    }

    fn sync_find(&mut self, selector: &str) -> Result<Option<ElementId>, DriverError> {
        let target = match self.require_location()? {
            Location::Form if self.form_selectors().contains(&selector) => {
                Some(Target::FormField(selector.to_string()))
            }
            Location::Results(_) if selector == self.layout.container => {
                (!self.script.pages.is_empty()).then_some(Target::Container)
            }
            Location::Results(page) if selector == self.layout.next_page => {
                (page + 1 < self.script.pages.len()).then_some(Target::NextPage)
            }
            Location::Detail(..) if selector == "body" => Some(Target::Body),
            _ => None,
        };
        Ok(target.map(|t| {
            let id = self.fresh_id("el");
            self.elements.insert(id.clone(), t);
            ElementId(id)
        }))
    }

    fn sync_is_ready(&self, element: &ElementId) -> Result<bool, DriverError> {
        self.check_alive()?;
        Ok(match self.target(element)? {
            Target::FormField(selector) => !self.script.never_ready.contains(&selector),
            _ => true,
        })
    }

    fn selector_of(target: &Target) -> String {
        match target {
            Target::FormField(selector) => selector.clone(),
            Target::NextPage => "next_page".to_string(),
            Target::Container => "container".to_string(),
            Target::Body => "body".to_string(),
        }
    }

    /// Apply an interaction that got past the failure checks.
    fn perform(
        &mut self,
        target: &Target,
        strategy: InteractionStrategy,
        value: Option<&str>,
    ) -> Result<(), DriverError> {
        let selector = Self::selector_of(target);
        {
            let mut shared = self.shared.lock().unwrap();
            shared.log.interactions.push((selector.clone(), strategy));
            if let Some(value) = value {
                shared.log.form_values.insert(selector.clone(), value.to_string());
            }
        }
        match (target, value) {
            (Target::FormField(s), None) if *s == self.form.submit => {
                self.shared.lock().unwrap().log.submissions += 1;
                self.elements.clear();
                self.set_location(Location::Results(0))
            }
            (Target::NextPage, None) => {
                let Some(Location::Results(page)) = self.location() else {
                    return Err(DriverError::Stale("next_page".into()));
                };
                self.elements.clear();
                self.set_location(Location::Results(page + 1))
            }
            _ => Ok(()),
        }
    }

    fn interact_direct(
        &mut self,
        element: &ElementId,
        value: Option<&str>,
    ) -> Result<(), DriverError> {
        self.check_alive()?;
        let target = self.target(element)?;
        let selector = Self::selector_of(&target);
        if self.script.direct_fails.contains(&selector) {
            return Err(DriverError::NotInteractable(selector));
        }
        self.perform(&target, InteractionStrategy::Direct, value)
    }

    fn sync_execute(&mut self, script: &str, args: Vec<ScriptArg>) -> Result<Value, DriverError> {
        let location = self.require_location()?;
        if script.contains("innerText") {
            return Ok(match location {
                Location::Detail(p, i) => Value::String(
                    self.script
                        .pages
                        .get(p)
                        .and_then(|items| items.get(i))
                        .map(|d| d.text.clone())
                        .unwrap_or_default(),
                ),
                _ => Value::String(String::new()),
            });
        }

        let mut args = args.into_iter();
        let Some(ScriptArg::Element(element)) = args.next() else {
            return Ok(Value::Null);
        };
        let value = match args.next() {
            Some(ScriptArg::Value(Value::String(v))) => Some(v),
            _ => None,
        };

        let target = self.target(&element)?;
        let selector = Self::selector_of(&target);
        let strategy = if script.contains("dispatchEvent") {
            InteractionStrategy::SyntheticEvent
        } else {
            InteractionStrategy::Scripted
        };
        if strategy == InteractionStrategy::Scripted && self.script.scripted_fails.contains(&selector)
        {
            return Err(DriverError::Script(format!("{selector} ignored scripted input")));
        }
        self.perform(&target, strategy, value.as_deref())?;
        Ok(Value::Null)
    }

    fn sync_open_window(&mut self) -> Result<WindowId, DriverError> {
        self.check_alive()?;
        let id = WindowId(self.fresh_id("win"));
        self.windows.push((id.clone(), Location::Blank));
        let mut shared = self.shared.lock().unwrap();
        shared.log.max_windows = shared.log.max_windows.max(self.windows.len());
        Ok(id)
    }

    fn sync_switch(&mut self, window: &WindowId) -> Result<(), DriverError> {
        self.check_alive()?;
        if !self.windows.iter().any(|(id, _)| id == window) {
            return Err(DriverError::NotFound(format!("no such window {}", window.0)));
        }
        self.elements.clear();
        self.current = Some(window.clone());
        Ok(())
    }

    fn sync_close_window(&mut self) -> Result<(), DriverError> {
        self.check_alive()?;
        let current = self
            .current
            .take()
            .ok_or_else(|| DriverError::Other("no such window".into()))?;
        self.windows.retain(|(id, _)| *id != current);
        Ok(())
    }
}

type QuitFuture = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send>>;

impl BrowserDriver for ScriptedPortal {
    fn goto<'a>(&'a mut self, url: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.sync_goto(url)))
    }

    fn current_url(&mut self) -> DriverFuture<'_, String> {
        Box::pin(ready(self.sync_current_url()))
    }

    fn page_source(&mut self) -> DriverFuture<'_, String> {
        Box::pin(ready(self.sync_page_source()))
    }

    fn find_optional<'a>(&'a mut self, selector: &'a str) -> DriverFuture<'a, Option<ElementId>> {
        Box::pin(ready(self.sync_find(selector)))
    }

    fn is_ready<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, bool> {
        Box::pin(ready(self.sync_is_ready(element)))
    }

    fn click<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.interact_direct(element, None)))
    }

    fn clear_and_type<'a>(
        &'a mut self,
        element: &'a ElementId,
        text: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.interact_direct(element, Some(text))))
    }

    fn select_by_value<'a>(
        &'a mut self,
        element: &'a ElementId,
        value: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.interact_direct(element, Some(value))))
    }

    fn execute<'a>(&'a mut self, script: &'a str, args: Vec<ScriptArg>) -> DriverFuture<'a, Value> {
        Box::pin(ready(self.sync_execute(script, args)))
    }

    fn current_window(&mut self) -> DriverFuture<'_, WindowId> {
        let result = self.check_alive().and_then(|()| {
            self.current
                .clone()
                .ok_or_else(|| DriverError::Other("no such window".into()))
        });
        Box::pin(ready(result))
    }

    fn windows(&mut self) -> DriverFuture<'_, Vec<WindowId>> {
        let result = self
            .check_alive()
            .map(|()| self.windows.iter().map(|(id, _)| id.clone()).collect());
        Box::pin(ready(result))
    }

    fn open_window(&mut self) -> DriverFuture<'_, WindowId> {
        Box::pin(ready(self.sync_open_window()))
    }

    fn switch_to_window<'a>(&'a mut self, window: &'a WindowId) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.sync_switch(window)))
    }

    fn close_window(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(ready(self.sync_close_window()))
    }

    fn cookie_header(&mut self) -> DriverFuture<'_, Option<String>> {
        let result = self
            .check_alive()
            .map(|()| Some("JSESSIONID=scripted".to_string()));
        Box::pin(ready(result))
    }

    fn is_alive(&mut self) -> DriverFuture<'_, bool> {
        Box::pin(ready(Ok(self.alive.load(Ordering::SeqCst))))
    }

    fn quit(self: Box<Self>) -> QuitFuture {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.lock().unwrap().log.quits += 1;
        Box::pin(ready(Ok(())))
    }
}

/// Launches [`ScriptedPortal`] sessions that share one script and log.
pub struct ScriptedLauncher {
    script: Arc<PortalScript>,
    shared: Arc<Mutex<Shared>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new(script: PortalScript) -> Self {
        let failures = script.launch_failures;
        Self {
            script: Arc::new(script),
            shared: Arc::new(Mutex::new(Shared::default())),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Launch attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> PortalLog {
        self.shared.lock().unwrap().log.clone()
    }

    /// Kill the most recently launched session, as if the browser crashed.
    pub fn kill_current(&self) {
        if let Some(alive) = self.shared.lock().unwrap().sessions.last() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Make the next `n` launch attempts fail.
    pub fn fail_next_launches(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

impl DriverLauncher for ScriptedLauncher {
    fn launch(&self) -> LaunchFuture<'_> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result: Result<Box<dyn BrowserDriver>, DriverError> = if failed {
            Err(DriverError::Launch("chromedriver did not start".into()))
        } else {
            let portal = ScriptedPortal::with_shared(Arc::clone(&self.script), Arc::clone(&self.shared));
            self.shared.lock().unwrap().log.launches += 1;
            Ok(Box::new(portal))
        };
        Box::pin(ready(result))
    }
}

/// [`DocumentFetcher`] over an in-memory map of URL to bytes.
#[derive(Debug, Default)]
pub struct StaticDocuments {
    documents: HashMap<String, Vec<u8>>,
    throttled: HashSet<String>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl StaticDocuments {
    pub fn new(documents: HashMap<String, Vec<u8>>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    /// Answer requests for `url` with HTTP 429.
    pub fn throttle(mut self, url: impl Into<String>) -> Self {
        self.throttled.insert(url.into());
        self
    }

    /// `(url, cookie header)` of every request.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl DocumentFetcher for StaticDocuments {
    fn fetch<'a>(&'a self, url: &'a str, cookies: Option<&'a str>) -> FetchFuture<'a> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), cookies.map(str::to_string)));
        let result = if self.throttled.contains(url) {
            Err(FetchError::Throttled(429))
        } else {
            self.documents.get(url).cloned().ok_or(FetchError::Status(404))
        };
        Box::pin(ready(result))
    }
}

/// [`PdfBackend`] that reads the bytes after the `%PDF-x.y` line as text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextPdf;

impl PdfBackend for PlainTextPdf {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, BackendError> {
        let text = String::from_utf8_lossy(bytes);
        let body = text
            .strip_prefix("%PDF-")
            .ok_or_else(|| BackendError::OpenError("missing PDF header".into()))?;
        Ok(body.split_once('\n').map(|(_, rest)| rest).unwrap_or("").to_string())
    }
}
