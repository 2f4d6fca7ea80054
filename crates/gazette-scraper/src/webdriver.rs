//! [`BrowserDriver`] over a WebDriver session (fantoccini), with a launcher
//! that spawns chromedriver or attaches to an existing server.

use std::collections::HashMap;
use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;

use fantoccini::error::CmdError;
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Map, Value, json};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

use crate::config::BrowserSettings;
use crate::driver::{
    BrowserDriver, DriverError, DriverFuture, DriverLauncher, ElementId, LaunchFuture, ScriptArg,
    WindowId,
};

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});";

/// Element handles are dropped wholesale past this size; stale ids then
/// report `Stale` like any other dead reference.
const MAX_TRACKED_ELEMENTS: usize = 4096;

fn classify(e: CmdError) -> DriverError {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if [
        "invalid session id",
        "session deleted",
        "disconnected",
        "chrome not reachable",
        "connection refused",
        "connection reset",
        "broken pipe",
    ]
    .iter()
    .any(|m| lower.contains(m))
    {
        DriverError::SessionLost(message)
    } else if lower.contains("no such element") {
        DriverError::NotFound(message)
    } else if lower.contains("not interactable") || lower.contains("click intercepted") {
        DriverError::NotInteractable(message)
    } else if lower.contains("stale element") {
        DriverError::Stale(message)
    } else if lower.contains("javascript error") {
        DriverError::Script(message)
    } else {
        DriverError::Other(message)
    }
}

fn locator(selector: &str) -> Locator<'_> {
    match selector.strip_prefix("xpath:") {
        Some(xpath) => Locator::XPath(xpath),
        None => Locator::Css(selector),
    }
}

/// A live WebDriver session, plus the chromedriver process when we own it.
pub struct WebDriverBrowser {
    client: Client,
    process: Option<Child>,
    page_load_timeout: Duration,
    elements: HashMap<String, fantoccini::elements::Element>,
    windows: HashMap<String, WindowHandle>,
    next_id: u64,
}

impl WebDriverBrowser {
    pub fn new(client: Client, process: Option<Child>, page_load_timeout: Duration) -> Self {
        Self {
            client,
            process,
            page_load_timeout,
            elements: HashMap::new(),
            windows: HashMap::new(),
            next_id: 0,
        }
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn track_element(&mut self, element: fantoccini::elements::Element) -> ElementId {
        if self.elements.len() >= MAX_TRACKED_ELEMENTS {
            self.elements.clear();
        }
        let id = self.fresh_id("el");
        self.elements.insert(id.clone(), element);
        ElementId(id)
    }

    fn element(&self, id: &ElementId) -> Result<fantoccini::elements::Element, DriverError> {
        self.elements
            .get(&id.0)
            .cloned()
            .ok_or_else(|| DriverError::Stale(format!("unknown element {}", id.0)))
    }

    fn window_id(&mut self, handle: WindowHandle) -> WindowId {
        if let Some((id, _)) = self.windows.iter().find(|(_, h)| **h == handle) {
            return WindowId(id.clone());
        }
        let id = self.fresh_id("win");
        self.windows.insert(id.clone(), handle);
        WindowId(id)
    }

    async fn do_goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.elements.clear();
        match timeout(self.page_load_timeout, self.client.goto(url)).await {
            Ok(result) => result.map_err(|e| match classify(e) {
                lost @ DriverError::SessionLost(_) => lost,
                other => DriverError::Navigation(other.to_string()),
            }),
            Err(_) => Err(DriverError::Navigation(format!(
                "page load exceeded {}s: {url}",
                self.page_load_timeout.as_secs()
            ))),
        }
    }

    async fn do_find(&mut self, selector: &str) -> Result<Option<ElementId>, DriverError> {
        let found = self
            .client
            .find_all(locator(selector))
            .await
            .map_err(classify)?;
        Ok(found.into_iter().next().map(|e| self.track_element(e)))
    }

    async fn do_is_ready(&mut self, id: &ElementId) -> Result<bool, DriverError> {
        let element = self.element(id)?;
        Ok(element.is_displayed().await.map_err(classify)?
            && element.is_enabled().await.map_err(classify)?)
    }

    async fn do_clear_and_type(&mut self, id: &ElementId, text: &str) -> Result<(), DriverError> {
        let element = self.element(id)?;
        element.clear().await.map_err(classify)?;
        element.send_keys(text).await.map_err(classify)
    }

    async fn do_execute(
        &mut self,
        script: &str,
        args: Vec<ScriptArg>,
    ) -> Result<Value, DriverError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(match arg {
                ScriptArg::Element(id) => serde_json::to_value(self.element(&id)?)
                    .map_err(|e| DriverError::Script(e.to_string()))?,
                ScriptArg::Value(value) => value,
            });
        }
        self.client.execute(script, values).await.map_err(classify)
    }

    async fn do_current_window(&mut self) -> Result<WindowId, DriverError> {
        let handle = self.client.window().await.map_err(classify)?;
        Ok(self.window_id(handle))
    }

    async fn do_windows(&mut self) -> Result<Vec<WindowId>, DriverError> {
        let handles = self.client.windows().await.map_err(classify)?;
        Ok(handles.into_iter().map(|h| self.window_id(h)).collect())
    }

    async fn do_open_window(&mut self) -> Result<WindowId, DriverError> {
        let created = self.client.new_window(true).await.map_err(classify)?;
        Ok(self.window_id(created.handle))
    }

    async fn do_switch(&mut self, id: &WindowId) -> Result<(), DriverError> {
        let handle = self
            .windows
            .get(&id.0)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("unknown window {}", id.0)))?;
        self.client.switch_to_window(handle).await.map_err(classify)
    }

    async fn do_close_window(&mut self) -> Result<(), DriverError> {
        let current = self.client.window().await.map_err(classify)?;
        self.client.close_window().await.map_err(classify)?;
        self.windows.retain(|_, h| *h != current);
        Ok(())
    }

    async fn do_cookie_header(&mut self) -> Result<Option<String>, DriverError> {
        let cookies = self.client.get_all_cookies().await.map_err(classify)?;
        if cookies.is_empty() {
            return Ok(None);
        }
        let header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Some(header))
    }

    async fn do_is_alive(&mut self) -> Result<bool, DriverError> {
        if let Some(process) = self.process.as_mut()
            && matches!(process.try_wait(), Ok(Some(_)))
        {
            return Ok(false);
        }
        Ok(self.client.window().await.is_ok())
    }
}

impl BrowserDriver for WebDriverBrowser {
    fn goto<'a>(&'a mut self, url: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.do_goto(url))
    }

    fn current_url(&mut self) -> DriverFuture<'_, String> {
        Box::pin(async move {
            let url = self.client.current_url().await.map_err(classify)?;
            Ok(url.to_string())
        })
    }

    fn page_source(&mut self) -> DriverFuture<'_, String> {
        Box::pin(async move { self.client.source().await.map_err(classify) })
    }

    fn find_optional<'a>(&'a mut self, selector: &'a str) -> DriverFuture<'a, Option<ElementId>> {
        Box::pin(self.do_find(selector))
    }

    fn is_ready<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, bool> {
        Box::pin(self.do_is_ready(element))
    }

    fn click<'a>(&'a mut self, element: &'a ElementId) -> DriverFuture<'a, ()> {
        Box::pin(async move { self.element(element)?.click().await.map_err(classify) })
    }

    fn clear_and_type<'a>(
        &'a mut self,
        element: &'a ElementId,
        text: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(self.do_clear_and_type(element, text))
    }

    fn select_by_value<'a>(
        &'a mut self,
        element: &'a ElementId,
        value: &'a str,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.element(element)?
                .select_by_value(value)
                .await
                .map_err(classify)
        })
    }

    fn execute<'a>(
        &'a mut self,
        script: &'a str,
        args: Vec<ScriptArg>,
    ) -> DriverFuture<'a, Value> {
        Box::pin(self.do_execute(script, args))
    }

    fn current_window(&mut self) -> DriverFuture<'_, WindowId> {
        Box::pin(self.do_current_window())
    }

    fn windows(&mut self) -> DriverFuture<'_, Vec<WindowId>> {
        Box::pin(self.do_windows())
    }

    fn open_window(&mut self) -> DriverFuture<'_, WindowId> {
        Box::pin(self.do_open_window())
    }

    fn switch_to_window<'a>(&'a mut self, window: &'a WindowId) -> DriverFuture<'a, ()> {
        Box::pin(self.do_switch(window))
    }

    fn close_window(&mut self) -> DriverFuture<'_, ()> {
        Box::pin(self.do_close_window())
    }

    fn cookie_header(&mut self) -> DriverFuture<'_, Option<String>> {
        Box::pin(self.do_cookie_header())
    }

    fn is_alive(&mut self) -> DriverFuture<'_, bool> {
        Box::pin(self.do_is_alive())
    }

    fn quit(
        self: Box<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send>> {
        Box::pin(async move {
            let this = *self;
            let closed = this.client.close().await.map_err(classify);
            if let Some(mut process) = this.process
                && let Err(e) = process.kill().await
            {
                tracing::debug!(error = %e, "chromedriver already exited");
            }
            closed
        })
    }
}

/// Chrome capabilities for a scraping session.
pub fn chrome_capabilities(settings: &BrowserSettings) -> Map<String, Value> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--window-size=1920,1080".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={}", settings.user_agent),
    ];
    if settings.headless {
        args.push("--headless=new".to_string());
    }

    let mut caps = Map::new();
    caps.insert("browserName".to_string(), json!("chrome"));
    caps.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
            "useAutomationExtension": false,
        }),
    );
    caps
}

fn free_port() -> Result<u16, DriverError> {
    let listener =
        TcpListener::bind("127.0.0.1:0").map_err(|e| DriverError::Launch(e.to_string()))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| DriverError::Launch(e.to_string()))
}

/// Launches [`WebDriverBrowser`] sessions.
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self, url: &str) -> Result<Client, DriverError> {
        ClientBuilder::native()
            .capabilities(chrome_capabilities(&self.settings))
            .connect(url)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))
    }

    async fn spawn_chromedriver(&self) -> Result<(Client, Child), DriverError> {
        let port = free_port()?;
        let mut child = Command::new(&self.settings.chromedriver_path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Launch(format!("{}: {e}", self.settings.chromedriver_path))
            })?;

        let url = format!("http://127.0.0.1:{port}");
        let deadline = Instant::now() + self.settings.startup_timeout;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(DriverError::Launch(format!("chromedriver exited: {status}")));
            }
            match self.connect(&url).await {
                Ok(client) => return Ok((client, child)),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(e) => {
                    tracing::trace!(error = %e, "chromedriver not ready yet");
                    sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    async fn start(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let (client, process) = match &self.settings.webdriver_url {
            Some(url) => {
                tracing::debug!(url, "attaching to webdriver");
                (self.connect(url).await?, None)
            }
            None => {
                let (client, child) = self.spawn_chromedriver().await?;
                (client, Some(child))
            }
        };

        if let Err(e) = client.execute(HIDE_WEBDRIVER, Vec::new()).await {
            tracing::debug!(error = %e, "could not mask navigator.webdriver");
        }
        Ok(Box::new(WebDriverBrowser::new(
            client,
            process,
            self.settings.page_load_timeout,
        )))
    }
}

impl DriverLauncher for ChromeLauncher {
    fn launch(&self) -> LaunchFuture<'_> {
        Box::pin(self.start())
    }
}
