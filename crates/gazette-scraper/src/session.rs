//! Browser session lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::ScrapeError;
use crate::config::BrowserSettings;
use crate::driver::{BrowserDriver, DriverError, DriverLauncher};

/// Owns at most one live browser session and hands it out by `&mut`.
///
/// The session is created lazily by [`acquire`](Self::acquire), replaced
/// when it stops answering, and torn down by [`release`](Self::release).
pub struct SessionManager {
    launcher: Arc<dyn DriverLauncher>,
    launch_retries: u32,
    retry_backoff: Duration,
    max_recoveries: u32,
    driver: Option<Box<dyn BrowserDriver>>,
    launches: u32,
    recoveries: u32,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn DriverLauncher>, settings: &BrowserSettings) -> Self {
        Self {
            launcher,
            launch_retries: settings.launch_retries.max(1),
            retry_backoff: settings.retry_backoff,
            max_recoveries: settings.max_recoveries,
            driver: None,
            launches: 0,
            recoveries: 0,
        }
    }

    /// Successful launches so far.
    pub fn launches(&self) -> u32 {
        self.launches
    }

    /// Session losses recovered from since the last release.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    /// The live session, launching one if there is none or the current
    /// one fails its liveness probe.
    pub async fn acquire(&mut self) -> Result<&mut dyn BrowserDriver, ScrapeError> {
        let alive = match self.driver.as_mut() {
            Some(driver) => matches!(driver.is_alive().await, Ok(true)),
            None => false,
        };

        let driver = match self.driver.take() {
            Some(driver) if alive => driver,
            stale => {
                if let Some(stale) = stale {
                    tracing::warn!("browser session unresponsive, relaunching");
                    if let Err(e) = stale.quit().await {
                        tracing::debug!(error = %e, "quitting dead session failed");
                    }
                }
                self.launch().await?
            }
        };
        Ok(&mut **self.driver.insert(driver))
    }

    /// Replace the session after `cause` killed it. Each call counts
    /// against the per-run recovery budget.
    pub async fn recover(
        &mut self,
        cause: &DriverError,
    ) -> Result<&mut dyn BrowserDriver, ScrapeError> {
        self.recoveries += 1;
        if self.recoveries > self.max_recoveries {
            tracing::error!(recoveries = self.recoveries, error = %cause, "session recovery budget exhausted");
            return Err(ScrapeError::SessionFatal {
                attempts: self.recoveries,
                last_error: cause.to_string(),
            });
        }
        tracing::warn!(
            recovery = self.recoveries,
            of = self.max_recoveries,
            error = %cause,
            "browser session lost, recovering"
        );
        if let Some(dead) = self.driver.take()
            && let Err(e) = dead.quit().await
        {
            tracing::debug!(error = %e, "quitting lost session failed");
        }
        self.acquire().await
    }

    async fn launch(&mut self) -> Result<Box<dyn BrowserDriver>, ScrapeError> {
        let mut last_error = String::new();
        for attempt in 1..=self.launch_retries {
            match self.launcher.launch().await {
                Ok(driver) => {
                    self.launches += 1;
                    tracing::info!(attempt, "browser session started");
                    return Ok(driver);
                }
                Err(e) => {
                    tracing::warn!(attempt, of = self.launch_retries, error = %e, "browser launch failed");
                    last_error = e.to_string();
                    if attempt < self.launch_retries {
                        sleep(self.retry_backoff).await;
                    }
                }
            }
        }
        Err(ScrapeError::SessionFatal {
            attempts: self.launch_retries,
            last_error,
        })
    }

    /// Close secondary windows and quit the session. Never fails; calling
    /// it without a session is a no-op.
    pub async fn release(&mut self) {
        self.recoveries = 0;
        let Some(mut driver) = self.driver.take() else {
            return;
        };

        match driver.windows().await {
            Ok(windows) if windows.len() > 1 => {
                let keep = driver.current_window().await.ok();
                for window in windows.iter().filter(|w| Some(*w) != keep.as_ref()) {
                    if driver.switch_to_window(window).await.is_ok()
                        && let Err(e) = driver.close_window().await
                    {
                        tracing::debug!(error = %e, "closing window on release failed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "could not list windows on release"),
        }

        if let Err(e) = driver.quit().await {
            tracing::warn!(error = %e, "browser did not shut down cleanly");
        }
        tracing::info!("browser session released");
    }
}
