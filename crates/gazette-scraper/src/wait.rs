//! Bounded polling for elements to appear, and bounded page navigation.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::driver::{BrowserDriver, DriverError, ElementId};

/// How long to poll for a condition and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Tries per page load before the navigation error is surfaced.
    pub navigation_attempts: u32,
    pub navigation_pause: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            navigation_attempts: 3,
            navigation_pause: Duration::from_secs(2),
        }
    }
}

/// Load `url`, retrying transient failures up to
/// `policy.navigation_attempts` times. A lost session is returned at once.
pub async fn navigate(
    driver: &mut dyn BrowserDriver,
    url: &str,
    policy: WaitPolicy,
) -> Result<(), DriverError> {
    let attempts = policy.navigation_attempts.max(1);
    let mut attempt = 1;
    loop {
        match driver.goto(url).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_session_lost() || attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::warn!(url, attempt, error = %e, "navigation failed, retrying");
                attempt += 1;
                sleep(policy.navigation_pause).await;
            }
        }
    }
}

/// Poll until `selector` matches an element that is displayed and enabled.
///
/// Returns `Ok(None)` when the timeout elapses. Only a lost session is
/// reported as an error; other lookup failures count as "not ready yet".
pub async fn wait_for_ready(
    driver: &mut dyn BrowserDriver,
    selector: &str,
    policy: WaitPolicy,
) -> Result<Option<ElementId>, DriverError> {
    poll(driver, selector, policy, true).await
}

/// Poll until `selector` matches any element.
pub async fn wait_for_present(
    driver: &mut dyn BrowserDriver,
    selector: &str,
    policy: WaitPolicy,
) -> Result<Option<ElementId>, DriverError> {
    poll(driver, selector, policy, false).await
}

async fn poll(
    driver: &mut dyn BrowserDriver,
    selector: &str,
    policy: WaitPolicy,
    require_ready: bool,
) -> Result<Option<ElementId>, DriverError> {
    let deadline = Instant::now() + policy.timeout;
    loop {
        match driver.find_optional(selector).await {
            Ok(Some(element)) => {
                if !require_ready {
                    return Ok(Some(element));
                }
                match driver.is_ready(&element).await {
                    Ok(true) => return Ok(Some(element)),
                    Ok(false) => {}
                    Err(e) if e.is_session_lost() => return Err(e),
                    Err(e) => tracing::trace!(selector, error = %e, "readiness check failed"),
                }
            }
            Ok(None) => {}
            Err(e) if e.is_session_lost() => return Err(e),
            Err(e) => tracing::trace!(selector, error = %e, "lookup failed"),
        }

        if Instant::now() >= deadline {
            tracing::debug!(selector, timeout_ms = policy.timeout.as_millis() as u64, "wait timed out");
            return Ok(None);
        }
        sleep(policy.poll_interval).await;
    }
}
