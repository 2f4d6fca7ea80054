//! Element interaction with fallback strategies.
//!
//! The portal's widgets sometimes swallow native events (overlays, masked
//! date inputs), so every interaction walks an ordered list of strategies
//! in one retry loop until one succeeds.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

use crate::driver::{BrowserDriver, DriverError, ElementId, ScriptArg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionStrategy {
    /// Native WebDriver click / typing / option selection.
    Direct,
    /// Call the DOM method or assign the property from a script.
    Scripted,
    /// Dispatch synthetic DOM events from a script.
    SyntheticEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    Click,
    SetValue(&'a str),
    SelectValue(&'a str),
}

impl Action<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::SetValue(_) => "set_value",
            Action::SelectValue(_) => "select_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionPolicy {
    /// Strategies in the order they are tried.
    pub ladder: Vec<InteractionStrategy>,
    /// How many times `Direct` is tried before moving on.
    pub direct_attempts: u32,
    /// Pause between failed attempts.
    pub pause: Duration,
}

impl Default for InteractionPolicy {
    fn default() -> Self {
        Self {
            ladder: vec![
                InteractionStrategy::Direct,
                InteractionStrategy::Scripted,
                InteractionStrategy::SyntheticEvent,
            ],
            direct_attempts: 3,
            pause: Duration::from_millis(300),
        }
    }
}

impl InteractionPolicy {
    /// Flattened attempt plan: each strategy repeated as many times as it
    /// is allowed to be tried.
    pub fn attempts(&self) -> Vec<InteractionStrategy> {
        self.ladder
            .iter()
            .flat_map(|&strategy| {
                let times = match strategy {
                    InteractionStrategy::Direct => self.direct_attempts.max(1),
                    _ => 1,
                };
                std::iter::repeat_n(strategy, times as usize)
            })
            .collect()
    }
}

#[derive(Error, Debug, Clone)]
pub enum InteractionError {
    #[error("{action} failed after {attempts} attempts: {last}")]
    Exhausted {
        action: &'static str,
        attempts: usize,
        last: DriverError,
    },
    #[error("browser session lost during {action}: {source}")]
    SessionLost {
        action: &'static str,
        source: DriverError,
    },
}

const SCRIPTED_CLICK: &str = "arguments[0].click();";
const SCRIPTED_SET_VALUE: &str = "arguments[0].value = arguments[1];";
const SYNTHETIC_CLICK: &str = "arguments[0].dispatchEvent(new MouseEvent('click', {bubbles: true, cancelable: true, view: window}));";
const SYNTHETIC_SET_VALUE: &str = "var el = arguments[0]; el.focus && el.focus(); el.value = arguments[1]; \
     el.dispatchEvent(new Event('input', {bubbles: true})); \
     el.dispatchEvent(new Event('change', {bubbles: true}));";

async fn attempt(
    driver: &mut dyn BrowserDriver,
    element: &ElementId,
    action: Action<'_>,
    strategy: InteractionStrategy,
) -> Result<(), DriverError> {
    let element_arg = || ScriptArg::Element(element.clone());
    match (strategy, action) {
        (InteractionStrategy::Direct, Action::Click) => driver.click(element).await,
        (InteractionStrategy::Direct, Action::SetValue(text)) => {
            driver.clear_and_type(element, text).await
        }
        (InteractionStrategy::Direct, Action::SelectValue(value)) => {
            driver.select_by_value(element, value).await
        }
        (InteractionStrategy::Scripted, Action::Click) => driver
            .execute(SCRIPTED_CLICK, vec![element_arg()])
            .await
            .map(drop),
        (InteractionStrategy::Scripted, Action::SetValue(v) | Action::SelectValue(v)) => driver
            .execute(
                SCRIPTED_SET_VALUE,
                vec![element_arg(), ScriptArg::Value(Value::from(v))],
            )
            .await
            .map(drop),
        (InteractionStrategy::SyntheticEvent, Action::Click) => driver
            .execute(SYNTHETIC_CLICK, vec![element_arg()])
            .await
            .map(drop),
        (InteractionStrategy::SyntheticEvent, Action::SetValue(v) | Action::SelectValue(v)) => {
            driver
                .execute(
                    SYNTHETIC_SET_VALUE,
                    vec![element_arg(), ScriptArg::Value(Value::from(v))],
                )
                .await
                .map(drop)
        }
    }
}

/// Perform `action` on `element`, walking the policy's strategies in order.
///
/// Returns the strategy that succeeded.
pub async fn interact(
    driver: &mut dyn BrowserDriver,
    element: &ElementId,
    action: Action<'_>,
    policy: &InteractionPolicy,
) -> Result<InteractionStrategy, InteractionError> {
    let plan = policy.attempts();
    let mut last = DriverError::Other("no interaction strategy configured".into());

    for (i, strategy) in plan.iter().copied().enumerate() {
        match attempt(driver, element, action, strategy).await {
            Ok(()) => {
                if i > 0 {
                    tracing::debug!(action = action.name(), ?strategy, attempt = i + 1, "interaction succeeded after fallback");
                }
                return Ok(strategy);
            }
            Err(e) if e.is_session_lost() => {
                return Err(InteractionError::SessionLost {
                    action: action.name(),
                    source: e,
                });
            }
            Err(e) => {
                tracing::debug!(action = action.name(), ?strategy, error = %e, "interaction attempt failed");
                last = e;
                if i + 1 < plan.len() {
                    sleep(policy.pause).await;
                }
            }
        }
    }

    Err(InteractionError::Exhausted {
        action: action.name(),
        attempts: plan.len(),
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_repeats_direct_then_falls_back_once_each() {
        let plan = InteractionPolicy::default().attempts();
        assert_eq!(
            plan,
            vec![
                InteractionStrategy::Direct,
                InteractionStrategy::Direct,
                InteractionStrategy::Direct,
                InteractionStrategy::Scripted,
                InteractionStrategy::SyntheticEvent,
            ]
        );
    }

    #[test]
    fn custom_ladder_order_is_respected() {
        let policy = InteractionPolicy {
            ladder: vec![InteractionStrategy::SyntheticEvent, InteractionStrategy::Direct],
            direct_attempts: 2,
            pause: Duration::ZERO,
        };
        assert_eq!(
            policy.attempts(),
            vec![
                InteractionStrategy::SyntheticEvent,
                InteractionStrategy::Direct,
                InteractionStrategy::Direct,
            ]
        );
    }
}
