use thiserror::Error;

pub mod config;
pub mod driver;
pub mod fetch;
pub mod form;
pub mod interaction;
pub mod job;
pub mod orchestrator;
pub mod pacing;
pub mod pagination;
pub mod resolver;
pub mod session;
pub mod testing;
pub mod wait;
pub mod webdriver;

// Re-export for convenience
pub use config::{BrowserSettings, PortalSettings, ScraperConfig};
pub use driver::{BrowserDriver, DriverError, DriverLauncher, ElementId, ScriptArg, WindowId};
pub use fetch::{DocumentFetcher, FetchError, HttpDocumentFetcher};
pub use form::{FormController, SearchForm};
pub use interaction::{Action, InteractionError, InteractionPolicy, InteractionStrategy};
pub use job::{ExtractionJob, JobSummary, run_job};
pub use orchestrator::{Orchestrator, RunState, RunSummary};
pub use pacing::PortalPacer;
pub use pagination::{PaginationWalker, ResultsLayout};
pub use resolver::ContentResolver;
pub use session::SessionManager;
pub use wait::WaitPolicy;
pub use webdriver::{ChromeLauncher, WebDriverBrowser};

/// Run-level failures of the browser side of the engine.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("browser session could not be established after {attempts} attempts: {last_error}")]
    SessionFatal { attempts: u32, last_error: String },
    #[error("search form field '{field}' is unavailable")]
    FormUnavailable { field: &'static str },
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Interaction(#[from] InteractionError),
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid document URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Why a single result item produced no record. Caught per item.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("content unresolvable: {0}")]
    Unresolvable(String),
    #[error(transparent)]
    ExtractionEmpty(#[from] gazette_parsing::ExtractionEmpty),
    /// The session died, or the results window could not be restored.
    /// Not skippable: the orchestrator has to recover the session.
    #[error("browsing context lost: {0}")]
    ContextLost(DriverError),
}

/// Errors that end an orchestrator run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("browser session could not be established after {attempts} attempts: {last_error}")]
    SessionFatal { attempts: u32, last_error: String },
    #[error("search form field '{field}' is unavailable")]
    FormUnavailable { field: &'static str },
    #[error("publication store failed: {0}")]
    Store(#[from] gazette_core::StoreError),
    #[error("invalid search criteria: {0}")]
    InvalidCriteria(#[from] gazette_core::CriteriaError),
    #[error("browser failed: {0}")]
    Driver(DriverError),
    #[error(transparent)]
    Interaction(InteractionError),
    #[error("invalid scraper configuration: {0}")]
    InvalidConfig(String),
}

impl From<ScrapeError> for RunError {
    fn from(e: ScrapeError) -> Self {
        match e {
            ScrapeError::SessionFatal {
                attempts,
                last_error,
            } => RunError::SessionFatal {
                attempts,
                last_error,
            },
            ScrapeError::FormUnavailable { field } => RunError::FormUnavailable { field },
            ScrapeError::Driver(e) => RunError::Driver(e),
            ScrapeError::Interaction(e) => RunError::Interaction(e),
            e @ (ScrapeError::InvalidSelector { .. } | ScrapeError::InvalidPattern(_)) => {
                RunError::InvalidConfig(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_errors_keep_their_kind_in_run_errors() {
        let fatal = RunError::from(ScrapeError::SessionFatal {
            attempts: 3,
            last_error: "no chrome".into(),
        });
        assert!(matches!(fatal, RunError::SessionFatal { attempts: 3, .. }));

        let driver = RunError::from(ScrapeError::Driver(DriverError::Stale("#pesquisar".into())));
        assert!(matches!(driver, RunError::Driver(DriverError::Stale(_))));

        let interaction = RunError::from(ScrapeError::Interaction(InteractionError::Exhausted {
            action: "click",
            attempts: 4,
            last: DriverError::NotInteractable("#pesquisar".into()),
        }));
        assert!(matches!(
            interaction,
            RunError::Interaction(InteractionError::Exhausted { attempts: 4, .. })
        ));

        let selector = RunError::from(ScrapeError::InvalidSelector {
            selector: "#[".into(),
            reason: "unclosed bracket".into(),
        });
        match selector {
            RunError::InvalidConfig(message) => assert!(message.contains("#[")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
