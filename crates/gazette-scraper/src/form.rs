//! The portal's advanced-search form.

use gazette_core::SearchCriteria;
use gazette_parsing::dates::format_form_date;

use crate::ScrapeError;
use crate::driver::BrowserDriver;
use crate::interaction::{Action, InteractionError, InteractionPolicy, interact};
use crate::wait::{WaitPolicy, navigate, wait_for_ready};

/// Location and selectors of the advanced-search form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchForm {
    pub url: String,
    pub start_date: String,
    pub end_date: String,
    pub category: String,
    pub query: String,
    pub submit: String,
}

pub const DEFAULT_SEARCH_URL: &str = "https://dje.tjsp.jus.br/cdje/consultaAvancada.do";

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            url: DEFAULT_SEARCH_URL.to_string(),
            start_date: "#dtInicioString".to_string(),
            end_date: "#dtFimString".to_string(),
            category: "select[name='dadosConsulta.cdCaderno']".to_string(),
            query: "#procura".to_string(),
            submit: "form[name='consultaAvancadaForm'] input[type='submit']".to_string(),
        }
    }
}

/// Fills and submits [`SearchForm`] for one [`SearchCriteria`].
#[derive(Debug, Clone)]
pub struct FormController {
    form: SearchForm,
    wait: WaitPolicy,
    interaction: InteractionPolicy,
}

impl FormController {
    pub fn new(form: SearchForm, wait: WaitPolicy, interaction: InteractionPolicy) -> Self {
        Self {
            form,
            wait,
            interaction,
        }
    }

    pub fn form(&self) -> &SearchForm {
        &self.form
    }

    /// Navigate to the form, populate every field and submit it.
    ///
    /// A field that never becomes ready, or that no interaction strategy
    /// manages to set, fails with [`ScrapeError::FormUnavailable`]. A lost
    /// session is reported as [`ScrapeError::Driver`] so the caller can
    /// relaunch and retry.
    pub async fn submit_search(
        &self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
    ) -> Result<(), ScrapeError> {
        tracing::info!(
            start = %criteria.date_start(),
            end = %criteria.date_end(),
            category = criteria.category(),
            "submitting search"
        );
        navigate(driver, &self.form.url, self.wait)
            .await
            .map_err(|e| lost_or_unavailable(e, "page"))?;

        let start = format_form_date(criteria.date_start());
        let end = format_form_date(criteria.date_end());
        let steps: [(&'static str, &str, Action<'_>); 5] = [
            ("start_date", &self.form.start_date, Action::SetValue(&start)),
            ("end_date", &self.form.end_date, Action::SetValue(&end)),
            ("category", &self.form.category, Action::SelectValue(criteria.category())),
            ("query", &self.form.query, Action::SetValue(criteria.query_text())),
            ("submit", &self.form.submit, Action::Click),
        ];

        for (field, selector, action) in steps {
            let element = wait_for_ready(driver, selector, self.wait)
                .await
                .map_err(|e| lost_or_unavailable(e, field))?
                .ok_or(ScrapeError::FormUnavailable { field })?;

            match interact(driver, &element, action, &self.interaction).await {
                Ok(strategy) => {
                    tracing::debug!(field, ?strategy, "form field populated");
                }
                Err(InteractionError::SessionLost { source, .. }) => {
                    return Err(ScrapeError::Driver(source));
                }
                Err(e @ InteractionError::Exhausted { .. }) => {
                    tracing::warn!(field, error = %e, "form field rejected every strategy");
                    return Err(ScrapeError::FormUnavailable { field });
                }
            }
        }
        Ok(())
    }
}

fn lost_or_unavailable(e: crate::driver::DriverError, field: &'static str) -> ScrapeError {
    if e.is_session_lost() {
        ScrapeError::Driver(e)
    } else {
        tracing::warn!(field, error = %e, "search form unreachable");
        ScrapeError::FormUnavailable { field }
    }
}
