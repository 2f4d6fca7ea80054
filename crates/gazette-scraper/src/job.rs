//! Entry point for task runners.

use chrono::{Days, Local, NaiveDate};
use gazette_core::ProgressEvent;

use crate::RunError;
use crate::orchestrator::Orchestrator;

/// A unit of work handed over by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionJob {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
}

impl ExtractionJob {
    pub fn new(date_start: NaiveDate, date_end: NaiveDate) -> Self {
        Self {
            date_start,
            date_end,
        }
    }

    /// The daily job: yesterday's gazette, in local time.
    pub fn yesterday() -> Self {
        let today = Local::now().date_naive();
        let day = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        Self::new(day, day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub extracted_count: usize,
    pub skipped_count: usize,
    pub rejected_count: usize,
    pub duplicate_count: usize,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
}

/// Run `job` one gazette day at a time. An inverted range fails before any
/// browser is started.
pub async fn run_job(
    orchestrator: &mut Orchestrator,
    job: ExtractionJob,
    progress: impl Fn(ProgressEvent) + Send + Sync,
) -> Result<JobSummary, RunError> {
    let criteria = orchestrator.criteria_for(job.date_start, job.date_end)?;

    tracing::info!(start = %job.date_start, end = %job.date_end, "extraction job started");
    progress(ProgressEvent::Percent(0));
    let summary = orchestrator.run_days(&criteria, &progress).await?;

    Ok(JobSummary {
        extracted_count: summary.extracted,
        skipped_count: summary.skipped,
        rejected_count: summary.rejected,
        duplicate_count: summary.duplicates,
        date_start: job.date_start,
        date_end: job.date_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yesterday_is_a_single_day() {
        let job = ExtractionJob::yesterday();
        assert_eq!(job.date_start, job.date_end);
        assert!(job.date_start < Local::now().date_naive());
    }
}
