//! The extraction run: search, walk, resolve, extract, classify, store.
//!
//! A run moves through [`RunState`]s on a single browser session. Item-level
//! failures are skipped; a lost session is replaced and the search
//! resubmitted, with items already handled skipped on the second pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use gazette_core::{
    CriteriaError, PdfBackend, ProgressEvent, PublicationDraft, PublicationStore, ResultReference,
    SearchCriteria, SkipReason, StoreError,
};
use gazette_parsing::{FieldExtractor, RelevanceClassifier};

use crate::config::ScraperConfig;
use crate::driver::{BrowserDriver, DriverError, DriverLauncher};
use crate::fetch::DocumentFetcher;
use crate::form::FormController;
use crate::pacing::PortalPacer;
use crate::pagination::PaginationWalker;
use crate::resolver::ContentResolver;
use crate::session::SessionManager;
use crate::{ItemError, RunError, ScrapeError};

type Progress<'a> = &'a (dyn Fn(ProgressEvent) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SessionReady,
    FormSubmitted,
    Paginating,
    ItemResolving,
    Extracting,
    Classifying,
    Emit,
    Skip,
    Done,
    Failed,
}

/// Counts of one run (or the sum over several days).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// New records stored.
    pub extracted: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub duplicates: usize,
    /// Highest results page read.
    pub pages: usize,
    /// Result items handed to the resolver.
    pub items: usize,
    pub skip_reasons: HashMap<SkipReason, usize>,
    /// Session losses recovered from.
    pub recoveries: u32,
    /// Days whose search form could not be used (multi-day runs only).
    pub failed_days: usize,
}

impl RunSummary {
    pub fn absorb(&mut self, other: RunSummary) {
        self.extracted += other.extracted;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.duplicates += other.duplicates;
        self.pages += other.pages;
        self.items += other.items;
        for (reason, count) in other.skip_reasons {
            *self.skip_reasons.entry(reason).or_default() += count;
        }
        self.recoveries += other.recoveries;
        self.failed_days += other.failed_days;
    }
}

enum Flow {
    Finished,
    Recover(DriverError),
}

/// Everything but the session, so a borrowed driver and the pipeline can
/// be used side by side.
struct Pipeline {
    form: FormController,
    walker: PaginationWalker,
    resolver: ContentResolver,
    extractor: FieldExtractor,
    classifier: RelevanceClassifier,
    store: Arc<dyn PublicationStore>,
    state: RunState,
}

impl Pipeline {
    fn set(&mut self, next: RunState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "run state");
            self.state = next;
        }
    }

    async fn walk(
        &mut self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
        progress: Progress<'_>,
        summary: &mut RunSummary,
        seen: &mut HashSet<String>,
    ) -> Result<Flow, RunError> {
        loop {
            self.set(RunState::Paginating);
            let next = self.walker.next(driver).await;
            if let Some((page_index, items)) = self.walker.take_loaded_page() {
                summary.pages = summary.pages.max(page_index);
                progress(ProgressEvent::PageLoaded { page_index, items });
            }
            let reference = match next {
                Ok(Some(reference)) => reference,
                Ok(None) => return Ok(Flow::Finished),
                Err(ScrapeError::Driver(e)) if e.is_session_lost() => return Ok(Flow::Recover(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "pagination stopped");
                    return Ok(Flow::Finished);
                }
            };

            if !seen.insert(reference.anchor.clone()) {
                tracing::debug!(anchor = %reference.anchor, "already handled before recovery");
                continue;
            }
            summary.items += 1;

            self.set(RunState::ItemResolving);
            let raw = match self.resolver.resolve(driver, &reference).await {
                Ok(raw) => raw,
                Err(ItemError::ContextLost(e)) => {
                    // Retried after recovery.
                    seen.remove(&reference.anchor);
                    summary.items -= 1;
                    return Ok(Flow::Recover(e));
                }
                Err(e) => {
                    self.skip(&reference, SkipReason::Unresolvable, &e, summary, progress);
                    continue;
                }
            };
            progress(ProgressEvent::ItemResolved {
                anchor: reference.anchor.clone(),
                kind: raw.kind,
            });

            self.set(RunState::Extracting);
            let fields = match self.extractor.extract(&raw.text) {
                Ok(fields) => fields,
                Err(e) => {
                    let e = ItemError::from(e);
                    self.skip(&reference, SkipReason::ExtractionEmpty, &e, summary, progress);
                    continue;
                }
            };

            self.set(RunState::Classifying);
            let decision = self.classifier.classify(&fields, &fields.raw_text);
            if !decision.accepted {
                tracing::debug!(
                    case_number = %fields.case_number,
                    score = decision.score,
                    "publication rejected"
                );
                summary.rejected += 1;
                progress(ProgressEvent::Rejected {
                    case_number: fields.case_number.clone(),
                    score: decision.score,
                });
                continue;
            }

            self.set(RunState::Emit);
            let gazette_day = criteria.is_single_day().then(|| criteria.date_start());
            self.emit(PublicationDraft::from_fields(fields, gazette_day), summary, progress)
                .await?;
        }
    }

    fn skip(
        &mut self,
        reference: &ResultReference,
        reason: SkipReason,
        error: &ItemError,
        summary: &mut RunSummary,
        progress: Progress<'_>,
    ) {
        self.set(RunState::Skip);
        tracing::warn!(
            anchor = %reference.anchor,
            page = reference.page_index,
            reason = reason.as_str(),
            error = %error,
            "skipping result"
        );
        summary.skipped += 1;
        *summary.skip_reasons.entry(reason.clone()).or_default() += 1;
        progress(ProgressEvent::ItemSkipped {
            anchor: reference.anchor.clone(),
            reason,
            detail: error.to_string(),
        });
    }

    async fn emit(
        &mut self,
        draft: PublicationDraft,
        summary: &mut RunSummary,
        progress: Progress<'_>,
    ) -> Result<(), RunError> {
        if self
            .store
            .find_by_case_number(draft.case_number())
            .await?
            .is_some()
        {
            tracing::debug!(case_number = %draft.case_number(), "already stored");
            summary.duplicates += 1;
            progress(ProgressEvent::Duplicate {
                case_number: draft.case_number().clone(),
            });
            return Ok(());
        }

        match self.store.create(draft).await {
            Ok(publication) => {
                tracing::info!(
                    case_number = %publication.case_number(),
                    id = publication.id,
                    "publication stored"
                );
                summary.extracted += 1;
                progress(ProgressEvent::Stored {
                    case_number: publication.case_number().clone(),
                    id: publication.id,
                });
                Ok(())
            }
            Err(StoreError::Duplicate(case_number)) => {
                summary.duplicates += 1;
                progress(ProgressEvent::Duplicate { case_number });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs searches end to end on one browser session.
pub struct Orchestrator {
    category: String,
    query_text: String,
    session: SessionManager,
    pipeline: Pipeline,
}

impl Orchestrator {
    pub fn new(
        config: ScraperConfig,
        launcher: Arc<dyn DriverLauncher>,
        fetcher: Arc<dyn DocumentFetcher>,
        pdf: Arc<dyn PdfBackend>,
        store: Arc<dyn PublicationStore>,
    ) -> Result<Self, ScrapeError> {
        let pacer = Arc::new(PortalPacer::per_second(
            config.portal.detail_pages_per_second,
        ));
        let resolver = ContentResolver::new(
            &config.portal.document_url_pattern,
            fetcher,
            pdf,
            pacer,
            config.wait,
        )?;
        let walker = PaginationWalker::new(
            config.results.clone(),
            config.wait,
            config.interaction.clone(),
            config.portal.max_pages,
        )?;

        Ok(Self {
            session: SessionManager::new(launcher, &config.browser),
            pipeline: Pipeline {
                form: FormController::new(config.form.clone(), config.wait, config.interaction.clone()),
                walker,
                resolver,
                extractor: FieldExtractor::with_config(&config.parsing),
                classifier: RelevanceClassifier::new(&config.parsing),
                store,
                state: RunState::Idle,
            },
            category: config.portal.category,
            query_text: config.portal.query_text,
        })
    }

    /// Criteria for `start..=end` with the configured category and query.
    pub fn criteria_for(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SearchCriteria, CriteriaError> {
        SearchCriteria::new(start, end, self.category.clone(), self.query_text.clone())
    }

    pub fn state(&self) -> RunState {
        self.pipeline.state
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Close the browser after an interrupted run. Safe to call at any time.
    pub async fn shutdown(&mut self) {
        self.session.release().await;
    }

    /// One search over the whole range. The session is released on return.
    pub async fn run(
        &mut self,
        criteria: &SearchCriteria,
        progress: impl Fn(ProgressEvent) + Send + Sync,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let result = self.search(criteria, &progress, &mut summary).await;
        self.session.release().await;
        self.finish(result.map(|()| summary))
    }

    /// One search per day of the range on the same session, summed. A day
    /// whose form cannot be used is counted in `failed_days` and the next
    /// day is tried; anything else fatal ends the run.
    pub async fn run_days(
        &mut self,
        criteria: &SearchCriteria,
        progress: impl Fn(ProgressEvent) + Send + Sync,
    ) -> Result<RunSummary, RunError> {
        let days = criteria.split_daily();
        let total_days = days.len();
        let mut total = RunSummary::default();
        let mut result = Ok(());

        for (index, day) in days.iter().enumerate() {
            progress(ProgressEvent::DayStarted {
                date: day.date_start(),
                day: index + 1,
                total_days,
            });
            let mut summary = RunSummary::default();
            match self.search(day, &progress, &mut summary).await {
                Ok(()) => {}
                Err(RunError::FormUnavailable { field }) => {
                    tracing::warn!(date = %day.date_start(), field, "search form unavailable, skipping day");
                    summary.failed_days += 1;
                }
                Err(e) => {
                    total.absorb(summary);
                    result = Err(e);
                    break;
                }
            }
            total.absorb(summary);
            progress(ProgressEvent::Percent(
                ((index + 1) * 100 / total_days.max(1)) as u8,
            ));
        }

        self.session.release().await;
        self.finish(result.map(|()| total))
    }

    fn finish(&mut self, result: Result<RunSummary, RunError>) -> Result<RunSummary, RunError> {
        match &result {
            Ok(summary) => {
                self.pipeline.set(RunState::Done);
                tracing::info!(
                    extracted = summary.extracted,
                    skipped = summary.skipped,
                    rejected = summary.rejected,
                    duplicates = summary.duplicates,
                    pages = summary.pages,
                    "run finished"
                );
            }
            Err(e) => {
                self.pipeline.set(RunState::Failed);
                tracing::error!(error = %e, "run failed");
            }
        }
        result
    }

    async fn search(
        &mut self,
        criteria: &SearchCriteria,
        progress: Progress<'_>,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        self.pipeline.set(RunState::Idle);
        let mut seen = HashSet::new();
        let mut lost: Option<DriverError> = None;

        loop {
            let driver = match lost.take() {
                Some(cause) => {
                    let driver = self.session.recover(&cause).await?;
                    summary.recoveries += 1;
                    driver
                }
                None => self.session.acquire().await?,
            };
            self.pipeline.set(RunState::SessionReady);

            match self.pipeline.form.submit_search(driver, criteria).await {
                Ok(()) => {}
                Err(ScrapeError::Driver(e)) if e.is_session_lost() => {
                    lost = Some(e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            self.pipeline.set(RunState::FormSubmitted);
            self.pipeline.walker.reset();

            match self
                .pipeline
                .walk(driver, criteria, progress, summary, &mut seen)
                .await?
            {
                Flow::Finished => return Ok(()),
                Flow::Recover(cause) => lost = Some(cause),
            }
        }
    }
}
