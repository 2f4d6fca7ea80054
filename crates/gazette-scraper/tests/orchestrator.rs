//! End-to-end runs over the scripted portal.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use gazette_core::{
    CaseNumber, ExtractedFields, MemoryStore, ProgressEvent, PublicationDraft, PublicationStore,
    SkipReason,
};
use gazette_scraper::testing::{
    DetailPage, PlainTextPdf, PortalScript, ScriptedLauncher, StaticDocuments,
};
use gazette_scraper::{ExtractionJob, Orchestrator, RunError, RunState, ScraperConfig, run_job};
use rust_decimal::Decimal;

const RPV_NOTICE: &str = "\
Processo 1234567-89.2024.1.01.0001 - Cumprimento de Sentença contra a Fazenda Pública
Exequente: JOSÉ CARLOS PEREIRA - Executado: Instituto Nacional do Seguro Social - INSS
Advogado: FERNANDA GOMES RIBEIRO (OAB: 234.567/SP)
Expeça-se Requisição de Pequeno Valor para pagamento do valor principal bruto: R$ 1.234,56,
valor principal líquido: R$ 1.111,11, juros moratórios: R$ 45,00 e honorários advocatícios: R$ 123,45.
Data de Disponibilização: 14/03/2024";

const UNRELATED_NOTICE: &str = "\
Processo 7654321-00.2023.8.26.0100 - Procedimento Comum Cível
Requerente: JOÃO PEDRO ALVES - Requerido: Banco Exemplo S/A
Designo audiência de conciliação para 12/11/2024. Intimem-se.";

struct Harness {
    orchestrator: Orchestrator,
    launcher: Arc<ScriptedLauncher>,
    store: Arc<MemoryStore>,
}

fn harness(script: PortalScript, store: Arc<MemoryStore>) -> Harness {
    let mut config = ScraperConfig::default();
    config.portal.detail_pages_per_second = 0;
    let documents = Arc::new(StaticDocuments::new(script.documents()));
    let launcher = Arc::new(ScriptedLauncher::new(script));
    let orchestrator = Orchestrator::new(
        config,
        launcher.clone(),
        documents,
        Arc::new(PlainTextPdf),
        store.clone(),
    )
    .unwrap();
    Harness {
        orchestrator,
        launcher,
        store,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn notices() -> PortalScript {
    PortalScript::new(vec![vec![
        DetailPage::inline(RPV_NOTICE),
        DetailPage::pdf(UNRELATED_NOTICE),
    ]])
}

// ── End to end ──

#[tokio::test(start_paused = true)]
async fn accepts_rpv_notice_and_rejects_unrelated_one() {
    let mut h = harness(notices(), Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let events = Mutex::new(Vec::new());
    let summary = h
        .orchestrator
        .run(&criteria, |e| events.lock().unwrap().push(e))
        .await
        .unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.items, 2);
    assert_eq!(summary.pages, 1);
    assert_eq!(h.orchestrator.state(), RunState::Done);

    let stored = h.store.snapshot();
    assert_eq!(stored.len(), 1);
    let record = &stored[0];
    assert_eq!(record.case_number().as_str(), "1234567-89.2024.1.01.0001");
    assert_eq!(
        record.fields.gross_principal,
        Some(Decimal::from_str("1234.56").unwrap())
    );
    assert_eq!(record.defendant, gazette_core::INSTITUTIONAL_DEFENDANT);

    let events = events.into_inner().unwrap();
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Stored { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Rejected { case_number, .. } if case_number.as_str() == "7654321-00.2023.8.26.0100"
    )));

    // Released on exit.
    assert_eq!(h.launcher.log().quits, 1);
    assert!(!h.orchestrator.session().is_active());
}

#[tokio::test(start_paused = true)]
async fn missing_filing_date_takes_the_gazette_day() {
    let notice = RPV_NOTICE.replace("Data de Disponibilização: 14/03/2024", "");
    let script = PortalScript::new(vec![vec![DetailPage::inline(notice)]]);
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(20), day(20)).unwrap();

    h.orchestrator.run(&criteria, |_| {}).await.unwrap();
    assert_eq!(h.store.snapshot()[0].fields.filing_date, Some(day(20)));
}

#[tokio::test(start_paused = true)]
async fn existing_case_number_never_reaches_create() {
    let store = Arc::new(MemoryStore::new());
    let case_number = CaseNumber::parse("1234567-89.2024.1.01.0001").unwrap();
    store
        .create(PublicationDraft::from_fields(
            ExtractedFields::bare(case_number, "earlier"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(store.create_calls(), 1);

    let mut h = harness(notices(), store);
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();
    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();

    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.extracted, 0);
    assert_eq!(h.store.create_calls(), 1);
    assert_eq!(h.store.snapshot()[0].fields.raw_text, "earlier");
}

// ── Item failures ──

#[tokio::test(start_paused = true)]
async fn unusable_items_are_skipped_with_reasons() {
    let script = PortalScript::new(vec![vec![
        DetailPage::inline(""),
        DetailPage::inline("Intimação sem número de processo."),
        DetailPage::inline(RPV_NOTICE),
    ]]);
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.skip_reasons.get(&SkipReason::Unresolvable), Some(&1));
    assert_eq!(summary.skip_reasons.get(&SkipReason::ExtractionEmpty), Some(&1));
    assert_eq!(summary.extracted, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_search_is_a_successful_run() {
    let mut h = harness(PortalScript::new(Vec::new()), Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();
    assert_eq!(summary.items, 0);
    assert_eq!(summary.extracted, 0);
    assert!(h.store.is_empty());
}

// ── Session failures ──

#[tokio::test(start_paused = true)]
async fn crashed_browser_is_replaced_and_the_walk_resumes() {
    let mut script = PortalScript::new(vec![
        vec![DetailPage::inline(RPV_NOTICE), DetailPage::inline(UNRELATED_NOTICE)],
        vec![DetailPage::inline("Intimação sem número.")],
    ]);
    script.kill_on_detail = Some(2);
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();

    assert_eq!(summary.recoveries, 1);
    assert_eq!(summary.items, 3);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.duplicates, 0);

    let log = h.launcher.log();
    assert_eq!(log.launches, 2);
    assert_eq!(log.submissions, 2);
    assert!(log.max_windows <= 2);
}

#[tokio::test(start_paused = true)]
async fn launch_budget_exhaustion_fails_the_run() {
    let mut script = notices();
    script.launch_failures = 10;
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let result = h.orchestrator.run(&criteria, |_| {}).await;
    assert!(matches!(result, Err(RunError::SessionFatal { attempts: 3, .. })));
    assert_eq!(h.orchestrator.state(), RunState::Failed);
}

#[tokio::test(start_paused = true)]
async fn unreachable_form_field_fails_the_run() {
    let mut script = notices();
    script.never_ready.insert("#procura".to_string());
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let result = h.orchestrator.run(&criteria, |_| {}).await;
    assert!(matches!(result, Err(RunError::FormUnavailable { field: "query" })));
    assert_eq!(h.launcher.log().quits, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_page_loads_are_retried() {
    let mut script = notices();
    script.fail_gotos = 1;
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.skipped, 0);

    let log = h.launcher.log();
    assert_eq!(log.submissions, 1);
    assert_eq!(log.launches, 1);
    // Form page and both detail pages, each loaded twice.
    assert_eq!(log.navigations, 6);
}

#[tokio::test(start_paused = true)]
async fn search_page_that_never_loads_fails_the_run() {
    let mut script = notices();
    script.fail_gotos = 3;
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let result = h.orchestrator.run(&criteria, |_| {}).await;
    assert!(matches!(result, Err(RunError::FormUnavailable { field: "page" })));
    let log = h.launcher.log();
    assert_eq!(log.navigations, 3);
    assert_eq!(log.submissions, 0);
    assert_eq!(log.quits, 1);
}

#[tokio::test(start_paused = true)]
async fn stubborn_form_fields_use_fallback_strategies() {
    let mut script = notices();
    script.direct_fails.insert("#dtInicioString".to_string());
    script.direct_fails.insert("#procura".to_string());
    script.scripted_fails.insert("#procura".to_string());
    let mut h = harness(script, Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(14), day(14)).unwrap();

    let summary = h.orchestrator.run(&criteria, |_| {}).await.unwrap();
    assert_eq!(summary.extracted, 1);

    let log = h.launcher.log();
    let strategy_for = |selector: &str| {
        log.interactions
            .iter()
            .find(|(s, _)| s == selector)
            .map(|(_, strategy)| *strategy)
    };
    use gazette_scraper::InteractionStrategy::*;
    assert_eq!(strategy_for("#dtInicioString"), Some(Scripted));
    assert_eq!(strategy_for("#procura"), Some(SyntheticEvent));
    assert_eq!(strategy_for("#dtFimString"), Some(Direct));
    assert_eq!(log.form_values["#dtInicioString"], "14/03/2024");
    assert_eq!(log.form_values["select[name='dadosConsulta.cdCaderno']"], "-11");
}

// ── Multi-day runs ──

#[tokio::test(start_paused = true)]
async fn daily_runs_share_a_session_and_dedupe_across_days() {
    let mut h = harness(notices(), Arc::new(MemoryStore::new()));
    let criteria = h.orchestrator.criteria_for(day(11), day(13)).unwrap();

    let events = Mutex::new(Vec::new());
    let summary = h
        .orchestrator
        .run_days(&criteria, |e| events.lock().unwrap().push(e))
        .await
        .unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.duplicates, 2);
    assert_eq!(summary.rejected, 3);
    let log = h.launcher.log();
    assert_eq!(log.launches, 1);
    assert_eq!(log.submissions, 3);
    assert_eq!(log.quits, 1);

    let events = events.into_inner().unwrap();
    let days: Vec<NaiveDate> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::DayStarted { date, .. } => Some(*date),
            _ => None,
        })
        .collect();
    assert_eq!(days, vec![day(11), day(12), day(13)]);
    assert!(matches!(events.last(), Some(ProgressEvent::Percent(100))));
}

#[tokio::test(start_paused = true)]
async fn job_reports_counts_for_its_range() {
    let mut h = harness(notices(), Arc::new(MemoryStore::new()));
    let job = ExtractionJob::new(day(14), day(14));

    let summary = run_job(&mut h.orchestrator, job, |_| {}).await.unwrap();
    assert_eq!(summary.extracted_count, 1);
    assert_eq!(summary.rejected_count, 1);
    assert_eq!(summary.skipped_count, 0);
    assert_eq!(summary.date_start, day(14));
    assert_eq!(summary.date_end, day(14));
}

#[tokio::test(start_paused = true)]
async fn inverted_job_range_fails_before_launch() {
    let mut h = harness(notices(), Arc::new(MemoryStore::new()));
    let job = ExtractionJob::new(day(14), day(10));

    let result = run_job(&mut h.orchestrator, job, |_| {}).await;
    assert!(matches!(result, Err(RunError::InvalidCriteria(_))));
    assert_eq!(h.launcher.attempts(), 0);
}
