//! Content resolution: PDF vs inline detection, fallbacks, context restore.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use gazette_core::{ContentKind, ResultReference, SearchCriteria};
use gazette_scraper::ItemError;
use gazette_scraper::form::{FormController, SearchForm};
use gazette_scraper::interaction::InteractionPolicy;
use gazette_scraper::pacing::PortalPacer;
use gazette_scraper::resolver::{ContentResolver, DEFAULT_DOCUMENT_URL_PATTERN};
use gazette_scraper::testing::{
    DetailPage, PlainTextPdf, PortalScript, ScriptedPortal, StaticDocuments, detail_url,
    document_url,
};
use gazette_scraper::wait::WaitPolicy;

async fn portal_on_results(script: PortalScript) -> ScriptedPortal {
    let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
    let criteria = SearchCriteria::new(day, day, "-11", "inss").unwrap();
    let mut portal = ScriptedPortal::new(script);
    FormController::new(
        SearchForm::default(),
        WaitPolicy::default(),
        InteractionPolicy::default(),
    )
    .submit_search(&mut portal, &criteria)
    .await
    .unwrap();
    assert!(portal.on_results());
    portal
}

fn resolver(documents: Arc<StaticDocuments>, pacer: Arc<PortalPacer>) -> ContentResolver {
    ContentResolver::new(
        DEFAULT_DOCUMENT_URL_PATTERN,
        documents,
        Arc::new(PlainTextPdf),
        pacer,
        WaitPolicy::default(),
    )
    .unwrap()
}

fn reference(page: usize, item: usize) -> ResultReference {
    ResultReference {
        page_index: page + 1,
        anchor: detail_url(page, item),
    }
}

fn assert_restored(portal: &ScriptedPortal) {
    assert_eq!(portal.window_count(), 1);
    assert!(portal.on_results());
}

// ── Detection ──

#[tokio::test(start_paused = true)]
async fn inline_detail_page_yields_page_text() {
    let script = PortalScript::new(vec![vec![DetailPage::inline("Processo 1234567-89.2024.1.01.0001")]]);
    let mut portal = portal_on_results(script).await;
    let documents = Arc::new(StaticDocuments::default());

    let raw = resolver(documents.clone(), Arc::new(PortalPacer::unpaced()))
        .resolve(&mut portal, &reference(0, 0))
        .await
        .unwrap();

    assert_eq!(raw.kind, ContentKind::InlineHtml);
    assert_eq!(raw.source_url, detail_url(0, 0));
    assert_eq!(raw.text, "Processo 1234567-89.2024.1.01.0001");
    assert!(documents.requests().is_empty());
    assert_restored(&portal);
}

#[tokio::test(start_paused = true)]
async fn linked_pdf_is_fetched_with_browser_cookies() {
    let script = PortalScript::new(vec![vec![DetailPage::pdf("Texto do diário")]]);
    let documents = Arc::new(StaticDocuments::new(script.documents()));
    let mut portal = portal_on_results(script).await;

    let raw = resolver(documents.clone(), Arc::new(PortalPacer::unpaced()))
        .resolve(&mut portal, &reference(0, 0))
        .await
        .unwrap();

    assert_eq!(raw.kind, ContentKind::LinkedPdf);
    assert_eq!(raw.source_url, document_url(0, 0));
    assert_eq!(raw.text, "Texto do diário");
    assert_eq!(
        documents.requests(),
        vec![(document_url(0, 0), Some("JSESSIONID=scripted".to_string()))]
    );
    assert_restored(&portal);
}

#[tokio::test(start_paused = true)]
async fn unusable_document_falls_back_to_page_text() {
    let script = PortalScript::new(vec![vec![DetailPage::pdf("never served")]]);
    let mut portal = portal_on_results(script).await;
    let documents = Arc::new(StaticDocuments::new(HashMap::new()));

    let raw = resolver(documents, Arc::new(PortalPacer::unpaced()))
        .resolve(&mut portal, &reference(0, 0))
        .await
        .unwrap();

    assert_eq!(raw.kind, ContentKind::InlineHtml);
    assert_eq!(raw.text, "Clique para visualizar o documento");
    assert_restored(&portal);
}

#[tokio::test]
async fn throttled_document_slows_the_pacer() {
    let script = PortalScript::new(vec![vec![DetailPage::pdf("texto")]]);
    let documents = Arc::new(StaticDocuments::new(script.documents()).throttle(document_url(0, 0)));
    let mut portal = portal_on_results(script).await;
    let pacer = Arc::new(PortalPacer::per_second(1000));

    let raw = resolver(documents, pacer.clone())
        .resolve(&mut portal, &reference(0, 0))
        .await
        .unwrap();

    assert_eq!(raw.kind, ContentKind::InlineHtml);
    assert_eq!(pacer.slowdown_factor(), 2);
}

#[test]
fn document_links_in_frames_and_objects_are_detected() {
    let resolver = resolver(
        Arc::new(StaticDocuments::default()),
        Arc::new(PortalPacer::unpaced()),
    );
    let base = "https://dje.tjsp.jus.br/cdje/consultaSimples.do?cdVolume=1";

    let iframe = "<html><body><iframe src=\"getPaginaDoDiario.do?cdVolume=1&nuSeqpagina=3\"></iframe></body></html>";
    assert_eq!(
        resolver.find_document(iframe, base).as_deref(),
        Some("https://dje.tjsp.jus.br/cdje/getPaginaDoDiario.do?cdVolume=1&nuSeqpagina=3")
    );

    let object = "<html><body><object data=\"/files/caderno.PDF\"></object></body></html>";
    assert_eq!(
        resolver.find_document(object, base).as_deref(),
        Some("https://dje.tjsp.jus.br/files/caderno.PDF")
    );

    let plain = "<html><body><a href=\"/cdje/index.do\">Início</a></body></html>";
    assert_eq!(resolver.find_document(plain, base), None);

    let direct = "https://dje.tjsp.jus.br/cdje/getPaginaDoDiario.do?cdVolume=1";
    assert_eq!(resolver.find_document("", direct).as_deref(), Some(direct));
}

// ── Failures ──

#[tokio::test(start_paused = true)]
async fn blank_detail_page_is_unresolvable_and_context_restored() {
    let script = PortalScript::new(vec![vec![DetailPage::inline("")]]);
    let mut portal = portal_on_results(script).await;

    let result = resolver(
        Arc::new(StaticDocuments::default()),
        Arc::new(PortalPacer::unpaced()),
    )
    .resolve(&mut portal, &reference(0, 0))
    .await;

    assert!(matches!(result, Err(ItemError::Unresolvable(_))));
    assert_restored(&portal);
}

#[tokio::test(start_paused = true)]
async fn crash_on_detail_page_loses_the_context() {
    let mut script = PortalScript::new(vec![vec![DetailPage::inline("texto")]]);
    script.kill_on_detail = Some(1);
    let mut portal = portal_on_results(script).await;

    let result = resolver(
        Arc::new(StaticDocuments::default()),
        Arc::new(PortalPacer::unpaced()),
    )
    .resolve(&mut portal, &reference(0, 0))
    .await;

    assert!(matches!(result, Err(ItemError::ContextLost(e)) if e.is_session_lost()));
}

#[tokio::test(start_paused = true)]
async fn detail_page_load_is_retried_before_skipping() {
    let mut script = PortalScript::new(vec![vec![DetailPage::inline(
        "Processo 1234567-89.2024.1.01.0001",
    )]]);
    script.fail_gotos = 1;
    let mut portal = portal_on_results(script).await;

    let raw = resolver(
        Arc::new(StaticDocuments::default()),
        Arc::new(PortalPacer::unpaced()),
    )
    .resolve(&mut portal, &reference(0, 0))
    .await
    .unwrap();

    assert_eq!(raw.kind, ContentKind::InlineHtml);
    assert!(raw.text.contains("1234567-89.2024.1.01.0001"));
    assert_eq!(portal.log().navigations, 4);
    assert_eq!(portal.log().details_opened, vec![detail_url(0, 0)]);
    assert_restored(&portal);
}

#[tokio::test(start_paused = true)]
async fn detail_page_that_never_loads_is_unresolvable() {
    let mut script = PortalScript::new(vec![vec![DetailPage::inline("texto")]]);
    script.fail_gotos = 2;
    let mut portal = portal_on_results(script).await;
    let policy = WaitPolicy {
        navigation_attempts: 2,
        ..WaitPolicy::default()
    };
    let resolver = ContentResolver::new(
        DEFAULT_DOCUMENT_URL_PATTERN,
        Arc::new(StaticDocuments::default()),
        Arc::new(PlainTextPdf),
        Arc::new(PortalPacer::unpaced()),
        policy,
    )
    .unwrap();

    let result = resolver.resolve(&mut portal, &reference(0, 0)).await;

    assert!(matches!(result, Err(ItemError::Unresolvable(reason)) if reason.starts_with("navigate")));
    assert!(portal.log().details_opened.is_empty());
    assert_restored(&portal);
}
