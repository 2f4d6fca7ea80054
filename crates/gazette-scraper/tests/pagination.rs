//! Result traversal against the scripted portal.

use std::collections::HashSet;

use chrono::NaiveDate;
use gazette_core::{ResultReference, SearchCriteria};
use gazette_scraper::form::{FormController, SearchForm};
use gazette_scraper::interaction::InteractionPolicy;
use gazette_scraper::pagination::{DEFAULT_MAX_PAGES, PaginationWalker, ResultsLayout};
use gazette_scraper::testing::{PortalScript, ScriptedPortal, detail_url};
use gazette_scraper::wait::WaitPolicy;

fn criteria() -> SearchCriteria {
    let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
    SearchCriteria::new(day, day, "-11", "inss").unwrap()
}

async fn walk(script: PortalScript, max_pages: usize) -> (Vec<ResultReference>, ScriptedPortal) {
    let mut portal = ScriptedPortal::new(script);
    FormController::new(
        SearchForm::default(),
        WaitPolicy::default(),
        InteractionPolicy::default(),
    )
    .submit_search(&mut portal, &criteria())
    .await
    .unwrap();

    let mut walker = PaginationWalker::new(
        ResultsLayout::default(),
        WaitPolicy::default(),
        InteractionPolicy::default(),
        max_pages,
    )
    .unwrap();
    let mut references = Vec::new();
    while let Some(reference) = walker.next(&mut portal).await.unwrap() {
        references.push(reference);
    }
    (references, portal)
}

// ── Sequence length ──

#[tokio::test(start_paused = true)]
async fn yields_every_item_of_every_page() {
    for (pages, per_page) in [(1, 1), (1, 5), (3, 4), (6, 2)] {
        let (references, _) = walk(PortalScript::uniform(pages, per_page), DEFAULT_MAX_PAGES).await;
        assert_eq!(references.len(), pages * per_page, "{pages} pages x {per_page}");

        let distinct: HashSet<&str> = references.iter().map(|r| r.anchor.as_str()).collect();
        assert_eq!(distinct.len(), pages * per_page);
    }
}

#[tokio::test(start_paused = true)]
async fn references_carry_page_index_and_absolute_anchor() {
    let (references, _) = walk(PortalScript::uniform(2, 2), DEFAULT_MAX_PAGES).await;
    let pages: Vec<usize> = references.iter().map(|r| r.page_index).collect();
    assert_eq!(pages, vec![1, 1, 2, 2]);
    assert_eq!(references[0].anchor, detail_url(0, 0));
    assert_eq!(references[3].anchor, detail_url(1, 1));
}

// ── Empty and bounded walks ──

#[tokio::test(start_paused = true)]
async fn no_results_container_is_an_empty_walk() {
    let (references, portal) = walk(PortalScript::new(Vec::new()), DEFAULT_MAX_PAGES).await;
    assert!(references.is_empty());
    assert_eq!(portal.log().submissions, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_first_page_is_an_empty_walk() {
    let (references, _) = walk(PortalScript::new(vec![Vec::new()]), DEFAULT_MAX_PAGES).await;
    assert!(references.is_empty());
}

#[tokio::test(start_paused = true)]
async fn page_ceiling_stops_the_walk() {
    let (references, _) = walk(PortalScript::uniform(5, 3), 2).await;
    assert_eq!(references.len(), 6);
    assert!(references.iter().all(|r| r.page_index <= 2));
}

#[tokio::test(start_paused = true)]
async fn next_page_falls_back_to_scripted_click() {
    let mut script = PortalScript::uniform(2, 1);
    script.direct_fails.insert("next_page".to_string());
    let (references, portal) = walk(script, DEFAULT_MAX_PAGES).await;
    assert_eq!(references.len(), 2);
    assert!(
        portal
            .log()
            .interactions
            .iter()
            .any(|(selector, strategy)| selector == "next_page"
                && *strategy == gazette_scraper::InteractionStrategy::Scripted)
    );
}
