//! SQLite publication store against a real database file.

use std::str::FromStr;

use chrono::NaiveDate;
use gazette_core::{
    CaseNumber, ExtractedFields, PublicationDraft, PublicationStore, SqliteStore, StoreError,
};
use rust_decimal::Decimal;

fn fields(number: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::bare(
        CaseNumber::parse(number).unwrap(),
        "Requisição de pequeno valor. Requerente: JOSE DOS SANTOS",
    );
    fields.claimant_names = Some(vec!["JOSE DOS SANTOS".to_string()]);
    fields.attorney_names = Some(vec!["ANA PEREIRA".to_string(), "JOAO LIMA".to_string()]);
    fields.gross_principal = Some(Decimal::from_str("1234.56").unwrap());
    fields.attorney_fees = Some(Decimal::from_str("120.5").unwrap());
    fields.filing_date = NaiveDate::from_ymd_opt(2024, 3, 15);
    fields
}

#[tokio::test]
async fn duplicate_case_number_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("pubs.db")).unwrap();

    store
        .create(PublicationDraft::from_fields(
            fields("1234567-89.2024.1.01.0001"),
            None,
        ))
        .await
        .unwrap();

    let err = store
        .create(PublicationDraft::from_fields(
            fields("1234567-89.2024.1.01.0001"),
            None,
        ))
        .await
        .unwrap_err();
    match err {
        StoreError::Duplicate(number) => assert_eq!(number.as_str(), "1234567-89.2024.1.01.0001"),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("pubs.db");

    let created = {
        let store = SqliteStore::open(&path).unwrap();
        store
            .create(PublicationDraft::from_fields(
                fields("7654321-00.2023.8.26.0100"),
                None,
            ))
            .await
            .unwrap()
    };

    let store = SqliteStore::open(&path).unwrap();
    let found = store
        .find_by_case_number(created.case_number())
        .await
        .unwrap()
        .expect("record should persist");
    assert_eq!(found.fields, created.fields);
    assert_eq!(
        found.fields.attorney_names.as_deref(),
        Some(&["ANA PEREIRA".to_string(), "JOAO LIMA".to_string()][..])
    );
    assert_eq!(found.created_at.timestamp(), created.created_at.timestamp());
}
