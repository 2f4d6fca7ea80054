//! Persistence collaborator for accepted publications.
//!
//! The engine only needs two operations: look a record up by case number
//! and create a new one. Uniqueness of the case number is enforced by the
//! store itself, so a racing writer surfaces as [`StoreError::Duplicate`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{CaseNumber, ExtractedFields, Publication, PublicationDraft, PublicationStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a publication with case number {0} already exists")]
    Duplicate(CaseNumber),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row for {case_number}: {reason}")]
    Corrupt { case_number: String, reason: String },
    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Storage backend for publications.
pub trait PublicationStore: Send + Sync {
    fn find_by_case_number<'a>(
        &'a self,
        case_number: &'a CaseNumber,
    ) -> StoreFuture<'a, Option<Publication>>;

    /// Persist a new record. Fails with [`StoreError::Duplicate`] if the
    /// case number is already stored.
    fn create(&self, draft: PublicationDraft) -> StoreFuture<'_, Publication>;
}

// ── In-memory store ──

/// Store kept in process memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Publication>>,
    create_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `create` was invoked, successful or not.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Publication> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn insert(&self, draft: PublicationDraft) -> Result<Publication, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Task(e.to_string()))?;
        if records
            .iter()
            .any(|p| p.case_number() == draft.case_number())
        {
            return Err(StoreError::Duplicate(draft.fields.case_number));
        }
        let publication = Publication {
            id: records.len() as i64 + 1,
            fields: draft.fields,
            defendant: draft.defendant,
            status: draft.status,
            created_at: Utc::now(),
        };
        records.push(publication.clone());
        Ok(publication)
    }
}

impl PublicationStore for MemoryStore {
    fn find_by_case_number<'a>(
        &'a self,
        case_number: &'a CaseNumber,
    ) -> StoreFuture<'a, Option<Publication>> {
        Box::pin(async move {
            let records = self
                .records
                .lock()
                .map_err(|e| StoreError::Task(e.to_string()))?;
            Ok(records
                .iter()
                .find(|p| p.case_number() == case_number)
                .cloned())
        })
    }

    fn create(&self, draft: PublicationDraft) -> StoreFuture<'_, Publication> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { self.insert(draft) })
    }
}

// ── SQLite store ──

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS publications (
     id                INTEGER PRIMARY KEY AUTOINCREMENT,
     case_number       TEXT NOT NULL UNIQUE,
     filing_date       TEXT,
     claimant_names    TEXT,
     attorney_names    TEXT,
     gross_principal   TEXT,
     net_principal     TEXT,
     moratory_interest TEXT,
     attorney_fees     TEXT,
     raw_text          TEXT NOT NULL,
     defendant         TEXT NOT NULL,
     status            TEXT NOT NULL DEFAULT 'nova',
     created_at        TEXT NOT NULL
 );";

const SELECT_COLUMNS: &str = "id, case_number, filing_date, claimant_names, attorney_names,
     gross_principal, net_principal, moratory_interest, attorney_fees,
     raw_text, defendant, status, created_at";

/// Store backed by a single SQLite file.
///
/// Queries run on the blocking pool; the connection is shared behind a
/// mutex since the engine writes one record at a time.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Task(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "opened publication store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Task(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl PublicationStore for SqliteStore {
    fn find_by_case_number<'a>(
        &'a self,
        case_number: &'a CaseNumber,
    ) -> StoreFuture<'a, Option<Publication>> {
        let key = case_number.as_str().to_string();
        Box::pin(self.with_conn(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM publications WHERE case_number = ?1");
            let row = conn
                .query_row(&sql, params![key], PublicationRow::from_row)
                .optional()?;
            row.map(PublicationRow::into_publication).transpose()
        }))
    }

    fn create(&self, draft: PublicationDraft) -> StoreFuture<'_, Publication> {
        Box::pin(self.with_conn(move |conn| {
            let fields = &draft.fields;
            let created_at = Utc::now();
            let inserted = conn.execute(
                "INSERT INTO publications (
                     case_number, filing_date, claimant_names, attorney_names,
                     gross_principal, net_principal, moratory_interest, attorney_fees,
                     raw_text, defendant, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    fields.case_number.as_str(),
                    fields.filing_date.map(|d| d.to_string()),
                    encode_names(fields.claimant_names.as_deref()),
                    encode_names(fields.attorney_names.as_deref()),
                    fields.gross_principal.map(|d| d.to_string()),
                    fields.net_principal.map(|d| d.to_string()),
                    fields.moratory_interest.map(|d| d.to_string()),
                    fields.attorney_fees.map(|d| d.to_string()),
                    fields.raw_text,
                    draft.defendant,
                    draft.status.as_str(),
                    created_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::Duplicate(draft.fields.case_number));
                }
                Err(e) => return Err(e.into()),
            }
            let id = conn.last_insert_rowid();
            tracing::debug!(id, case_number = %draft.fields.case_number, "stored publication");
            Ok(Publication {
                id,
                fields: draft.fields,
                defendant: draft.defendant,
                status: draft.status,
                created_at,
            })
        }))
    }
}

fn encode_names(names: Option<&[String]>) -> Option<String> {
    names.and_then(|n| serde_json::to_string(n).ok())
}

/// Column values as stored, converted to domain types outside the row closure.
struct PublicationRow {
    id: i64,
    case_number: String,
    filing_date: Option<String>,
    claimant_names: Option<String>,
    attorney_names: Option<String>,
    money: [Option<String>; 4],
    raw_text: String,
    defendant: String,
    status: String,
    created_at: String,
}

impl PublicationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            case_number: row.get(1)?,
            filing_date: row.get(2)?,
            claimant_names: row.get(3)?,
            attorney_names: row.get(4)?,
            money: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
            raw_text: row.get(9)?,
            defendant: row.get(10)?,
            status: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_publication(self) -> Result<Publication, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            case_number: self.case_number.clone(),
            reason,
        };
        let case_number = CaseNumber::parse(&self.case_number).map_err(|e| corrupt(e.to_string()))?;
        let filing_date = self
            .filing_date
            .as_deref()
            .map(|d| d.parse::<NaiveDate>())
            .transpose()
            .map_err(|e| corrupt(format!("filing_date: {e}")))?;
        let decode_names = |raw: &Option<String>| -> Result<Option<Vec<String>>, StoreError> {
            raw.as_deref()
                .map(serde_json::from_str::<Vec<String>>)
                .transpose()
                .map_err(|e| corrupt(format!("names: {e}")))
        };
        let claimant_names = decode_names(&self.claimant_names)?;
        let attorney_names = decode_names(&self.attorney_names)?;
        let mut money = [None; 4];
        for (slot, raw) in money.iter_mut().zip(self.money.iter()) {
            *slot = raw
                .as_deref()
                .map(|v| v.parse::<Decimal>())
                .transpose()
                .map_err(|e| corrupt(format!("amount: {e}")))?;
        }
        let status = self.status.parse::<PublicationStatus>().map_err(corrupt)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?
            .with_timezone(&Utc);
        let [gross_principal, net_principal, moratory_interest, attorney_fees] = money;

        Ok(Publication {
            id: self.id,
            fields: ExtractedFields {
                case_number,
                filing_date,
                claimant_names,
                attorney_names,
                gross_principal,
                net_principal,
                moratory_interest,
                attorney_fees,
                raw_text: self.raw_text,
            },
            defendant: self.defendant,
            status,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn draft(number: &str) -> PublicationDraft {
        let mut fields = ExtractedFields::bare(CaseNumber::parse(number).unwrap(), "RPV INSS");
        fields.gross_principal = Some(Decimal::from_str("1234.56").unwrap());
        fields.claimant_names = Some(vec!["MARIA DA SILVA".into()]);
        PublicationDraft::from_fields(fields, NaiveDate::from_ymd_opt(2024, 5, 1))
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicates() {
        let store = MemoryStore::new();
        let first = store.create(draft("1234567-89.2024.1.01.0001")).await.unwrap();
        assert_eq!(first.id, 1);

        let err = store
            .create(draft("1234567-89.2024.1.01.0001"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.create_calls(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_finds_by_case_number() {
        let store = MemoryStore::new();
        store.create(draft("1234567-89.2024.1.01.0001")).await.unwrap();

        let hit = CaseNumber::parse("1234567-89.2024.1.01.0001").unwrap();
        let miss = CaseNumber::parse("7654321-00.2023.8.26.0100").unwrap();
        assert!(store.find_by_case_number(&hit).await.unwrap().is_some());
        assert!(store.find_by_case_number(&miss).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_in_memory_round_trips_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create(draft("1234567-89.2024.1.01.0001")).await.unwrap();

        let found = store
            .find_by_case_number(created.case_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.fields, created.fields);
        assert_eq!(found.status, PublicationStatus::Nova);
        assert_eq!(found.defendant, crate::INSTITUTIONAL_DEFENDANT);
    }
}
