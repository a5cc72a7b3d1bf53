//! Visitor records.
//!
//! Records are created on registration and never modified or deleted. Email is the
//! uniqueness key, compared after trimming and lowercasing.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lettre::Address;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, types::Type};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{BoothError, BoothResult};

const MAX_NAME_CHARS: usize = 100;
const MAX_EMAIL_CHARS: usize = 254;

/// A registered visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Validated registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisitor {
    pub name: String,
    pub email: String,
}

impl NewVisitor {
    pub fn parse(name: Option<&str>, email: Option<&str>) -> BoothResult<Self> {
        let name = name.map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(BoothError::missing("name"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(BoothError::validation(
                "name",
                format!("must be at most {MAX_NAME_CHARS} characters"),
                "",
            ));
        }
        Ok(Self {
            name: name.to_string(),
            email: normalize_email(email)?,
        })
    }
}

/// Trim, lowercase and validate an email address.
///
/// The address must parse as an RFC 5321 mailbox and carry a dotted domain, so
/// anything stored here is also something the mailer can address.
pub fn normalize_email(raw: Option<&str>) -> BoothResult<String> {
    let email = raw.map(str::trim).unwrap_or_default().to_lowercase();
    if email.is_empty() {
        return Err(BoothError::missing("email"));
    }

    let malformed = || BoothError::validation("email", "is not a valid address", &email);
    if email.len() > MAX_EMAIL_CHARS {
        return Err(malformed());
    }
    let address: Address = email.parse().map_err(|_| malformed())?;
    let domain = address.domain();
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(malformed());
    }
    Ok(email)
}

/// Persistence for visitor records.
#[async_trait]
pub trait VisitorStore: Send + Sync {
    /// Create a record. Fails with `Conflict` if the email is already registered.
    async fn insert(&self, visitor: NewVisitor) -> BoothResult<VisitorRecord>;

    /// All records, newest first.
    async fn list(&self) -> BoothResult<Vec<VisitorRecord>>;

    async fn get(&self, id: Uuid) -> BoothResult<Option<VisitorRecord>>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS visitors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
)";

const COLUMNS: &str = "id, name, email, created_at";

/// Records in a SQLite database.
///
/// The `UNIQUE` constraint on `email` is the duplicate check, so two concurrent
/// registrations for one address cannot both succeed.
pub struct SqliteVisitorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVisitorStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: impl Into<PathBuf>) -> BoothResult<Self> {
        let path = path.into();
        let store = tokio::task::spawn_blocking(move || {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| BoothError::io_at("create record dir", dir, e))?;
            }
            let conn = Connection::open(&path)
                .map_err(|e| BoothError::from(e).with_context(path.display().to_string()))?;
            let store = Self::with_connection(conn)?;
            info!(path = %path.display(), "Visitor store opened");
            Ok::<_, BoothError>(store)
        })
        .await
        .map_err(|e| BoothError::external("tokio", e))??;
        Ok(store)
    }

    /// A store that never touches disk.
    pub fn in_memory() -> BoothResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> BoothResult<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> BoothResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> BoothResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| BoothError::external("tokio", e))?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VisitorRecord> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(3)?;
    Ok(VisitorRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
    })
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl VisitorStore for SqliteVisitorStore {
    #[instrument(skip(self, visitor), fields(email = %visitor.email))]
    async fn insert(&self, visitor: NewVisitor) -> BoothResult<VisitorRecord> {
        let record = VisitorRecord {
            id: Uuid::new_v4(),
            name: visitor.name,
            email: visitor.email,
            created_at: Utc::now(),
        };

        let row = record.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO visitors (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.name,
                    row.email,
                    row.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BoothError::conflict("visitor with email", &row.email)
                        .with_recovery_suggestion("Use a different email address")
                } else {
                    warn!(error = %e, "Visitor not persisted");
                    BoothError::from(e)
                }
            })
        })
        .await?;

        info!(id = %record.id, "Visitor registered");
        Ok(record)
    }

    async fn list(&self) -> BoothResult<Vec<VisitorRecord>> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM visitors ORDER BY created_at DESC, rowid DESC"
            ))?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> BoothResult<Option<VisitorRecord>> {
        self.call(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM visitors WHERE id = ?1"),
                    params![id.to_string()],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asha() -> NewVisitor {
        NewVisitor::parse(Some(" Asha "), Some("Asha@X.com")).unwrap()
    }

    #[test]
    fn parse_trims_and_normalizes() {
        let visitor = asha();
        assert_eq!(visitor.name, "Asha");
        assert_eq!(visitor.email, "asha@x.com");
    }

    #[test]
    fn parse_rejects_missing_and_malformed_fields() {
        assert_eq!(NewVisitor::parse(None, Some("a@x.com")).unwrap_err().category(), "validation");
        assert_eq!(NewVisitor::parse(Some("A"), Some("  ")).unwrap_err().category(), "validation");
        for bad in ["asha", "asha@", "@x.com", "asha@x", "a b@x.com", "a@x.com."] {
            assert!(normalize_email(Some(bad)).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn addresses_the_mailer_cannot_take_are_rejected() {
        for bad in ["a,b@x.com", "a(b@x.com", "a@x..com"] {
            let err = normalize_email(Some(bad)).unwrap_err();
            assert_eq!(err.category(), "validation", "{bad}");
        }
        assert_eq!(normalize_email(Some(" Dee.O+booth@Mail.X.com ")).unwrap(), "dee.o+booth@mail.x.com");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_and_keeps_original() {
        let store = SqliteVisitorStore::in_memory().unwrap();
        let first = store.insert(asha()).await.unwrap();

        let dup = NewVisitor::parse(Some("Asha2"), Some("asha@x.com")).unwrap();
        assert_eq!(store.insert(dup).await.unwrap_err().category(), "conflict");

        let all = store.list().await.unwrap();
        assert_eq!(all, vec![first]);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("visitors.db");

        let store = SqliteVisitorStore::open(&path).await.unwrap();
        let record = store.insert(asha()).await.unwrap();
        drop(store);

        let reopened = SqliteVisitorStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn concurrent_registrations_for_one_email_admit_exactly_one() {
        let store = Arc::new(SqliteVisitorStore::in_memory().unwrap());
        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let visitor = NewVisitor::parse(Some(format!("Asha{i}").as_str()), Some("asha@x.com")).unwrap();
                    store.insert(visitor).await
                })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.category(), "conflict"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = SqliteVisitorStore::in_memory().unwrap();
        let a = store.insert(asha()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = store
            .insert(NewVisitor::parse(Some("Ben"), Some("ben@x.com")).unwrap())
            .await
            .unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn records_serialize_camel_case() {
        let record = VisitorRecord {
            id: Uuid::nil(),
            name: "Asha".into(),
            email: "asha@x.com".into(),
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("createdAt").is_some());
    }
}
