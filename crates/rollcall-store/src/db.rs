use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rollcall_core::codec;
use rollcall_core::{Embedding, Identity, IdentityRecord};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::migrations::{Migration, MIGRATIONS};

/// One attendance event: an identity seen on a given (UTC) day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub identity_id: String,
    pub name: String,
    pub distance: f64,
    pub confidence: f64,
    pub attended_on: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of recording a match decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceRecord),
    /// The identity already has attendance for that day; the existing row is returned unchanged.
    AlreadyRecorded(AttendanceRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            RecordOutcome::Recorded(r) | RecordOutcome::AlreadyRecorded(r) => r,
        }
    }
}

/// The enrolled catalog as read for one match, in enrollment order.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub records: Vec<IdentityRecord>,
    /// Ids of rows whose stored descriptor could not be decoded.
    pub skipped: Vec<String>,
}

/// SQLite-backed catalog and attendance log.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.apply_migrations()?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.apply_migrations()?;
        Ok(store)
    }

    fn apply_migrations(&self) -> Result<()> {
        apply_migrations(&self.conn, MIGRATIONS)
    }
}

/// Apply every migration not yet listed in `schema_migrations`.
///
/// Each migration runs in its own transaction together with its bookkeeping
/// row, so a failing migration leaves neither partial schema nor a version
/// marker behind.
fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    for migration in migrations {
        let tx = conn.unchecked_transaction()?;
        let applied: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![migration.version],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applying migration"
        );
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, timestamp(&Utc::now())],
        )?;
        tx.commit()?;
    }
    Ok(())
}

// Catalog
impl Store {
    /// Enroll a new identity with its face descriptor.
    pub fn enroll(
        &self,
        name: &str,
        department: Option<&str>,
        embedding: &Embedding,
    ) -> Result<IdentityRecord> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidData("identity name must not be empty".into()));
        }

        let record = IdentityRecord {
            identity: Identity {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                department: department.map(str::to_string),
            },
            embedding: embedding.clone(),
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO identities (id, name, department, descriptor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.identity.id,
                record.identity.name,
                record.identity.department,
                codec::encode(&record.embedding),
                timestamp(&record.created_at),
            ],
        )?;

        tracing::info!(
            id = %record.identity.id,
            name = %record.identity.name,
            dim = record.embedding.len(),
            "identity enrolled"
        );
        Ok(record)
    }

    /// Read the whole catalog in enrollment order.
    ///
    /// Rows whose descriptor does not decode, or whose enrollment time does
    /// not parse, are left out and listed in `skipped`, so one corrupt row
    /// does not hide everyone else.
    pub fn catalog(&self) -> Result<CatalogSnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, department, descriptor, created_at
             FROM identities
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    Identity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        department: row.get(2)?,
                    },
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut snapshot = CatalogSnapshot::default();
        for (identity, descriptor, created_at) in rows {
            let decoded = codec::decode(&descriptor)
                .map_err(|e| e.to_string())
                .and_then(|embedding| {
                    let created_at = parse_timestamp(&created_at)
                        .map_err(|e| format!("bad created_at {created_at:?}: {e}"))?;
                    Ok((embedding, created_at))
                });
            match decoded {
                Ok((embedding, created_at)) => snapshot.records.push(IdentityRecord {
                    identity,
                    embedding,
                    created_at,
                }),
                Err(error) => {
                    tracing::warn!(id = %identity.id, %error, "skipping catalog row");
                    snapshot.skipped.push(identity.id);
                }
            }
        }
        Ok(snapshot)
    }

    /// Remove an identity and its attendance history. Returns whether it existed.
    pub fn remove_identity(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM attendance WHERE identity_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        tx.commit()?;

        if removed > 0 {
            tracing::info!(id, "identity removed");
        }
        Ok(removed > 0)
    }

    pub fn count_identities(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| StoreError::InvalidData(format!("row count {count}")))
    }
}

// Attendance
impl Store {
    /// Record that `identity` was recognized at `at`.
    ///
    /// Attendance is kept once per identity per UTC day: a second
    /// recognition on the same day leaves the first record in place.
    pub fn record_attendance(
        &self,
        identity: &Identity,
        distance: f64,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            identity_id: identity.id.clone(),
            name: identity.name.clone(),
            distance,
            confidence,
            attended_on: at.date_naive(),
            recorded_at: at,
        };

        let inserted = self.conn.execute(
            "INSERT INTO attendance
                (id, identity_id, name, distance, confidence, attended_on, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (identity_id, attended_on) DO NOTHING",
            params![
                record.id,
                record.identity_id,
                record.name,
                record.distance,
                record.confidence,
                record.attended_on.to_string(),
                timestamp(&record.recorded_at),
            ],
        )?;

        if inserted > 0 {
            tracing::info!(
                identity = %record.identity_id,
                name = %record.name,
                day = %record.attended_on,
                "attendance recorded"
            );
            return Ok(RecordOutcome::Recorded(record));
        }

        let existing = self
            .conn
            .query_row(
                "SELECT id, identity_id, name, distance, confidence, attended_on, recorded_at
                 FROM attendance
                 WHERE identity_id = ?1 AND attended_on = ?2",
                params![record.identity_id, record.attended_on.to_string()],
                row_to_attendance,
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "attendance for {} on {} neither inserted nor found",
                    record.identity_id, record.attended_on
                ))
            })?;
        tracing::debug!(
            identity = %existing.identity_id,
            day = %existing.attended_on,
            "attendance already recorded"
        );
        Ok(RecordOutcome::AlreadyRecorded(existing))
    }

    /// Attendance for one day, earliest first.
    pub fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity_id, name, distance, confidence, attended_on, recorded_at
             FROM attendance
             WHERE attended_on = ?1
             ORDER BY recorded_at, rowid",
        )?;
        let records = stmt
            .query_map(params![day.to_string()], row_to_attendance)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_attendance(row: &Row) -> rusqlite::Result<AttendanceRecord> {
    let attended_on: String = row.get(5)?;
    let recorded_at: String = row.get(6)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        name: row.get(2)?,
        distance: row.get(3)?,
        confidence: row.get(4)?,
        attended_on: attended_on
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        recorded_at: parse_timestamp(&recorded_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
    })
}
