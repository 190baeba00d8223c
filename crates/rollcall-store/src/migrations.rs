/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department TEXT,
    descriptor TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL,
    name TEXT NOT NULL,
    distance REAL NOT NULL,
    confidence REAL NOT NULL,
    attended_on TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE (identity_id, attended_on)
);

CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance (attended_on, recorded_at);
"#;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "identities_and_attendance",
    sql: MIGRATION_001,
}];
