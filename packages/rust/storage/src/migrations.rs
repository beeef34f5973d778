//! SQL migration definitions for the optout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: organizations, attempts",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per organization, keyed by its exact name
CREATE TABLE IF NOT EXISTS organizations (
    name             TEXT PRIMARY KEY,
    website          TEXT,
    contact_page_url TEXT,
    contact_type     TEXT NOT NULL DEFAULT 'none'
                     CHECK (contact_type IN ('none', 'email', 'form', 'both')),
    contact_value    TEXT,
    status           TEXT NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'success', 'failed', 'manual')),
    error_message    TEXT,
    attempts         INTEGER NOT NULL DEFAULT 0,
    last_attempt_at  TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    CHECK ((contact_type = 'none') = (contact_value IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_organizations_status ON organizations(status);

-- Append-only stage log
CREATE TABLE IF NOT EXISTS attempts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    org_name     TEXT NOT NULL REFERENCES organizations(name) ON DELETE CASCADE,
    attempt_type TEXT NOT NULL
                 CHECK (attempt_type IN ('search', 'contact_find', 'email', 'form')),
    success      INTEGER NOT NULL,
    details_json TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attempts_org ON attempts(org_name);
CREATE INDEX IF NOT EXISTS idx_attempts_type ON attempts(attempt_type, success);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
