//! libSQL storage layer for organization state.
//!
//! The [`Storage`] struct wraps an embedded libSQL database holding one row
//! per organization plus an append-only attempt log. It is the single source
//! of truth for pipeline resumability: every terminal outcome is written
//! together with its attempt record in one transaction.
//!
//! **Access rules:**
//! - pipeline and send commands: read-write via [`Storage::open`]
//! - reporting: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use optout_shared::{
    Attempt, AttemptType, ContactType, NewAttempt, OptoutError, OrgStatus, Organization, Outcome,
    Result, StoreStats,
};

/// Column list matching [`row_to_organization`].
const ORG_COLUMNS: &str = "name, website, contact_page_url, contact_type, contact_value, status, \
     error_message, attempts, last_attempt_at, created_at, updated_at";

/// Which organizations a reset applies to.
#[derive(Debug, Clone)]
pub enum ResetScope {
    /// A single organization by exact name.
    Name(String),
    /// Every organization currently in the given status.
    Status(OrgStatus),
    /// Every organization.
    All,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OptoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OptoutError::Storage(format!(
                "no database at {}; import some organizations first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        OptoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(OptoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Insert organizations by name in one transaction.
    ///
    /// Names are trimmed and blanks skipped. Names already present are left
    /// untouched. Returns the number of newly created rows.
    pub async fn import<I, S>(&self, names: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(db_err)?;

        let mut created = 0;
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            created += tx
                .execute(
                    "INSERT INTO organizations (name, created_at, updated_at)
                     VALUES (?1, ?2, ?2)
                     ON CONFLICT(name) DO NOTHING",
                    params![name, now.as_str()],
                )
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(created, "import committed");
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Get an organization by exact name.
    pub async fn get(&self, name: &str) -> Result<Option<Organization>> {
        let sql = format!("SELECT {ORG_COLUMNS} FROM organizations WHERE name = ?1");
        let mut rows = self.conn.query(&sql, params![name]).await.map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_organization(&row)?)),
            None => Ok(None),
        }
    }

    /// All organizations in `status`, ordered by name.
    pub async fn list_by_status(&self, status: OrgStatus) -> Result<Vec<Organization>> {
        let sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE status = ?1 ORDER BY name"
        );
        self.query_organizations(&sql, params![status.as_str()]).await
    }

    /// Pending organizations with a cached contact page, ordered by name.
    pub async fn list_pending_with_contact_page(&self) -> Result<Vec<Organization>> {
        let sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE status = 'pending' AND contact_page_url IS NOT NULL
             ORDER BY name"
        );
        self.query_organizations(&sql, params![]).await
    }

    /// Pending organizations with no website yet, ordered by name.
    pub async fn list_pending_without_website(&self) -> Result<Vec<Organization>> {
        let sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE status = 'pending' AND website IS NULL
             ORDER BY name"
        );
        self.query_organizations(&sql, params![]).await
    }

    /// Successful organizations with an email channel that have not been
    /// emailed successfully yet, ordered by name.
    pub async fn list_email_targets(&self) -> Result<Vec<Organization>> {
        let sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations o
             WHERE o.status = 'success'
               AND o.contact_type IN ('email', 'both')
               AND NOT EXISTS (
                   SELECT 1 FROM attempts a
                   WHERE a.org_name = o.name AND a.attempt_type = 'email' AND a.success = 1
               )
             ORDER BY o.name"
        );
        self.query_organizations(&sql, params![]).await
    }

    /// Attempts for an organization in insertion order.
    pub async fn list_attempts(&self, org_name: &str) -> Result<Vec<Attempt>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, org_name, attempt_type, success, details_json, created_at
                 FROM attempts WHERE org_name = ?1 ORDER BY id",
                params![org_name],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_attempt(&row)?);
        }
        Ok(results)
    }

    /// Aggregate counts computed from the current rows.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(status = 'manual'), 0),
                    COALESCE(SUM(contact_type = 'email'), 0),
                    COALESCE(SUM(contact_type = 'form'), 0),
                    COALESCE(SUM(contact_type = 'both'), 0),
                    COALESCE(SUM(contact_type = 'none'), 0)
                 FROM organizations",
                params![],
            )
            .await
            .map_err(db_err)?;

        let row = rows
            .next()
            .await
            .map_err(db_err)?
            .ok_or_else(|| OptoutError::Storage("stats query returned no row".into()))?;

        let count = |idx: i32| -> Result<u64> {
            row.get::<i64>(idx).map(|v| v as u64).map_err(db_err)
        };

        let mut stats = StoreStats {
            total: count(0)?,
            pending: count(1)?,
            success: count(2)?,
            failed: count(3)?,
            manual: count(4)?,
            with_email: count(5)?,
            with_form: count(6)?,
            with_both: count(7)?,
            without_contact: count(8)?,
            emailed: 0,
        };

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(DISTINCT org_name) FROM attempts
                 WHERE attempt_type = 'email' AND success = 1",
                params![],
            )
            .await
            .map_err(db_err)?;
        if let Some(row) = rows.next().await.map_err(db_err)? {
            stats.emailed = row.get::<i64>(0).map_err(db_err)? as u64;
        }

        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Write a terminal outcome: sets fields, increments `attempts`, stamps
    /// `last_attempt_at`. A `None` website or channel keeps the stored value.
    pub async fn record_outcome(&self, name: &str, outcome: &Outcome) -> Result<()> {
        self.check_writable()?;
        outcome.validate()?;
        apply_outcome(&self.conn, name, outcome).await
    }

    /// Write a terminal outcome and its attempt record in one transaction.
    pub async fn record_terminal(
        &self,
        name: &str,
        outcome: &Outcome,
        attempt: &NewAttempt,
    ) -> Result<()> {
        self.check_writable()?;
        outcome.validate()?;

        let tx = self.conn.transaction().await.map_err(db_err)?;
        apply_outcome(&tx, name, outcome).await?;
        insert_attempt(&tx, name, attempt).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Cache non-terminal discovery results.
    ///
    /// An already-known website is kept; a supplied contact page replaces the
    /// cached one. The optional attempt is appended in the same transaction.
    /// Status and `attempts` are not touched.
    pub async fn cache_discovery(
        &self,
        name: &str,
        website: Option<&str>,
        contact_page_url: Option<&str>,
        attempt: Option<&NewAttempt>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(db_err)?;

        let changed = tx
            .execute(
                "UPDATE organizations SET
                   website = COALESCE(website, ?2),
                   contact_page_url = COALESCE(?3, contact_page_url),
                   updated_at = ?4
                 WHERE name = ?1",
                params![name, website, contact_page_url, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(OptoutError::NotFound(format!("organization '{name}'")));
        }

        if let Some(attempt) = attempt {
            insert_attempt(&tx, name, attempt).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Force organizations back to `pending` and clear their error message.
    ///
    /// Attempts, website, and discovered contact fields are kept. Rows that
    /// are already pending with no error are not rewritten, so reapplying is
    /// a no-op. Returns the number of rows changed.
    pub async fn reset(&self, scope: &ResetScope) -> Result<u64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let needs_reset = "(status <> 'pending' OR error_message IS NOT NULL)";
        let set = "SET status = 'pending', error_message = NULL, updated_at = ?1";

        let changed = match scope {
            ResetScope::Name(name) => {
                self.conn
                    .execute(
                        &format!("UPDATE organizations {set} WHERE name = ?2 AND {needs_reset}"),
                        params![now.as_str(), name.as_str()],
                    )
                    .await
            }
            ResetScope::Status(status) => {
                self.conn
                    .execute(
                        &format!("UPDATE organizations {set} WHERE status = ?2 AND {needs_reset}"),
                        params![now.as_str(), status.as_str()],
                    )
                    .await
            }
            ResetScope::All => {
                self.conn
                    .execute(
                        &format!("UPDATE organizations {set} WHERE {needs_reset}"),
                        params![now.as_str()],
                    )
                    .await
            }
        }
        .map_err(db_err)?;

        tracing::info!(?scope, changed, "reset organizations to pending");
        Ok(changed)
    }

    /// Append an attempt record.
    ///
    /// Silently does nothing if the organization does not exist. Returns
    /// whether a row was written.
    pub async fn append_attempt(
        &self,
        org_name: &str,
        attempt_type: AttemptType,
        success: bool,
        details: serde_json::Value,
    ) -> Result<bool> {
        self.check_writable()?;
        let attempt = NewAttempt::new(attempt_type, success, details);
        let written = insert_attempt(&self.conn, org_name, &attempt).await?;
        if !written {
            tracing::debug!(org = org_name, "attempt for unknown organization ignored");
        }
        Ok(written)
    }

    async fn query_organizations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Organization>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_organization(&row)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Statement helpers (shared by plain and transactional writes)
// ---------------------------------------------------------------------------

async fn apply_outcome(conn: &Connection, name: &str, outcome: &Outcome) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let contact_type = outcome
        .channel
        .as_ref()
        .map(|c| c.contact_type().as_str());
    let contact_value = outcome.channel.as_ref().map(|c| c.value());

    let changed = conn
        .execute(
            "UPDATE organizations SET
               website = COALESCE(?2, website),
               contact_type = COALESCE(?3, contact_type),
               contact_value = COALESCE(?4, contact_value),
               status = ?5,
               error_message = ?6,
               attempts = attempts + 1,
               last_attempt_at = ?7,
               updated_at = ?7
             WHERE name = ?1",
            params![
                name,
                outcome.website.as_deref(),
                contact_type,
                contact_value,
                outcome.status.as_str(),
                outcome.error_message.as_deref(),
                now.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;

    if changed == 0 {
        return Err(OptoutError::NotFound(format!("organization '{name}'")));
    }
    Ok(())
}

async fn insert_attempt(conn: &Connection, org_name: &str, attempt: &NewAttempt) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let details = serde_json::to_string(&attempt.details)
        .map_err(|e| OptoutError::Storage(format!("attempt details: {e}")))?;

    let written = conn
        .execute(
            "INSERT INTO attempts (org_name, attempt_type, success, details_json, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (SELECT 1 FROM organizations WHERE name = ?1)",
            params![
                org_name,
                attempt.attempt_type.as_str(),
                attempt.success as i64,
                details,
                now.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;

    Ok(written > 0)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> OptoutError {
    OptoutError::Storage(e.to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OptoutError::Storage(format!("invalid date '{s}': {e}")))
}

/// Convert a database row selected with [`ORG_COLUMNS`] to an [`Organization`].
fn row_to_organization(row: &libsql::Row) -> Result<Organization> {
    let contact_type: String = row.get(3).map_err(db_err)?;
    let status: String = row.get(5).map_err(db_err)?;
    let created_at: String = row.get(9).map_err(db_err)?;
    let updated_at: String = row.get(10).map_err(db_err)?;

    Ok(Organization {
        name: row.get::<String>(0).map_err(db_err)?,
        website: row.get::<String>(1).ok(),
        contact_page_url: row.get::<String>(2).ok(),
        contact_type: contact_type.parse::<ContactType>()?,
        contact_value: row.get::<String>(4).ok(),
        status: status.parse::<OrgStatus>()?,
        error_message: row.get::<String>(6).ok(),
        attempts: row.get::<i64>(7).map_err(db_err)? as u32,
        last_attempt_at: match row.get::<String>(8).ok() {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_attempt(row: &libsql::Row) -> Result<Attempt> {
    let attempt_type: String = row.get(2).map_err(db_err)?;
    let details: String = row.get(4).map_err(db_err)?;
    let created_at: String = row.get(5).map_err(db_err)?;

    Ok(Attempt {
        id: row.get::<i64>(0).map_err(db_err)?,
        org_name: row.get::<String>(1).map_err(db_err)?,
        attempt_type: attempt_type.parse::<AttemptType>()?,
        success: row.get::<i64>(3).map_err(db_err)? != 0,
        details: serde_json::from_str(&details)
            .map_err(|e| OptoutError::Storage(format!("attempt details: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}
