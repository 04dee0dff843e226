use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;
use crate::migrations;
use crate::models::{PartialUsage, UsageField};

/// Durable key/value record backing the usage state.
///
/// Every `read_fields` / `write_fields` call is atomic on its own; there are
/// no transactions spanning calls.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        // The CLI reads while the daemon writes
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Non-durable database, mostly for tests
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get default database path
    #[must_use]
    pub fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("curfew");
        path.push("curfew.db");
        path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Read the requested fields in a single statement.
    ///
    /// Missing rows are left absent in the result. Rows that fail to decode
    /// are logged and treated as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn read_fields(&self, fields: &[UsageField]) -> Result<PartialUsage, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT key, value FROM usage_state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut partial = PartialUsage::default();
        for (key, value) in rows {
            let Some(field) = UsageField::from_key(&key) else {
                continue;
            };
            if !fields.contains(&field) {
                continue;
            }
            if let Err(e) = partial.decode_field(field, &value) {
                log::warn!("Ignoring undecodable value for {key}: {e}");
            }
        }
        Ok(partial)
    }

    /// Write every field present in `partial` inside one transaction
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be encoded or the transaction fails
    pub fn write_fields(&self, partial: &PartialUsage) -> Result<(), StoreError> {
        let mut encoded = Vec::new();
        for field in partial.fields() {
            let value = partial
                .encode_field(field)
                .map_err(|source| StoreError::Encode {
                    field: field.key(),
                    source,
                })?;
            if let Some(value) = value {
                encoded.push((field.key(), value));
            }
        }
        if encoded.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for (key, value) in &encoded {
            tx.execute(
                "INSERT INTO usage_state (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = ?2,
                    updated_at = ?3",
                params![key, value, now],
            )?;
        }
        tx.commit()?;

        log::debug!("Persisted {} usage field(s)", encoded.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalDomain, PerSiteUsage, UsageState};
    use chrono::{DateTime, TimeZone};

    fn reset_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 6, 30, 0).unwrap()
    }

    #[test]
    fn test_empty_database_reads_nothing() {
        let db = Database::in_memory().unwrap();
        let partial = db.read_fields(&UsageField::ALL).unwrap();
        assert!(partial.is_empty());
        assert_eq!(partial.daily_usage_total(), 0);
        assert_eq!(partial.open_session(), None);
    }

    #[test]
    fn test_write_then_read_selected_fields() {
        let db = Database::in_memory().unwrap();
        db.write_fields(&UsageState::fresh(reset_instant()).into())
            .unwrap();

        let mut per_site = PerSiteUsage::zeroed();
        per_site.add(CanonicalDomain::Reddit, 60_000);
        db.write_fields(&PartialUsage {
            daily_usage_total: Some(60_000),
            per_site_usage: Some(per_site),
            ..PartialUsage::default()
        })
        .unwrap();

        let partial = db
            .read_fields(&[UsageField::DailyUsageTotal, UsageField::PerSiteUsage])
            .unwrap();
        assert_eq!(partial.daily_usage_total(), 60_000);
        assert_eq!(partial.per_site_usage().get(CanonicalDomain::Reddit), 60_000);
        assert!(!partial.has(UsageField::LastResetTimestamp));

        let all = db.read_fields(&UsageField::ALL).unwrap();
        assert_eq!(all.last_reset_timestamp, Some(reset_instant()));
        assert_eq!(all.current_session_start, Some(None));
    }

    #[test]
    fn test_undecodable_row_is_treated_as_missing() {
        let db = Database::in_memory().unwrap();
        db.connection()
            .unwrap()
            .execute(
                "INSERT INTO usage_state (key, value, updated_at) VALUES ('dailyUsageTotal', 'not json', '')",
                [],
            )
            .unwrap();

        let partial = db.read_fields(&UsageField::ALL).unwrap();
        assert!(!partial.has(UsageField::DailyUsageTotal));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("curfew.db");
        let start = reset_instant() + chrono::Duration::hours(3);

        {
            let db = Database::new(Some(path.clone())).unwrap();
            db.write_fields(&PartialUsage {
                current_session_start: Some(Some(start)),
                current_session_domain: Some(Some(CanonicalDomain::X)),
                ..PartialUsage::default()
            })
            .unwrap();
        }

        let db = Database::new(Some(path)).unwrap();
        let session = db.read_fields(&UsageField::ALL).unwrap().open_session().unwrap();
        assert_eq!(session.domain, CanonicalDomain::X);
        assert_eq!(session.start, start);
    }
}
