use rusqlite::Connection;

use crate::error::StoreError;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table creation fails
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // One row per `UsageField`; the value is the field's JSON encoding.
    // A missing row means the field was never initialized.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS usage_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
