//! Database schema definitions
//!
//! This module contains the SQL schema for the SQLite storage backend.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Key-value records, namespaced by store name
CREATE TABLE IF NOT EXISTS kv_records (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (store, key)
);

-- Durable request queues, namespaced by queue name
CREATE TABLE IF NOT EXISTS queue_requests (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    unique_key TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    payload TEXT,
    user_data TEXT NOT NULL,
    state TEXT NOT NULL,
    added_at TEXT NOT NULL,
    handled_at TEXT,
    UNIQUE (queue, unique_key)
);

CREATE INDEX IF NOT EXISTS idx_queue_requests_state ON queue_requests(queue, state, seq);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["kv_records", "queue_requests"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
