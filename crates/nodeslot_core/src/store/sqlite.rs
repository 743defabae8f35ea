//! SQLite-backed node records.
//!
//! # Invariants
//! - Only active (`is_deleted=0`) records are visible.
//! - Deletion is a soft-delete tombstone carrying the batch sequence, so a
//!   late write from an older batch cannot resurrect the record.

use crate::db::migrations::latest_version;
use crate::db::{open_db, open_db_in_memory};
use crate::store::backend::{BatchOutcome, StoreBackend, WriteBatch};
use crate::store::{StoreError, StoreResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const TABLE: &str = "node_records";
const REQUIRED_COLUMNS: [&str; 6] = [
    "id",
    "payload",
    "write_seq",
    "is_deleted",
    "created_at",
    "updated_at",
];

/// Store backend over one migrated SQLite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Opens (and migrates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::try_new(open_db(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    /// Wraps an existing connection after checking its schema.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations have not been applied.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl StoreBackend for SqliteBackend {
    fn load(&self, id: &str) -> StoreResult<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM node_records WHERE id = ?1 AND is_deleted = 0;",
                [id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn apply(&mut self, batch: &WriteBatch) -> StoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let tx = self.conn.transaction()?;
        for write in &batch.writes {
            let changed = tx.execute(
                "INSERT INTO node_records (id, payload, write_seq, is_deleted)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    write_seq = excluded.write_seq,
                    is_deleted = 0,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE node_records.write_seq <= excluded.write_seq;",
                params![write.id, write.payload, batch.seq],
            )?;
            if changed == 0 {
                outcome.stale += 1;
            } else {
                outcome.written += 1;
            }
        }

        for id in &batch.deletes {
            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT write_seq, is_deleted FROM node_records WHERE id = ?1;",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match existing {
                Some((seq, _)) if seq > batch.seq => outcome.stale += 1,
                Some((_, is_deleted)) => {
                    tx.execute(
                        "UPDATE node_records
                         SET is_deleted = 1,
                             write_seq = ?2,
                             updated_at = (strftime('%s', 'now') * 1000)
                         WHERE id = ?1;",
                        params![id, batch.seq],
                    )?;
                    if is_deleted == 0 {
                        outcome.deleted += 1;
                    }
                }
                None => {
                    tx.execute(
                        "INSERT INTO node_records (id, payload, write_seq, is_deleted)
                         VALUES (?1, '', ?2, 1);",
                        params![id, batch.seq],
                    )?;
                }
            }
        }
        tx.commit()?;

        debug!(
            "event=store_apply module=store backend=sqlite seq={} written={} deleted={} stale={}",
            batch.seq, outcome.written, outcome.deleted, outcome.stale
        );
        Ok(outcome)
    }

    fn ids(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM node_records WHERE is_deleted = 0 ORDER BY id ASC;")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    fn max_write_seq(&self) -> StoreResult<i64> {
        let seq: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(write_seq), 0) FROM node_records;",
            [],
            |row| row.get(0),
        )?;
        Ok(seq)
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, TABLE)? {
        return Err(StoreError::MissingRequiredTable(TABLE));
    }
    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, TABLE, column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: TABLE,
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::store::backend::{PendingWrite, StoreBackend, WriteBatch};
    use crate::store::StoreError;
    use rusqlite::Connection;

    fn batch(seq: i64, writes: &[(&str, &str)], deletes: &[&str]) -> WriteBatch {
        WriteBatch {
            seq,
            writes: writes
                .iter()
                .map(|(id, payload)| PendingWrite {
                    id: id.to_string(),
                    payload: payload.to_string(),
                })
                .collect(),
            deletes: deletes.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn unmigrated_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteBackend::try_new(conn).err().unwrap();
        assert!(matches!(err, StoreError::UninitializedConnection { .. }));
    }

    #[test]
    fn upsert_respects_sequence_order() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend.apply(&batch(5, &[("a", "five")], &[])).unwrap();
        let outcome = backend.apply(&batch(4, &[("a", "four")], &[])).unwrap();

        assert_eq!(outcome.stale, 1);
        assert_eq!(backend.load("a").unwrap().as_deref(), Some("five"));
        assert_eq!(backend.max_write_seq().unwrap(), 5);
    }

    #[test]
    fn soft_delete_hides_record() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .apply(&batch(1, &[("a", "x"), ("b", "y")], &[]))
            .unwrap();
        let outcome = backend.apply(&batch(2, &[], &["a"])).unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(backend.load("a").unwrap(), None);
        assert_eq!(backend.ids().unwrap(), vec!["b".to_string()]);

        let rows: i64 = backend
            .connection()
            .query_row("SELECT COUNT(*) FROM node_records;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }
}
