//! SQLite-backed storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::SyncStore;
use crate::models::{Account, AccountSyncState, ItemKind, SyncItem, SyncStatus};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Connected provider accounts
            CREATE TABLE accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                display_name TEXT,
                connected_at TEXT NOT NULL
            );

            -- Mirrored items, identified by (account_id, external_id)
            CREATE TABLE items (
                account_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                labels TEXT NOT NULL DEFAULT '[]',  -- JSON array
                payload TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                PRIMARY KEY (account_id, external_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_items_account ON items(account_id);

            -- Sync state per account
            CREATE TABLE sync_state (
                account_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                checkpoint TEXT,
                retry_after TEXT,
                rate_limit_streak INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT,
                items_synced INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER,
                error_message TEXT
            );
            "#,
        ),
    ])
}

/// SQLite-backed implementation of [`SyncStore`]
pub struct SqliteSyncStore {
    conn: Mutex<Connection>,
}

impl SqliteSyncStore {
    /// Open (or create) the database at `db_path` and run migrations.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers; foreign_keys required for the
        // accounts -> items cascade.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests)
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn status_to_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Idle => "idle",
        SyncStatus::Syncing => "syncing",
        SyncStatus::RateLimited => "rate_limited",
        SyncStatus::Error => "error",
        SyncStatus::Completed => "completed",
    }
}

fn status_from_str(s: &str) -> Result<SyncStatus> {
    match s {
        "idle" => Ok(SyncStatus::Idle),
        "syncing" => Ok(SyncStatus::Syncing),
        "rate_limited" => Ok(SyncStatus::RateLimited),
        "error" => Ok(SyncStatus::Error),
        "completed" => Ok(SyncStatus::Completed),
        other => anyhow::bail!("Unknown sync status in database: {}", other),
    }
}

fn kind_from_str(s: &str) -> Result<ItemKind> {
    match s {
        "mail" => Ok(ItemKind::Mail),
        "calendar" => Ok(ItemKind::Calendar),
        other => anyhow::bail!("Unknown item kind in database: {}", other),
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

impl SyncStore for SqliteSyncStore {
    fn add_account(&self, account: Account) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO accounts (id, email, display_name, connected_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name
            "#,
            params![
                account.id,
                account.email,
                account.display_name,
                account.connected_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                "SELECT id, email, display_name, connected_at FROM accounts WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        account
            .map(|(id, email, display_name, connected_at)| {
                Ok(Account {
                    id,
                    email,
                    display_name,
                    connected_at: parse_ts(&connected_at)?,
                })
            })
            .transpose()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, email, display_name, connected_at FROM accounts ORDER BY id")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, email, display_name, connected_at)| {
                Ok(Account {
                    id,
                    email,
                    display_name,
                    connected_at: parse_ts(&connected_at)?,
                })
            })
            .collect()
    }

    fn remove_account(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // items cascade via the foreign key; sync_state has no FK so the
        // account's record is removed explicitly.
        conn.execute("DELETE FROM accounts WHERE id = ?", [id])?;
        conn.execute("DELETE FROM sync_state WHERE account_id = ?", [id])?;
        Ok(())
    }

    fn upsert_item(&self, item: SyncItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO items (account_id, external_id, kind, labels, payload, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(account_id, external_id) DO UPDATE SET
                kind = excluded.kind,
                labels = excluded.labels,
                payload = excluded.payload,
                fetched_at = excluded.fetched_at
            "#,
            params![
                item.account_id,
                item.external_id,
                item.kind.as_str(),
                serde_json::to_string(&item.labels)?,
                item.payload,
                item.fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_item(&self, account_id: &str, external_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM items WHERE account_id = ?1 AND external_id = ?2",
            params![account_id, external_id],
        )?;
        Ok(())
    }

    fn get_item(&self, account_id: &str, external_id: &str) -> Result<Option<SyncItem>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT kind, labels, payload, fetched_at FROM items
                WHERE account_id = ?1 AND external_id = ?2
                "#,
                params![account_id, external_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(kind, labels, payload, fetched_at)| {
            Ok(SyncItem {
                account_id: account_id.to_string(),
                external_id: external_id.to_string(),
                kind: kind_from_str(&kind)?,
                labels: serde_json::from_str(&labels)?,
                payload,
                fetched_at: parse_ts(&fetched_at)?,
            })
        })
        .transpose()
    }

    fn list_items(&self, account_id: &str) -> Result<Vec<SyncItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT external_id, kind, labels, payload, fetched_at FROM items
            WHERE account_id = ? ORDER BY external_id
            "#,
        )?;

        let rows = stmt
            .query_map([account_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(external_id, kind, labels, payload, fetched_at)| {
                Ok(SyncItem {
                    account_id: account_id.to_string(),
                    external_id,
                    kind: kind_from_str(&kind)?,
                    labels: serde_json::from_str(&labels)?,
                    payload,
                    fetched_at: parse_ts(&fetched_at)?,
                })
            })
            .collect()
    }

    fn count_items(&self, account_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<AccountSyncState>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT status, checkpoint, retry_after, rate_limit_streak,
                       started_at, completed_at, items_synced, total_items, error_message
                FROM sync_state WHERE account_id = ?
                "#,
                [account_id],
                row_to_state_tuple,
            )
            .optional()?;

        row.map(|raw| state_from_row(account_id.to_string(), raw))
            .transpose()
    }

    fn save_sync_state(&self, state: AccountSyncState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sync_state (account_id, status, checkpoint, retry_after,
                rate_limit_streak, started_at, completed_at, items_synced,
                total_items, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(account_id) DO UPDATE SET
                status = excluded.status,
                checkpoint = excluded.checkpoint,
                retry_after = excluded.retry_after,
                rate_limit_streak = excluded.rate_limit_streak,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                items_synced = excluded.items_synced,
                total_items = excluded.total_items,
                error_message = excluded.error_message
            "#,
            params![
                state.account_id,
                status_to_str(state.status),
                state.checkpoint,
                state.retry_after.map(|t| t.to_rfc3339()),
                state.rate_limit_streak,
                state.started_at.map(|t| t.to_rfc3339()),
                state.completed_at.map(|t| t.to_rfc3339()),
                state.items_synced as i64,
                state.total_items.map(|n| n as i64),
                state.error_message,
            ],
        )?;
        Ok(())
    }

    fn list_sync_states(&self) -> Result<Vec<AccountSyncState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, status, checkpoint, retry_after, rate_limit_streak,
                   started_at, completed_at, items_synced, total_items, error_message
            FROM sync_state ORDER BY account_id
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                let account_id: String = row.get(0)?;
                let raw = (
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                );
                Ok((account_id, raw))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(account_id, raw)| state_from_row(account_id, raw))
            .collect()
    }
}

type StateRow = (
    String,         // status
    Option<String>, // checkpoint
    Option<String>, // retry_after
    u32,            // rate_limit_streak
    Option<String>, // started_at
    Option<String>, // completed_at
    i64,            // items_synced
    Option<i64>,    // total_items
    Option<String>, // error_message
);

fn row_to_state_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn state_from_row(account_id: String, raw: StateRow) -> Result<AccountSyncState> {
    let (
        status,
        checkpoint,
        retry_after,
        rate_limit_streak,
        started_at,
        completed_at,
        items_synced,
        total_items,
        error_message,
    ) = raw;

    Ok(AccountSyncState {
        account_id,
        status: status_from_str(&status)?,
        checkpoint,
        retry_after: parse_ts_opt(retry_after)?,
        rate_limit_streak,
        started_at: parse_ts_opt(started_at)?,
        completed_at: parse_ts_opt(completed_at)?,
        items_synced: items_synced as u64,
        total_items: total_items.map(|n| n as u64),
        error_message,
    })
}
