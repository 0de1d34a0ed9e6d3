use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{AccountProfile, DatabaseConfig};
use crate::entities::Account;
use crate::error::{Error, Result};
use crate::parser::{TransactionRow, TransactionTable};

/// Compute idempotency hash for duplicate detection
///
/// Same account, number, date and amount (ignoring trailing zeros) give the
/// same hash. Only consulted when deduplication is switched on.
pub fn compute_idempotency_hash(account_id: i64, row: &TransactionRow) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}",
        account_id,
        row.number,
        row.date,
        row.amount.normalize()
    ));
    format!("{:x}", hasher.finalize())
}

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// What one insert batch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases stay "memory")
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("journal_mode = {}", journal_mode);
    conn.pragma_update(None, "foreign_keys", true)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            paternal_surname TEXT NOT NULL,
            maternal_surname TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    // No uniqueness on (account_id, number): reruns append unless the
    // caller asks for deduplication.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            number TEXT NOT NULL,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            amount_numeric REAL NOT NULL,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            idempotency_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_idempotency_hash ON transactions(idempotency_hash)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Get the account with `email`, creating it from `profile` if missing.
pub fn get_or_create_account(
    conn: &Connection,
    email: &str,
    profile: &AccountProfile,
) -> Result<Account> {
    let existing = conn
        .query_row(
            "SELECT id, name, paternal_surname, maternal_surname, email
             FROM accounts
             WHERE email = ?1",
            params![email],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    paternal_surname: row.get(2)?,
                    maternal_surname: row.get(3)?,
                    email: row.get(4)?,
                })
            },
        )
        .optional()?;

    if let Some(account) = existing {
        debug!("Found account {} for {}", account.id, email);
        return Ok(account);
    }

    let mut account = Account::from_profile(email, profile);
    conn.execute(
        "INSERT INTO accounts (name, paternal_surname, maternal_surname, email)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            account.name,
            account.paternal_surname,
            account.maternal_surname,
            account.email,
        ],
    )?;
    account.id = conn.last_insert_rowid();

    info!("Created account {} for {}", account.id, email);
    Ok(account)
}

/// Append every row of `table` for `account_id` in one SQL transaction.
///
/// With `deduplicate` on, rows whose idempotency hash is already stored are
/// skipped. Either every insert lands or none do.
pub fn insert_transactions(
    conn: &mut Connection,
    account_id: i64,
    table: &TransactionTable,
    deduplicate: bool,
    run_id: &str,
) -> Result<InsertOutcome> {
    let tx = conn.transaction()?;
    let mut outcome = InsertOutcome::default();

    {
        let mut exists = tx.prepare("SELECT 1 FROM transactions WHERE idempotency_hash = ?1 LIMIT 1")?;
        let mut insert = tx.prepare(
            "INSERT INTO transactions (number, date, amount, amount_numeric, account_id, idempotency_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for row in table {
            let hash = compute_idempotency_hash(account_id, row);

            if deduplicate && exists.exists(params![hash])? {
                outcome.skipped += 1;
                continue;
            }

            insert.execute(params![
                row.number,
                row.date,
                row.amount.to_string(),
                row.amount.to_f64().unwrap_or_default(),
                account_id,
                hash,
            ])?;
            outcome.inserted += 1;
        }
    }

    let event = Event::new(
        "transactions_imported",
        "account",
        &account_id.to_string(),
        serde_json::json!({
            "run_id": run_id,
            "inserted": outcome.inserted,
            "skipped": outcome.skipped,
        }),
        "summary_pipeline",
    );
    insert_event(&tx, &event)?;

    tx.commit()?;

    info!("✓ Inserted: {} transactions", outcome.inserted);
    if deduplicate {
        info!("✓ Skipped duplicates: {}", outcome.skipped);
    }

    Ok(outcome)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json =
        serde_json::to_string(&event.data).map_err(|e| Error::Persistence(e.to_string()))?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_transactions(conn: &Connection, account_id: i64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE account_id = ?1",
        params![account_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// PERSISTENCE SINK
// ============================================================================

/// Where a run stores its account and rows.
///
/// The pipeline only talks to this trait so another relational backend (or a
/// test double) can stand in for SQLite.
pub trait TransactionSink {
    fn get_or_create_account(&mut self, email: &str, profile: &AccountProfile) -> Result<Account>;

    /// Store every row for `account_id`; returns how many were written.
    fn persist(&mut self, account_id: i64, table: &TransactionTable) -> Result<usize>;
}

/// SQLite-backed sink owning its connection for the length of a run
pub struct SqliteSink {
    conn: Connection,
    deduplicate: bool,
    run_id: String,
}

impl SqliteSink {
    /// Open (creating if needed) the database named by `config.name`.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if !config.host.is_empty() {
            debug!(
                "Embedded store ignores DB_HOST={} DB_PORT={} DB_USER={}",
                config.host, config.port, config.user
            );
        }

        let conn = Connection::open(&config.name)?;
        Self::from_connection(conn, config.deduplicate)
    }

    pub fn from_connection(conn: Connection, deduplicate: bool) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Self {
            conn,
            deduplicate,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl TransactionSink for SqliteSink {
    fn get_or_create_account(&mut self, email: &str, profile: &AccountProfile) -> Result<Account> {
        get_or_create_account(&self.conn, email, profile)
    }

    fn persist(&mut self, account_id: i64, table: &TransactionTable) -> Result<usize> {
        info!("Saving transactions...");
        let outcome = insert_transactions(
            &mut self.conn,
            account_id,
            table,
            self.deduplicate,
            &self.run_id,
        )?;
        Ok(outcome.inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_amount;
    use rust_decimal_macros::dec;

    /// Stored rows for an account, in insertion order
    fn get_transactions_for_account(
        conn: &Connection,
        account_id: i64,
    ) -> Result<Vec<TransactionRow>> {
        let mut stmt = conn.prepare(
            "SELECT number, date, amount
             FROM transactions
             WHERE account_id = ?1
             ORDER BY id ASC",
        )?;

        let raw = stmt
            .query_map(params![account_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(number, date, amount)| {
                let amount = parse_amount(&amount).map_err(Error::Persistence)?;
                Ok(TransactionRow {
                    number,
                    date,
                    amount,
                })
            })
            .collect()
    }

    fn profile() -> AccountProfile {
        AccountProfile {
            name: "Ana".to_string(),
            paternal_surname: "Lopez".to_string(),
            maternal_surname: "Ruiz".to_string(),
        }
    }

    fn sample_table() -> TransactionTable {
        vec![
            TransactionRow::new("0", "7/15", dec!(60.5)),
            TransactionRow::new("1", "7/28", dec!(-10.3)),
            TransactionRow::new("2", "8/2", dec!(-20.46)),
        ]
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_repeatable() {
        let conn = memory_db();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_get_or_create_account_once() {
        let conn = memory_db();

        let created = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();
        assert!(created.is_saved());
        assert_eq!(created.display_name(), "Ana Lopez");

        // Second lookup ignores the profile and returns the stored row
        let other_profile = AccountProfile {
            name: "Someone".to_string(),
            ..profile()
        };
        let found = get_or_create_account(&conn, "ana@example.com", &other_profile).unwrap();
        assert_eq!(found, created);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_insert_appends_and_round_trips() {
        let mut conn = memory_db();
        let account = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();

        let outcome =
            insert_transactions(&mut conn, account.id, &sample_table(), false, "run-1").unwrap();

        assert_eq!(outcome, InsertOutcome { inserted: 3, skipped: 0 });
        assert_eq!(
            get_transactions_for_account(&conn, account.id).unwrap(),
            sample_table()
        );
    }

    #[test]
    fn test_rerun_duplicates_by_default() {
        let mut conn = memory_db();
        let account = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();

        insert_transactions(&mut conn, account.id, &sample_table(), false, "run-1").unwrap();
        insert_transactions(&mut conn, account.id, &sample_table(), false, "run-2").unwrap();

        assert_eq!(count_transactions(&conn, account.id).unwrap(), 6);
    }

    #[test]
    fn test_deduplicate_skips_known_rows() {
        let mut conn = memory_db();
        let account = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();

        insert_transactions(&mut conn, account.id, &sample_table(), true, "run-1").unwrap();

        let mut second = sample_table();
        // Same value, different scale
        second[0].amount = dec!(60.50);
        second.push(TransactionRow::new("3", "8/13", dec!(10)));

        let outcome = insert_transactions(&mut conn, account.id, &second, true, "run-2").unwrap();

        assert_eq!(outcome, InsertOutcome { inserted: 1, skipped: 3 });
        assert_eq!(count_transactions(&conn, account.id).unwrap(), 4);
    }

    #[test]
    fn test_deduplicate_is_per_account() {
        let mut conn = memory_db();
        let ana = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();
        let bob = get_or_create_account(&conn, "bob@example.com", &profile()).unwrap();

        insert_transactions(&mut conn, ana.id, &sample_table(), true, "run-1").unwrap();
        let outcome = insert_transactions(&mut conn, bob.id, &sample_table(), true, "run-2").unwrap();

        assert_eq!(outcome.inserted, 3);
    }

    #[test]
    fn test_insert_records_event() {
        let mut conn = memory_db();
        let account = get_or_create_account(&conn, "ana@example.com", &profile()).unwrap();

        insert_transactions(&mut conn, account.id, &sample_table(), false, "run-1").unwrap();

        let events = get_events_for_entity(&conn, "account", &account.id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "transactions_imported");
        assert_eq!(events[0].data["run_id"], "run-1");
        assert_eq!(events[0].data["inserted"], 3);
    }

    #[test]
    fn test_unknown_account_rolls_back() {
        let mut conn = memory_db();

        let err = insert_transactions(&mut conn, 999, &sample_table(), false, "run-1").unwrap_err();

        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(count_transactions(&conn, 999).unwrap(), 0);
    }

    #[test]
    fn test_hash_ignores_trailing_zeros() {
        let a = TransactionRow::new("1", "7/1", dec!(10));
        let b = TransactionRow::new("1", "7/1", dec!(10.00));
        let c = TransactionRow::new("2", "7/1", dec!(10));

        assert_eq!(compute_idempotency_hash(1, &a), compute_idempotency_hash(1, &b));
        assert_ne!(compute_idempotency_hash(1, &a), compute_idempotency_hash(1, &c));
        assert_ne!(compute_idempotency_hash(1, &a), compute_idempotency_hash(2, &a));
    }

    #[test]
    fn test_sqlite_sink() {
        let mut sink = SqliteSink::from_connection(Connection::open_in_memory().unwrap(), false).unwrap();

        let account = sink.get_or_create_account("ana@example.com", &profile()).unwrap();
        let written = sink.persist(account.id, &sample_table()).unwrap();

        assert_eq!(written, 3);
        assert_eq!(count_transactions(sink.connection(), account.id).unwrap(), 3);
        assert!(!sink.run_id().is_empty());
    }

    #[test]
    fn test_open_from_config() {
        let config = DatabaseConfig {
            name: ":memory:".to_string(),
            ..DatabaseConfig::default()
        };

        let mut sink = SqliteSink::open(&config).unwrap();
        let account = sink.get_or_create_account("ana@example.com", &profile()).unwrap();

        assert_eq!(sink.persist(account.id, &Vec::new()).unwrap(), 0);
    }
}
