use std::path::Path;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::IngestError;
use crate::ingest::sink::TickSink;
use crate::model::order::OrderSide;
use crate::model::signal::SignalRecord;
use crate::model::tick::Tick;
use crate::model::trade::{Trade, TradeStatus};
use crate::model::user::{User, UserSettings};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    strategy TEXT NOT NULL,
    side TEXT NOT NULL,
    entry_price REAL NOT NULL,
    entry_time INTEGER NOT NULL,
    exit_price REAL,
    exit_time INTEGER,
    pnl REAL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    indicators TEXT,
    action_taken TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    user_id INTEGER PRIMARY KEY,
    alpaca_api_key TEXT,
    alpaca_secret_key TEXT,
    theme TEXT,
    notifications_email INTEGER,
    notifications_push INTEGER,
    FOREIGN KEY(user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS tick_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    volume INTEGER,
    timestamp INTEGER NOT NULL
);
"#;

/// Single SQLite database holding ticks, trades, signals, users and settings.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // in-memory databases answer "memory" here
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("failed to set WAL mode")?;
        tracing::debug!(journal_mode = %mode, "SQLite journal mode");
        conn.execute_batch(SCHEMA).context("failed to create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn append_tick(&self, tick: &Tick) -> Result<()> {
        let volume = i64::try_from(tick.volume).with_context(|| {
            format!("tick volume {} does not fit an INTEGER column", tick.volume)
        })?;
        self.conn.lock().execute(
            "INSERT INTO tick_log (symbol, price, volume, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![tick.symbol, tick.price, volume, tick.timestamp_ms()],
        )?;
        Ok(())
    }

    pub fn tick_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM tick_log", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Most recent ticks for a symbol, oldest first.
    pub fn recent_ticks(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, price, volume, timestamp FROM (
                SELECT id, symbol, price, volume, timestamp
                FROM tick_log
                WHERE symbol = ?1
                ORDER BY id DESC
                LIMIT ?2
            ) ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![symbol, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut ticks = Vec::new();
        for row in rows {
            let (symbol, price, volume, ts) = row?;
            let tick = Tick::from_millis(symbol, price, volume.unwrap_or(0).max(0) as u64, ts)
                .with_context(|| format!("tick_log row has invalid timestamp {}", ts))?;
            ticks.push(tick);
        }
        Ok(ticks)
    }

    /// Insert a trade, or update its exit fields when the id already exists.
    pub fn save_trade(&self, trade: &Trade) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO trades (
                id, symbol, strategy, side, entry_price, entry_time,
                exit_price, exit_time, pnl, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                exit_price = excluded.exit_price,
                exit_time = excluded.exit_time,
                pnl = excluded.pnl,
                status = excluded.status
            "#,
            params![
                trade.id,
                trade.symbol,
                trade.strategy,
                trade.side.as_alpaca_str(),
                trade.entry_price,
                trade.entry_time,
                trade.exit_price,
                trade.exit_time,
                trade.pnl,
                trade.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, symbol, strategy, side, entry_price, entry_time,
                   exit_price, exit_time, pnl, status
            FROM trades
            ORDER BY entry_time DESC, id ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let side: String = row.get(3)?;
            let status: String = row.get(9)?;
            Ok(Trade {
                id: row.get(0)?,
                symbol: row.get(1)?,
                strategy: row.get(2)?,
                side: if side.eq_ignore_ascii_case("sell") {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                },
                entry_price: row.get(4)?,
                entry_time: row.get(5)?,
                exit_price: row.get(6)?,
                exit_time: row.get(7)?,
                pnl: row.get(8)?,
                status: TradeStatus::from_db_str(&status),
            })
        })?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(row?);
        }
        Ok(trades)
    }

    pub fn save_signal(&self, signal: &SignalRecord) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO signals (timestamp, symbol, signal_type, indicators, action_taken)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                signal.timestamp_ms,
                signal.symbol,
                signal.signal_type,
                signal.indicators,
                signal.action_taken,
            ],
        )?;
        Ok(())
    }

    pub fn signal_count(&self, symbol: &str) -> Result<u64> {
        let n: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM signals WHERE symbol = ?1",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    pub fn create_user(&self, email: &str, password_hash: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![email, password_hash, Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
                [email],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, email, password_hash, created_at)| User {
            id,
            email,
            password_hash,
            created_at: Utc
                .timestamp_opt(created_at, 0)
                .single()
                .unwrap_or_default(),
        }))
    }

    pub fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO settings (
                user_id, alpaca_api_key, alpaca_secret_key, theme,
                notifications_email, notifications_push
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                alpaca_api_key = excluded.alpaca_api_key,
                alpaca_secret_key = excluded.alpaca_secret_key,
                theme = excluded.theme,
                notifications_email = excluded.notifications_email,
                notifications_push = excluded.notifications_push
            "#,
            params![
                settings.user_id,
                settings.alpaca_api_key,
                settings.alpaca_secret_key,
                settings.theme,
                settings.notifications_email,
                settings.notifications_push,
            ],
        )?;
        Ok(())
    }

    /// Stored settings, or defaults when the user never saved any.
    pub fn settings(&self, user_id: i64) -> Result<UserSettings> {
        let row = self
            .conn
            .lock()
            .query_row(
                r#"
                SELECT alpaca_api_key, alpaca_secret_key, theme,
                       notifications_email, notifications_push
                FROM settings WHERE user_id = ?1
                "#,
                [user_id],
                |row| {
                    Ok(UserSettings {
                        user_id,
                        alpaca_api_key: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        alpaca_secret_key: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        theme: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        notifications_email: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
                        notifications_push: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_else(|| UserSettings::defaults_for(user_id)))
    }
}

impl TickSink for SqliteStore {
    fn log_tick(&self, tick: &Tick) -> Result<(), IngestError> {
        self.append_tick(tick)
            .map_err(|e| IngestError::Persistence(format!("{:#}", e)))
    }
}
