use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Opens (or creates) the database and makes sure the schema exists.
    /// Accepts both plain paths and `sqlite:` URLs.
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path))?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS crawl_cursors (
                currency TEXT NOT NULL,
                crawl_type TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (currency, crawl_type)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS crawled_entries (
                txid TEXT NOT NULL,
                address TEXT NOT NULL,
                currency TEXT NOT NULL,
                sub_currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                block_timestamp INTEGER NOT NULL,
                PRIMARY KEY (txid, address, sub_currency)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_crawled_entries_address
             ON crawled_entries(sub_currency, address)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_crawled_entries_block_number
             ON crawled_entries(block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS wallet_balances (
                currency TEXT NOT NULL,
                address TEXT NOT NULL,
                balance TEXT NOT NULL,
                PRIMARY KEY (currency, address)
            )",
            [],
        )?;

        Ok(())
    }
}
