use super::models::CrawlCursor;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CursorRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CursorRepository<'a> {
    const UPSERT_CURSOR: &'static str =
        "INSERT INTO crawl_cursors (currency, crawl_type, block_number, block_hash, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (currency, crawl_type) DO UPDATE SET
            block_number = excluded.block_number,
            block_hash = excluded.block_hash,
            updated_at = excluded.updated_at";

    const GET_CURSOR: &'static str = "SELECT currency, crawl_type, block_number, block_hash
         FROM crawl_cursors WHERE currency = ?1 AND crawl_type = ?2";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, cursor: &CrawlCursor) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.conn.execute(
            Self::UPSERT_CURSOR,
            params![
                cursor.currency,
                cursor.crawl_type,
                cursor.block_number,
                cursor.block_hash,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, currency: &str, crawl_type: &str) -> Result<Option<CrawlCursor>> {
        let cursor = self
            .conn
            .query_row(Self::GET_CURSOR, params![currency, crawl_type], |row| {
                Ok(CrawlCursor {
                    currency: row.get(0)?,
                    crawl_type: row.get(1)?,
                    block_number: row.get(2)?,
                    block_hash: row.get(3)?,
                })
            })
            .optional()?;
        Ok(cursor)
    }
}
