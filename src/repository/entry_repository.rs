use super::models::CrawledEntry;
use anyhow::Result;
use rusqlite::{Row, params};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

pub struct EntryRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> EntryRepository<'a> {
    const INSERT_ENTRY: &'static str = "INSERT OR IGNORE INTO crawled_entries (
            txid, address, currency, sub_currency,
            amount, block_number, block_hash, block_timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

    const SELECT_ENTRY: &'static str = "SELECT txid, address, currency, sub_currency,
            amount, block_number, block_hash, block_timestamp FROM crawled_entries";

    const SELECT_AMOUNTS_BY_SUB_CURRENCY: &'static str =
        "SELECT address, amount FROM crawled_entries WHERE sub_currency = ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts in one transaction and returns the entries that were new.
    /// Entries already stored are skipped, so a re-crawled block does not
    /// count twice.
    pub fn insert_batch<'e>(&self, entries: &'e [CrawledEntry]) -> Result<Vec<&'e CrawledEntry>> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = EntryRepository::new(&tx).insert_all(entries)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Same as [`Self::insert_batch`] but inside the caller's transaction.
    pub fn insert_all<'e>(&self, entries: &'e [CrawledEntry]) -> Result<Vec<&'e CrawledEntry>> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_ENTRY)?;
        let mut inserted = Vec::new();

        for entry in entries {
            let changed = stmt.execute(params![
                entry.txid,
                entry.address,
                entry.currency,
                entry.sub_currency,
                entry.amount.to_string(),
                entry.block_number,
                entry.block_hash,
                entry.block_timestamp,
            ])?;
            if changed > 0 {
                inserted.push(entry);
            }
        }

        Ok(inserted)
    }

    pub fn entries_for_address(&self, sub_currency: &str, address: &str) -> Result<Vec<CrawledEntry>> {
        let query = format!(
            "{} WHERE sub_currency = ?1 AND address = ?2 ORDER BY block_number, txid",
            Self::SELECT_ENTRY
        );
        let mut stmt = self.conn.prepare(&query)?;
        let entries = stmt
            .query_map(params![sub_currency, address], Self::row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Net amount per address over every stored entry of `sub_currency`,
    /// ordered by address.
    pub fn net_amounts(&self, sub_currency: &str) -> Result<Vec<(String, Decimal)>> {
        let mut stmt = self.conn.prepare(Self::SELECT_AMOUNTS_BY_SUB_CURRENCY)?;
        let rows = stmt
            .query_map(params![sub_currency], |row| {
                Ok((row.get::<_, String>(0)?, Self::parse_amount(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for (address, amount) in rows {
            *totals.entry(address).or_insert(Decimal::ZERO) += amount;
        }
        Ok(totals.into_iter().collect())
    }

    pub fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM crawled_entries", [], |row| row.get(0))?;
        Ok(count)
    }

    fn parse_amount(row: &Row, index: usize) -> rusqlite::Result<Decimal> {
        Decimal::from_str(&row.get::<_, String>(index)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<CrawledEntry> {
        Ok(CrawledEntry {
            txid: row.get(0)?,
            address: row.get(1)?,
            currency: row.get(2)?,
            sub_currency: row.get(3)?,
            amount: Self::parse_amount(row, 4)?,
            block_number: row.get(5)?,
            block_hash: row.get(6)?,
            block_timestamp: row.get(7)?,
        })
    }
}
