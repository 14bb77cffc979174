use super::models::WalletBalance;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

pub struct BalanceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BalanceRepository<'a> {
    const SELECT_BALANCE: &'static str =
        "SELECT balance FROM wallet_balances WHERE currency = ?1 AND address = ?2";

    const UPSERT_BALANCE: &'static str =
        "INSERT OR REPLACE INTO wallet_balances (currency, address, balance) VALUES (?1, ?2, ?3)";

    const DELETE_CURRENCY: &'static str = "DELETE FROM wallet_balances WHERE currency = ?1";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, currency: &str, address: &str) -> Result<Option<Decimal>> {
        let balance: Option<String> = self
            .conn
            .query_row(Self::SELECT_BALANCE, params![currency, address], |row| {
                row.get(0)
            })
            .optional()?;
        match balance {
            Some(raw) => Ok(Some(Decimal::from_str(&raw).map_err(|_| {
                anyhow::anyhow!("Invalid balance format in database: {}", raw)
            })?)),
            None => Ok(None),
        }
    }

    /// Applies balance deltas, e.g. the entries of one crawled batch.
    pub fn apply_deltas(&self, currency: &str, deltas: &[(String, Decimal)]) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        BalanceRepository::new(&tx).add_deltas(currency, deltas)?;
        tx.commit()?;
        Ok(())
    }

    /// Same as [`Self::apply_deltas`] but inside the caller's transaction.
    pub fn add_deltas(&self, currency: &str, deltas: &[(String, Decimal)]) -> Result<()> {
        for (address, delta) in deltas {
            let current = self.get(currency, address)?.unwrap_or(Decimal::ZERO);
            self.conn.execute(
                Self::UPSERT_BALANCE,
                params![currency, address, (current + delta).to_string()],
            )?;
        }
        Ok(())
    }

    /// Drops every stored balance of `currency` and writes `balances` instead.
    pub fn replace_all(&self, currency: &str, balances: &[WalletBalance]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(Self::DELETE_CURRENCY, params![currency])?;
        {
            let mut stmt = tx.prepare(Self::UPSERT_BALANCE)?;
            for balance in balances {
                stmt.execute(params![
                    balance.currency,
                    balance.address,
                    balance.balance.to_string()
                ])?;
            }
        }
        tx.commit()?;

        info!("Rebuilt {} {} wallet balances", balances.len(), currency);
        Ok(())
    }
}
