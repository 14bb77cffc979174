use super::SettlementWorker;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub need_next_process: bool,
    pub withdrawal_tx_id: u64,
}

impl ProcessingResult {
    pub fn next(withdrawal_tx_id: u64) -> Self {
        Self {
            need_next_process: true,
            withdrawal_tx_id,
        }
    }

    pub fn done() -> Self {
        Self::default()
    }
}

/// Stage logic supplied by the wallet. The worker only moves messages.
#[async_trait]
pub trait SettlementHooks: Send + Sync + 'static {
    async fn prepare(&self, _worker: &SettlementWorker) -> Result<()> {
        Ok(())
    }

    async fn do_process(&self, worker: &SettlementWorker) -> Result<ProcessingResult>;
}
