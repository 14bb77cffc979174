use crate::queue::MessageQueueName;
use crate::scheduler::DEFAULT_TICK;
use std::time::Duration;

/// Withdrawals grouped into one transaction by the picker.
pub const LIMIT_PICKING_ONCE: usize = 1;

/// Position of a worker in the settlement pipeline.
///
/// Withdrawals flow `unsigned → signing → signed → sent → verified`,
/// deposits `collecting → collected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementStage {
    Picker,
    Signer,
    Sender,
    Verifier,
    DepositCollector,
    DepositCollectorVerifier,
    InternalTransferVerifier,
    FeeSeeder,
}

impl SettlementStage {
    pub fn name(&self) -> &'static str {
        match self {
            SettlementStage::Picker => "WithdrawalPicker",
            SettlementStage::Signer => "WithdrawalSigner",
            SettlementStage::Sender => "WithdrawalSender",
            SettlementStage::Verifier => "WithdrawalVerifier",
            SettlementStage::DepositCollector => "DepositCollector",
            SettlementStage::DepositCollectorVerifier => "DepositCollectorVerifier",
            SettlementStage::InternalTransferVerifier => "InternalTransferVerifier",
            SettlementStage::FeeSeeder => "FeeSeeder",
        }
    }

    pub fn base_consumer_queue(&self) -> Option<MessageQueueName> {
        match self {
            SettlementStage::Picker => Some(MessageQueueName::UnsignedWithdrawal),
            SettlementStage::Signer => Some(MessageQueueName::SigningWithdrawal),
            SettlementStage::Sender => Some(MessageQueueName::SignedWithdrawal),
            SettlementStage::Verifier => Some(MessageQueueName::SentWithdrawal),
            SettlementStage::FeeSeeder => Some(MessageQueueName::CollectingDeposit),
            SettlementStage::DepositCollector
            | SettlementStage::DepositCollectorVerifier
            | SettlementStage::InternalTransferVerifier => None,
        }
    }

    pub fn base_producer_queue(&self) -> Option<MessageQueueName> {
        match self {
            SettlementStage::Picker => Some(MessageQueueName::SigningWithdrawal),
            SettlementStage::Signer => Some(MessageQueueName::SignedWithdrawal),
            SettlementStage::Sender => Some(MessageQueueName::SentWithdrawal),
            SettlementStage::Verifier => Some(MessageQueueName::VerifiedWithdrawal),
            SettlementStage::DepositCollector => Some(MessageQueueName::CollectingDeposit),
            SettlementStage::DepositCollectorVerifier => Some(MessageQueueName::CollectedDeposit),
            SettlementStage::InternalTransferVerifier | SettlementStage::FeeSeeder => None,
        }
    }

    pub fn default_tick(&self) -> Duration {
        match self {
            SettlementStage::Picker | SettlementStage::DepositCollector => Duration::from_secs(10),
            SettlementStage::FeeSeeder => Duration::from_secs(60),
            _ => DEFAULT_TICK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawal_stages_form_a_chain() {
        let chain = [
            SettlementStage::Picker,
            SettlementStage::Signer,
            SettlementStage::Sender,
            SettlementStage::Verifier,
        ];
        for pair in chain.windows(2) {
            assert_eq!(pair[0].base_producer_queue(), pair[1].base_consumer_queue());
        }
        assert_eq!(
            SettlementStage::Verifier.base_producer_queue(),
            Some(MessageQueueName::VerifiedWithdrawal)
        );
    }

    #[test]
    fn collector_feeds_the_fee_seeder() {
        assert_eq!(
            SettlementStage::DepositCollector.base_producer_queue(),
            SettlementStage::FeeSeeder.base_consumer_queue()
        );
        assert_eq!(SettlementStage::FeeSeeder.base_producer_queue(), None);
        assert_eq!(SettlementStage::InternalTransferVerifier.base_consumer_queue(), None);
        assert_eq!(SettlementStage::InternalTransferVerifier.base_producer_queue(), None);
    }

    #[test]
    fn tick_defaults() {
        assert_eq!(SettlementStage::Picker.default_tick(), Duration::from_secs(10));
        assert_eq!(SettlementStage::FeeSeeder.default_tick(), Duration::from_secs(60));
        assert_eq!(SettlementStage::Signer.default_tick(), Duration::from_secs(30));
    }
}
