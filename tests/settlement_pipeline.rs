use anyhow::Result;
use async_trait::async_trait;
use custody_engine::config::Config;
use custody_engine::context::EngineContext;
use custody_engine::evm;
use custody_engine::gateway::GatewayRegistry;
use custody_engine::queue::{MemoryTransport, QueueConsumer, QueueProducer};
use custody_engine::scheduler::{IntervalScheduler, IntervalTask};
use custody_engine::settlement::{
    ProcessingResult, SettlementHooks, SettlementStage, SettlementWorker,
};
use custody_engine::tokens::{ActiveCurrency, TokenCatalog};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unsigned,
    Signing,
    Signed,
    Sent,
    Verified,
}

/// Withdrawal states shared by every stage, standing in for the wallet's
/// database.
#[derive(Default)]
struct Ledger {
    withdrawals: Mutex<BTreeMap<u64, State>>,
}

impl Ledger {
    fn with_unsigned(ids: &[u64]) -> Arc<Self> {
        let ledger = Self::default();
        {
            let mut withdrawals = ledger.withdrawals.lock().unwrap();
            for id in ids {
                withdrawals.insert(*id, State::Unsigned);
            }
        }
        Arc::new(ledger)
    }

    fn count(&self, state: State) -> usize {
        self.withdrawals
            .lock()
            .unwrap()
            .values()
            .filter(|s| **s == state)
            .count()
    }

    /// Moves the oldest withdrawal in `from` to `to`.
    fn advance(&self, from: State, to: State) -> Option<u64> {
        let mut withdrawals = self.withdrawals.lock().unwrap();
        let (id, state) = withdrawals.iter_mut().find(|(_, s)| **s == from)?;
        *state = to;
        Some(*id)
    }
}

struct StageHooks {
    ledger: Arc<Ledger>,
    from: State,
    to: State,
}

#[async_trait]
impl SettlementHooks for StageHooks {
    async fn do_process(&self, _worker: &SettlementWorker) -> Result<ProcessingResult> {
        Ok(match self.ledger.advance(self.from, self.to) {
            Some(id) => ProcessingResult::next(id),
            None => ProcessingResult::done(),
        })
    }
}

fn context() -> Arc<EngineContext> {
    let config = Config::from_lookup(|key| match key {
        "DEPLOYMENT_ID" => Some("it".to_string()),
        "NETWORK" => Some("testnet".to_string()),
        _ => None,
    })
    .unwrap();
    let catalog = TokenCatalog::new([evm::native_token("testnet")]);
    let active = ActiveCurrency::build(&catalog, evm::CURRENCY, None, None).unwrap();
    EngineContext::new(config, catalog, active, GatewayRegistry::new())
}

fn stage(
    ctx: &Arc<EngineContext>,
    transport: &Arc<MemoryTransport>,
    ledger: &Arc<Ledger>,
    stage: SettlementStage,
    from: State,
    to: State,
) -> Arc<SettlementWorker> {
    let hooks = Arc::new(StageHooks {
        ledger: ledger.clone(),
        from,
        to,
    });
    SettlementWorker::new(ctx.clone(), stage, hooks, transport.clone())
}

/// Waits until every worker has settled `count` messages.
async fn wait_for_acks(transport: &MemoryTransport, workers: &[Arc<SettlementWorker>], count: usize) {
    for _ in 0..400 {
        let mut settled = true;
        for worker in workers {
            settled &= transport.stats(worker.consumer_queue()).await.acked == count;
        }
        if settled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workers did not settle {count} messages each");
}

#[tokio::test]
async fn picked_withdrawals_flow_through_every_stage() {
    let ctx = context();
    let transport = Arc::new(MemoryTransport::new());
    let ledger = Ledger::with_unsigned(&[1, 2]);

    let picker = stage(&ctx, &transport, &ledger, SettlementStage::Picker, State::Unsigned, State::Signing);
    let workers = [
        stage(&ctx, &transport, &ledger, SettlementStage::Signer, State::Signing, State::Signed),
        stage(&ctx, &transport, &ledger, SettlementStage::Sender, State::Signed, State::Sent),
        stage(&ctx, &transport, &ledger, SettlementStage::Verifier, State::Sent, State::Verified),
    ];

    for worker in &workers {
        worker.prepare().await.unwrap();
    }
    picker.prepare().await.unwrap();

    picker.do_process().await.unwrap();
    picker.do_process().await.unwrap();
    wait_for_acks(&transport, &workers, 2).await;
    assert_eq!(ledger.count(State::Verified), 2);

    let mut verified = transport.take_messages("it_verified_withdrawal_eth").await;
    verified.sort();
    assert_eq!(verified, vec!["1", "2"]);
    assert_eq!(picker.producer_queue(), "it_signing_withdrawal_eth");
}

#[tokio::test]
async fn idle_picker_publishes_nothing() {
    let ctx = context();
    let transport = Arc::new(MemoryTransport::new());
    let ledger = Ledger::with_unsigned(&[]);
    let picker = stage(&ctx, &transport, &ledger, SettlementStage::Picker, State::Unsigned, State::Signing);

    picker.prepare().await.unwrap();
    picker.do_process().await.unwrap();

    assert_eq!(transport.stats("it_signing_withdrawal_eth").await.published, 0);
}

#[tokio::test(start_paused = true)]
async fn scheduled_workers_drain_the_pipeline_on_their_own() {
    let ctx = context();
    let transport = Arc::new(MemoryTransport::new());
    let ledger = Ledger::with_unsigned(&[1, 2]);

    let schedulers = [
        (SettlementStage::Picker, State::Unsigned, State::Signing),
        (SettlementStage::Signer, State::Signing, State::Signed),
        (SettlementStage::Sender, State::Signed, State::Sent),
        (SettlementStage::Verifier, State::Sent, State::Verified),
    ]
    .map(|(kind, from, to)| IntervalScheduler::new(stage(&ctx, &transport, &ledger, kind, from, to)));
    for scheduler in &schedulers {
        assert!(scheduler.start().is_some());
    }
    assert!(schedulers[0].start().is_none());

    // The picker ticks every 10 s: both withdrawals are picked by t=10 and
    // the consumers carry them the rest of the way.
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(ledger.count(State::Verified), 2);
    assert_eq!(transport.stats("it_signing_withdrawal_eth").await.published, 2);
    let mut verified = transport.take_messages("it_verified_withdrawal_eth").await;
    verified.sort();
    assert_eq!(verified, vec!["1", "2"]);
}
