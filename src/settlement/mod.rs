//! Queue-driven workers moving withdrawals and deposits through their
//! stages.

pub mod hooks;
pub mod stage;
pub mod worker;

pub use hooks::{ProcessingResult, SettlementHooks};
pub use stage::{LIMIT_PICKING_ONCE, SettlementStage};
pub use worker::{CurrencyWorker, FeeSeedRequest, SettlementWorker};
