pub mod config;
pub mod context;
pub mod crawler;
pub mod error;
pub mod evm;
pub mod gateway;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod settlement;
pub mod sqlite_hooks;
pub mod tokens;
pub mod types;
