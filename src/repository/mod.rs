pub mod balance_repository;
pub mod cursor_repository;
pub mod database;
pub mod entry_repository;
pub mod models;

pub use balance_repository::BalanceRepository;
pub use cursor_repository::CursorRepository;
pub use database::Database;
pub use entry_repository::EntryRepository;
pub use models::{CrawlCursor, CrawledEntry, WalletBalance};
