pub mod manager;
pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType, RECORDS_TABLE};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use sqlite::SqliteRecordStore;
