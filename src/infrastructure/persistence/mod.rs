pub mod database;
pub mod queue_store;
pub mod repositories;

pub use database::Database;
pub use queue_store::SqliteQueueStore;
pub use repositories::{
    SqliteAlertRepository, SqliteNotificationRepository, SqliteUserRepository,
};
