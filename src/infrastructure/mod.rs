pub mod channels;
pub mod market;
pub mod persistence;
pub mod repositories;

pub use market::InMemoryMarketStore;
pub use repositories::in_memory::{
    InMemoryAlertRepository, InMemoryNotificationRepository, InMemoryQueueStore,
    InMemoryUserRepository,
};
