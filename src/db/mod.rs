//! Database layer: pool, queries and the PostgreSQL store.

mod pool;
mod repositories;
mod store;

pub use pool::{create_pool, ping, DbPool};
pub use repositories::*;
pub use store::PgStore;
