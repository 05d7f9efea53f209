//! Business logic: connection registry, presence, delivery, stats and fan-out.

pub mod auth;
pub mod delivery;
pub mod fanout;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod stats;

pub use auth::AuthService;
pub use delivery::DeliveryService;
pub use fanout::Notifier;
pub use hub::{spawn_sweeper, ChatHub};
pub use presence::{PresenceService, SharedRegistry};
pub use registry::{ConnectionRegistry, Outbound};
pub use stats::{StatsService, VisitorReport};
