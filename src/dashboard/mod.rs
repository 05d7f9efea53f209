//! Admin-only read API.

mod handlers;

pub use handlers::{presence, visitor_stats, PresenceResponse, StatsQuery};
