//! Data models for connections, messages, conversations, stats and wire events.

pub mod conversation;
pub mod event;
pub mod message;
pub mod presence;
pub mod stats;

pub use conversation::*;
pub use event::*;
pub use message::*;
pub use presence::*;
pub use stats::*;
