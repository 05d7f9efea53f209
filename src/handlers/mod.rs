//! HTTP and WebSocket request handlers.

pub mod http;
pub mod ws;

pub use http::*;
pub use ws::ws_handler;
