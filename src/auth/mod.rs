//! Session tokens issued by the storefront auth API.

mod jwt;

pub use jwt::{Claims, JwtSecret};
