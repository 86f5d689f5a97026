//! Request-rate ceilings and memory-pressure relief.

pub mod memory;
pub mod rate_limit;

pub use memory::MemoryGuard;
pub use rate_limit::{LimitScope, RateLimiter, Rejection};
