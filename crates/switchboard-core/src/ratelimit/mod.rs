//! Sliding-window admission control.

pub mod limiter;
pub mod policy;

pub use limiter::SlidingWindowRateLimiter;
pub use policy::{RoutePolicy, client_identity};
