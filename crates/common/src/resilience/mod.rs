//! Resilience primitives for talking to rate-limited remote APIs
//!
//! - **Request throttle**: minimum spacing between outbound calls plus a
//!   longer cooldown after a burst of consecutive calls, shared by every
//!   worker that holds a clone.
//! - **Exponential backoff**: capped doubling delay between retries of a
//!   transient failure.

pub mod backoff;
pub mod throttle;

pub use backoff::ExponentialBackoff;
pub use throttle::{RequestThrottle, ThrottleConfig, ThrottleConfigBuilder};
