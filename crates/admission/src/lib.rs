//! Admission control — sliding-window rate limiting plus the priority
//! queue for displaced requests.
//!
//! [`gateway::AdmissionGateway`] is the single entry point: it combines
//! [`limiter::RateLimiter`] and [`queue::RequestQueue`] into one
//! `admit` call per incoming request. The limiter and queue never block;
//! all waiting happens in callers.

pub mod gateway;
pub mod limiter;
pub mod queue;
pub mod resolver;
pub mod window;

pub use gateway::{Admission, AdmissionGateway};
pub use limiter::{LimitSnapshot, RateLimiter, Verdict};
pub use queue::{QueuePosition, QueuedRequest, RequestQueue};
pub use resolver::ConfigResolver;
