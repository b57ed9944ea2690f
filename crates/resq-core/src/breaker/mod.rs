//! Per-operation circuit breaker.
//!
//! Tracks, per [`OperationKey`](crate::key::OperationKey):
//! - a failure counter inside a rolling window
//! - whether the circuit is open, and since when
//!
//! An open circuit rejects calls until the cool-down has elapsed; the first
//! call after that is let through as a probe and the circuit counts as closed.
//! The next recorded success clears it, the next recorded failure re-opens
//! it. There is no global circuit: an outage in one operation class never
//! blocks another.

mod state;

pub use state::{Admission, BreakerConfig, CircuitBreaker, CircuitStateKind, CircuitStatus};
