#![allow(dead_code)]

pub mod api_server;

use std::time::Duration;

use resq_core::RetryPolicy;

/// Three attempts, 10ms then 20ms, no jitter.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40), 2.0)
        .unwrap()
        .without_jitter()
}
