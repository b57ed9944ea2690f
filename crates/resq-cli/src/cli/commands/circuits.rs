//! `resq circuits` – show breaker thresholds and the retry policies in effect.

use anyhow::Result;
use resq_core::config::{RetryConfig, ResqConfig};

fn describe(retry: &RetryConfig) -> String {
    let timeout = retry
        .attempt_timeout_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<9} {:<10} {:<10} {:<6} {:<7} {}",
        retry.max_attempts,
        format!("{}ms", retry.initial_delay_ms),
        format!("{}ms", retry.max_delay_ms),
        retry.backoff_multiplier,
        retry.jitter_ratio,
        timeout
    )
}

pub fn run_circuits(cfg: &ResqConfig) -> Result<()> {
    let breaker = cfg.breaker_config();
    println!(
        "Circuit: opens after {} failures, cool-down {}s",
        breaker.failure_threshold,
        breaker.cool_down.as_secs()
    );
    println!();
    println!(
        "{:<28} {:<9} {:<10} {:<10} {:<6} {:<7} {}",
        "KEY", "ATTEMPTS", "INITIAL", "MAX", "MULT", "JITTER", "TIMEOUT"
    );
    println!("{:<28} {}", "(default)", describe(&cfg.retry));
    for (key, retry) in &cfg.policies {
        println!("{:<28} {}", key, describe(retry));
    }
    Ok(())
}
