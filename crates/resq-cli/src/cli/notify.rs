//! Terminal rendering of resilience events (the CLI's "toasts").

use resq_core::events::{EventSink, ReplayOutcome, ResilienceEvent, TracingSink};

/// Prints one line per event to stderr and forwards it to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: ResilienceEvent) {
        match &event {
            ResilienceEvent::RetryAttempted {
                key,
                attempt,
                delay_ms,
            } => eprintln!("{key}: attempt {attempt} failed, retrying in {delay_ms}ms"),
            ResilienceEvent::CircuitOpened { key } => {
                eprintln!("{key}: too many failures, pausing requests")
            }
            ResilienceEvent::OperationQueued { id } => {
                eprintln!("saved {id} for delivery when the connection is back")
            }
            ResilienceEvent::OperationReplayed { id, outcome } => match outcome {
                ReplayOutcome::Delivered => eprintln!("delivered queued {id}"),
                ReplayOutcome::Failed { reason } => eprintln!("{id} still queued: {reason}"),
            },
        }
        TracingSink.emit(event);
    }
}
