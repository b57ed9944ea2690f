//! Resilient request execution: classified retries with backoff, per-key
//! circuit breaking, and a durable offline queue replayed on reconnect.

pub mod config;
pub mod logging;

pub mod breaker;
pub mod connectivity;
pub mod control;
pub mod events;
pub mod key;
pub mod layer;
pub mod queue;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use breaker::{Admission, BreakerConfig, CircuitBreaker};
pub use connectivity::{ConnectivityMonitor, ConnectivitySnapshot, NetworkSignal};
pub use control::CancelHandle;
pub use events::{EventSink, ResilienceEvent};
pub use key::OperationKey;
pub use layer::{DurableRequest, RequestLayer, Submitted};
pub use queue::{DurableQueue, QueuedOperation, ReplayReport};
pub use retry::{ClassifiedError, ExecError, RequestError, RetryExecutor, RetryPolicy};
pub use transport::{CurlTransport, EndpointDescriptor, Response, Transport};
