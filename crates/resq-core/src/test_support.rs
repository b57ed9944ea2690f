//! Shared fakes for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::retry::{RequestError, RetryExecutor, RetryPolicy};
use crate::transport::{EndpointDescriptor, Response, Transport};

pub(crate) const BASE: &str = "https://meals.example.com";

pub(crate) fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

pub(crate) fn endpoint(path: &str) -> EndpointDescriptor {
    EndpointDescriptor::post(&url(path)).unwrap()
}

/// Two attempts, 10ms then 20ms cap, no jitter.
pub(crate) fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(20), 2.0)
        .unwrap()
        .without_jitter()
}

pub(crate) fn executor() -> RetryExecutor {
    RetryExecutor::new(Arc::new(CircuitBreaker::new(BreakerConfig::default())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub url: String,
    pub idempotency_key: Option<String>,
}

/// Transport scripted per URL: succeeds with 201 unless told to fail or hang.
#[derive(Default)]
pub(crate) struct FakeTransport {
    failing: Mutex<HashMap<String, u16>>,
    hanging: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail(&self, path: &str, status: u16) {
        self.failing.lock().unwrap().insert(url(path), status);
    }

    pub(crate) fn heal(&self, path: &str) {
        self.failing.lock().unwrap().remove(&url(path));
        self.hanging.lock().unwrap().remove(&url(path));
    }

    pub(crate) fn hang(&self, path: &str) {
        self.hanging.lock().unwrap().insert(url(path));
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        endpoint: &EndpointDescriptor,
        _payload: &[u8],
        idempotency_key: Option<&str>,
    ) -> Result<Response, RequestError> {
        self.calls.lock().unwrap().push(Call {
            url: endpoint.url.clone(),
            idempotency_key: idempotency_key.map(str::to_owned),
        });
        let hang = self.hanging.lock().unwrap().contains(&endpoint.url);
        if hang {
            std::future::pending::<()>().await;
        }
        let status = self.failing.lock().unwrap().get(&endpoint.url).copied();
        match status {
            Some(status) => Err(RequestError::http(status)),
            None => Ok(Response {
                status: 201,
                body: Vec::new(),
            }),
        }
    }
}
