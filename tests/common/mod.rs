#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskwire::{
    ApiClient, ClientConfig, HttpRequest, HttpResponse, InstantSleeper, RetryConfig, Transport,
    TransportError,
};

pub const BASE_URL: &str = "http://tasks.test/api";

/// One scripted transport reaction.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(HttpResponse),
    Fail(TransportError),
    /// Never answers; only a deadline or cancellation ends the attempt.
    Hang,
    Delayed(Duration, HttpResponse),
}

impl Step {
    pub fn json(status: u16, body: Value) -> Self {
        Step::Reply(HttpResponse::json(status, &body))
    }

    pub fn status(status: u16) -> Self {
        Step::Reply(HttpResponse::new(status, Vec::new()))
    }
}

/// In-memory transport answering each url from its own queue of steps.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue steps for `endpoint` (relative to [`BASE_URL`]).
    pub fn script(&self, endpoint: &str, steps: impl IntoIterator<Item = Step>) {
        let url = format!("{}{}", BASE_URL, endpoint);
        self.routes.lock().unwrap().entry(url).or_default().extend(steps);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        let url = format!("{}{}", BASE_URL, endpoint);
        self.requests.lock().unwrap().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let step = {
            let mut routes = self.routes.lock().unwrap();
            routes.get_mut(&request.url).and_then(VecDeque::pop_front)
        };
        self.requests.lock().unwrap().push(request);
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => futures::future::pending().await,
            Some(Step::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Err(TransportError::Other("no scripted step left".into())),
        }
    }
}

/// Retry settings without jitter so delays are predictable.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::standard()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(10))
        .with_jitter(false)
}

pub fn config() -> ClientConfig {
    ClientConfig::builder()
        .base_url(BASE_URL)
        .retry(fast_retry(3))
        .write_retry(fast_retry(2))
        .build()
        .unwrap()
}

/// Client over `transport` whose backoff waits return immediately.
pub fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
    ApiClient::builder(config(), transport).sleeper(InstantSleeper).build().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
