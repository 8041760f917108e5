//! Scripted capability used by the pipeline tests.

use crate::capability::{CapabilityError, RemoteCapability};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// How a scripted call fails.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Transient,
    Status(u16),
    Malformed,
}

impl Failure {
    fn to_error(self) -> CapabilityError {
        match self {
            Failure::Transient => CapabilityError::Transient("connection reset".into()),
            Failure::Status(code) => CapabilityError::Http {
                status: code,
                body: format!("status {code}"),
            },
            Failure::Malformed => CapabilityError::Malformed("missing field".into()),
        }
    }
}

/// Answers `result:<payload>` unless told otherwise, and records how many
/// calls were ever running at once.
#[derive(Debug, Default)]
pub struct ScriptedCapability {
    /// Fail this many times, then succeed.
    fail_first: HashMap<String, (u32, Failure)>,
    /// Fail on every call.
    fail_always: HashMap<String, Failure>,
    latency: HashMap<String, Duration>,
    default_latency: Duration,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    pub fn latency_for(mut self, payload: &str, latency: Duration) -> Self {
        self.latency.insert(payload.to_string(), latency);
        self
    }

    pub fn fail_first(mut self, payload: &str, times: u32, failure: Failure) -> Self {
        self.fail_first.insert(payload.to_string(), (times, failure));
        self
    }

    pub fn fail_always(mut self, payload: &str, failure: Failure) -> Self {
        self.fail_always.insert(payload.to_string(), failure);
        self
    }

    pub fn calls(&self, payload: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(payload)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl RemoteCapability for ScriptedCapability {
    type Output = String;

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn call(&self, payload: &str) -> Result<String, CapabilityError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(payload.to_string()).or_default();
            *c += 1;
            *c
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self
            .latency
            .get(payload)
            .copied()
            .unwrap_or(self.default_latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = self.fail_always.get(payload) {
            return Err(failure.to_error());
        }
        if let Some((times, failure)) = self.fail_first.get(payload) {
            if n <= *times {
                return Err(failure.to_error());
            }
        }
        Ok(format!("result:{payload}"))
    }
}

/// Payloads `item-0 .. item-{n-1}`.
pub fn payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("item-{i}")).collect()
}

/// Counts ERROR and WARN events seen while installed as the thread's default
/// subscriber.
#[derive(Debug, Clone, Default)]
pub struct LevelCounter {
    errors: Arc<AtomicUsize>,
    warnings: Arc<AtomicUsize>,
}

impl LevelCounter {
    /// Route this thread's events through the counter until the guard drops.
    /// Current-thread tokio tests poll every task on the installing thread.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::ERROR {
            self.errors.fetch_add(1, Ordering::SeqCst);
        } else if level == Level::WARN {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A local HTTP server that answers every request with the same canned
/// response. Returns its base URL.
pub async fn http_stub(status: u16, reason: &str, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// A local server that accepts connections and never answers.
pub async fn silent_stub() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}
