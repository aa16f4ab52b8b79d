//! Concurrent signed request engine.
//!
//! [`RequestEngine::submit`] never blocks: it spawns a task that waits for a
//! worker permit, signs the request, executes it on a pooled session and
//! dispatches the [`Outcome`] to exactly one handler kind.
//!
//! # Bounds
//!
//! - Worker permits: `available_parallelism * workers_per_core`
//! - Admitted requests: `max_outstanding`; beyond it a request is resolved
//!   with [`RequestError::Overloaded`]
//!
//! No request is retried.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::infrastructure::metrics;

use super::error::{RequestError, TransportError};
use super::request::{Outcome, Rejection, Request, RequestHandle, RequestStatus, SuccessHandler};
use super::session_pool::SessionPool;
use super::signer::{self, Signer};
use super::transport::{Body, HttpCall, ReqwestSessionFactory, SessionFactory};

/// Extracts an application-level error code and message from a response
/// body. Returns `None` when the body reports success.
pub type EnvelopeCheck = fn(&Value) -> Option<(i64, Option<String>)>;

/// Handlers used when a request carries no rejected or exception handler.
pub trait RequestFallback: Send + Sync {
    /// A request without its own rejected handler was refused.
    fn on_request_rejected(&self, rejection: &Rejection, request: &Request) {
        tracing::warn!(
            method = %request.method(),
            path = request.path(),
            rejection = %rejection,
            "Request rejected\n{request}"
        );
    }

    /// A request without its own exception handler failed.
    fn on_request_exception(&self, error: &RequestError, request: &Request) {
        tracing::error!(
            method = %request.method(),
            path = request.path(),
            error = %error,
            "Request failed\n{request}"
        );
    }
}

/// Fallback that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFallback;

impl RequestFallback for LogFallback {}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Per-call timeout covering the request and, when not streaming, the body.
    pub timeout: Duration,
    /// Worker permits per available core.
    pub workers_per_core: usize,
    /// Admitted-but-unresolved request bound.
    pub max_outstanding: usize,
    /// Cap on idle sessions retained by the pool.
    pub max_idle_sessions: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            workers_per_core: 20,
            max_outstanding: 10_000,
            max_idle_sessions: None,
        }
    }
}

impl EngineOptions {
    /// Worker permits for this machine.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        (cores * self.workers_per_core).max(1)
    }
}

/// Builds a [`RequestEngine`].
pub struct RequestEngineBuilder {
    base_url: String,
    signer: Signer,
    factory: Arc<dyn SessionFactory>,
    options: EngineOptions,
    fallback: Arc<dyn RequestFallback>,
    envelope_check: Option<EnvelopeCheck>,
    runtime: Option<Handle>,
}

impl RequestEngineBuilder {
    /// Replace the session factory (defaults to reqwest).
    #[must_use]
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Set engine tuning.
    #[must_use]
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the gateway-level rejected/exception handlers.
    #[must_use]
    pub fn fallback(mut self, fallback: Arc<dyn RequestFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Classify application-level errors inside 2xx bodies as rejections.
    #[must_use]
    pub fn envelope_check(mut self, check: EnvelopeCheck) -> Self {
        self.envelope_check = Some(check);
        self
    }

    /// Spawn request tasks on `runtime` instead of the current one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the engine. Without an explicit runtime this must run inside one.
    pub fn build(self) -> Result<RequestEngine, TryCurrentError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()?,
        };
        let workers = self.options.worker_count();
        tracing::info!(
            base_url = %self.base_url,
            workers,
            max_outstanding = self.options.max_outstanding,
            timeout_ms = self.options.timeout.as_millis() as u64,
            "Request engine started"
        );

        Ok(RequestEngine {
            inner: Arc::new(EngineInner {
                base_url: self.base_url.trim_end_matches('/').to_string(),
                signer: self.signer,
                pool: Arc::new(SessionPool::new(
                    self.factory,
                    self.options.max_idle_sessions,
                )),
                permits: Semaphore::new(workers),
                timeout: self.options.timeout,
                max_outstanding: self.options.max_outstanding,
                in_flight: AtomicUsize::new(0),
                accepting: AtomicBool::new(true),
                tasks: Mutex::new(Vec::new()),
                fallback: self.fallback,
                envelope_check: self.envelope_check,
                runtime,
            }),
        })
    }
}

/// Executes signed requests concurrently. Cheap to clone.
#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("base_url", &self.inner.base_url)
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl RequestEngine {
    /// Start building an engine for `base_url`, signing with `signer`.
    pub fn builder(base_url: impl Into<String>, signer: Signer) -> RequestEngineBuilder {
        RequestEngineBuilder {
            base_url: base_url.into(),
            signer,
            factory: Arc::new(ReqwestSessionFactory::default()),
            options: EngineOptions::default(),
            fallback: Arc::new(LogFallback),
            envelope_check: None,
            runtime: None,
        }
    }

    /// Schedule `request` and return immediately.
    pub fn submit(&self, request: Request) -> RequestHandle {
        let (tx, handle) = RequestHandle::channel();
        let inner = Arc::clone(&self.inner);
        tracing::debug!(method = %request.method(), path = request.path(), "Request submitted");

        // `accepting` is read under the task lock so `shutdown` sees every
        // task admitted before it flipped the flag.
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        let runtime = inner.runtime.clone();
        let task = if !inner.accepting.load(Ordering::Acquire) {
            runtime.spawn(async move {
                inner.dispatch(request, Outcome::Exception(RequestError::ShutDown), &tx, None);
            })
        } else if let Some(admitted) = Admission::try_admit(&inner) {
            runtime.spawn(async move {
                inner.run(request, tx, admitted).await;
            })
        } else {
            let limit = inner.max_outstanding;
            tracing::warn!(limit, path = request.path(), "Request engine overloaded, shedding request");
            runtime.spawn(async move {
                inner.dispatch(
                    request,
                    Outcome::Exception(RequestError::Overloaded { limit }),
                    &tx,
                    None,
                );
            })
        };
        tasks.push(task);
        drop(tasks);
        handle
    }

    /// Stop accepting requests and wait for every outstanding one to resolve.
    ///
    /// Requests submitted afterwards resolve with [`RequestError::ShutDown`].
    pub async fn shutdown(&self) {
        let was_accepting = {
            let _tasks = self.inner.tasks.lock();
            self.inner.accepting.swap(false, Ordering::AcqRel)
        };
        if was_accepting {
            tracing::info!(in_flight = self.in_flight(), "Request engine shutting down");
        }
        loop {
            let pending = std::mem::take(&mut *self.inner.tasks.lock());
            if pending.is_empty() {
                break;
            }
            for result in futures::future::join_all(pending).await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Request task failed");
                }
            }
        }
        tracing::info!("Request engine stopped");
    }

    /// Requests admitted and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// False once [`shutdown`](Self::shutdown) has been called.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Tracked task handles not yet pruned.
    pub fn tracked_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Absolute URL for `path`.
    pub fn full_url(&self, path: &str) -> String {
        self.inner.full_url(path)
    }
}

struct EngineInner {
    base_url: String,
    signer: Signer,
    pool: Arc<SessionPool>,
    permits: Semaphore,
    timeout: Duration,
    max_outstanding: usize,
    in_flight: AtomicUsize,
    accepting: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    fallback: Arc<dyn RequestFallback>,
    envelope_check: Option<EnvelopeCheck>,
    runtime: Handle,
}

/// Counts an admitted request until dropped, including on handler panic.
struct Admission {
    inner: Arc<EngineInner>,
}

impl Admission {
    fn try_admit(inner: &Arc<EngineInner>) -> Option<Self> {
        let previous = inner.in_flight.fetch_add(1, Ordering::AcqRel);
        if previous >= inner.max_outstanding {
            inner.in_flight.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        metrics::set_requests_in_flight(previous + 1);
        Some(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let previous = self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        metrics::set_requests_in_flight(previous.saturating_sub(1));
    }
}

impl EngineInner {
    fn full_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn run(&self, mut request: Request, tx: watch::Sender<RequestStatus>, admitted: Admission) {
        if let Ok(_permit) = self.permits.acquire().await {
            let outcome = self.execute(&mut request).await;
            self.dispatch(request, outcome, &tx, Some(admitted));
        } else {
            self.dispatch(request, Outcome::Exception(RequestError::ShutDown), &tx, Some(admitted));
        }
    }

    async fn execute(&self, request: &mut Request) -> Outcome {
        if let Err(e) = self
            .signer
            .sign_params(request.signed_params_mut(), signer::request_timestamp())
        {
            return Outcome::Exception(e.into());
        }
        let call = match self.build_call(request) {
            Ok(call) => call,
            Err(e) => return Outcome::Exception(e),
        };

        let mut session = match self.pool.acquire() {
            Ok(session) => session,
            Err(e) => return Outcome::Exception(e.into()),
        };
        let response = match tokio::time::timeout(self.timeout, session.send(&call)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Outcome::Exception(e.into()),
            Err(_) => {
                return Outcome::Exception(RequestError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        // The session stays checked out until the body is fully read.
        let status = response.status;
        let outcome = match response.body {
            Body::Full(text) => self.classify(request, status, text),
            Body::Chunks(chunks) if request.is_streaming() && response_ok(status) => {
                self.stream(request, status, chunks).await
            }
            Body::Chunks(chunks) => match collect_body(chunks).await {
                Ok(text) => self.classify(request, status, text),
                Err(e) => Outcome::Exception(e),
            },
        };
        if matches!(outcome, Outcome::Exception(RequestError::Transport(_))) {
            session.discard();
        }
        outcome
    }

    fn build_call(&self, request: &Request) -> Result<HttpCall, RequestError> {
        let query = request
            .params()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        let body = if request.method() == Method::GET {
            None
        } else {
            Some(serde_json::to_string(request.body()).map_err(|e| RequestError::Decode(e.to_string()))?)
        };
        Ok(HttpCall {
            method: request.method().clone(),
            url: self.full_url(request.path()),
            query,
            headers: request
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body,
            stream: request.is_streaming(),
        })
    }

    fn classify(&self, request: &mut Request, status: u16, text: String) -> Outcome {
        request.set_response(status, Some(text.clone()));
        if !response_ok(status) {
            return Outcome::Rejected(self.rejection(status, text));
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(e) => return Outcome::Exception(RequestError::Decode(e.to_string())),
            }
        };

        if let Some((code, message)) = self.envelope_check.and_then(|check| check(&value)) {
            return Outcome::Rejected(Rejection {
                status,
                ret_code: Some(code),
                message,
                body: text,
            });
        }
        Outcome::Success(value)
    }

    fn rejection(&self, status: u16, body: String) -> Rejection {
        let details = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| self.envelope_check.and_then(|check| check(&value)));
        let (ret_code, message) = match details {
            Some((code, message)) => (Some(code), message),
            None => (None, None),
        };
        Rejection {
            status,
            ret_code,
            message,
            body,
        }
    }

    async fn stream(
        &self,
        request: &mut Request,
        status: u16,
        mut chunks: BoxStream<'static, Result<Vec<u8>, TransportError>>,
    ) -> Outcome {
        request.set_response(status, None);
        if let Some(on_connected) = request.connected_handler() {
            on_connected(&*request);
        }
        let on_message = request.success_handler();

        let mut buffer: Vec<u8> = Vec::new();
        let mut messages = 0;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(e) => return Outcome::Exception(e.into()),
            }
            while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=end).collect();
                match deliver_line(request, status, on_message.as_ref(), &line) {
                    Ok(delivered) => messages += usize::from(delivered),
                    Err(e) => return Outcome::Exception(e),
                }
            }
        }
        match deliver_line(request, status, on_message.as_ref(), &buffer) {
            Ok(delivered) => messages += usize::from(delivered),
            Err(e) => return Outcome::Exception(e),
        }
        Outcome::Streamed { messages }
    }

    /// Run exactly one handler, release the admission, then resolve the handle.
    fn dispatch(
        &self,
        mut request: Request,
        outcome: Outcome,
        tx: &watch::Sender<RequestStatus>,
        admitted: Option<Admission>,
    ) {
        let label = outcome.label();
        let status = match &outcome {
            Outcome::Success(_) | Outcome::Streamed { .. } => RequestStatus::Success,
            Outcome::Rejected(_) => RequestStatus::Rejected,
            Outcome::Exception(_) => RequestStatus::Errored,
        };
        if !request.resolve(status) {
            tracing::error!(path = request.path(), status = %request.status(), "Request already resolved");
            return;
        }
        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            status_code = request.status_code(),
            outcome = label,
            "Request resolved"
        );

        match outcome {
            Outcome::Success(value) => {
                if let Some(on_success) = request.success_handler() {
                    on_success(value, &request);
                }
            }
            Outcome::Streamed { messages } => {
                tracing::debug!(path = request.path(), messages, "Stream finished");
            }
            Outcome::Rejected(rejection) => match request.rejected_handler() {
                Some(on_rejected) => on_rejected(&rejection, &request),
                None => self.fallback.on_request_rejected(&rejection, &request),
            },
            Outcome::Exception(error) => match request.exception_handler() {
                Some(on_exception) => on_exception(&error, &request),
                None => self.fallback.on_request_exception(&error, &request),
            },
        }

        metrics::record_request(label);
        drop(admitted);
        tx.send_replace(status);
    }
}

const fn response_ok(status: u16) -> bool {
    status >= 200 && status < 300
}

async fn collect_body(
    mut chunks: BoxStream<'static, Result<Vec<u8>, TransportError>>,
) -> Result<String, RequestError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = chunks.next().await {
        bytes.extend(chunk?);
    }
    String::from_utf8(bytes).map_err(|e| RequestError::Decode(e.to_string()))
}

/// Parse one stream line and hand it to the success handler. Blank lines
/// are skipped and report `false`.
fn deliver_line(
    request: &mut Request,
    status: u16,
    on_message: Option<&SuccessHandler>,
    line: &[u8],
) -> Result<bool, RequestError> {
    let text = std::str::from_utf8(line).map_err(|e| RequestError::Decode(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }
    request.set_response(status, Some(text.to_string()));
    let value: Value = serde_json::from_str(text).map_err(|e| RequestError::Decode(e.to_string()))?;
    if let Some(on_message) = on_message {
        on_message(value, &*request);
    }
    Ok(true)
}
